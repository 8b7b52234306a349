//! Configuration types.
//!
//! Everything comes from environment variables (optionally seeded from a
//! `.env` file by the binary).

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::channels::email::EmailConfig;
use crate::error::ConfigError;

/// Relay configuration.
#[derive(Debug)]
pub struct RelayConfig {
    pub telegram_bot_token: SecretString,
    /// Usernames or numeric ids allowed to post; `*` allows everyone.
    pub allowed_users: Vec<String>,
    pub email: EmailConfig,
    /// Root under which per-attempt staging directories are created.
    pub temp_dir: PathBuf,
    /// Quiet window after which a burst is considered complete.
    pub flush_delay: Duration,
    /// Attachments larger than this trigger the size advisory.
    pub warn_size_bytes: u64,
}

impl RelayConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// All missing required keys are reported together.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut missing = Vec::new();
        let mut required = |key: &str| {
            get(key).unwrap_or_else(|| {
                missing.push(key.to_string());
                String::new()
            })
        };
        let bot_token = required("TELEGRAM_BOT_TOKEN");
        let sender = required("EMAIL_SENDER");
        let password = required("EMAIL_PASSWORD");
        let recipient = required("EMAIL_RECIPIENT");
        if !missing.is_empty() {
            return Err(ConfigError::MissingEnvVars(missing));
        }

        let allowed_users: Vec<String> = get("TELEGRAM_ALLOWED_USERS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let smtp_port: u16 = parse_or(&get, "SMTP_PORT", 465)?;
        let timeout_secs: u64 = parse_or(&get, "SMTP_TIMEOUT_SECS", 60)?;
        let flush_delay_secs: f64 = parse_or(&get, "MEDIA_GROUP_FLUSH_DELAY_SEC", 1.6)?;
        let flush_delay = Duration::try_from_secs_f64(flush_delay_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "MEDIA_GROUP_FLUSH_DELAY_SEC".into(),
                message: format!("must be a positive number of seconds, got {flush_delay_secs}"),
            })?;
        let warn_size_bytes: u64 = parse_or(&get, "WARN_SIZE_BYTES", 25 * 1024 * 1024)?;

        Ok(Self {
            telegram_bot_token: SecretString::from(bot_token),
            allowed_users,
            email: EmailConfig {
                smtp_host: get("SMTP_HOST").unwrap_or_else(|| "smtp.gmail.com".to_string()),
                smtp_port,
                sender,
                password: SecretString::from(password),
                recipient,
                timeout: Duration::from_secs(timeout_secs),
            },
            temp_dir: get("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp/telegram_bot/")),
            flush_delay,
            warn_size_bytes,
        })
    }

    /// Whether every sender is allowed.
    pub fn allows_everyone(&self) -> bool {
        self.allowed_users.iter().any(|u| u == "*")
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
    }
}
