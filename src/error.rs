//! Error types for post-relay.

use std::path::PathBuf;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingEnvVars(Vec<String>),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Channel-related errors (inbound transport and chat replies).
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Staging workspace errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Failed to create staging directory {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Attachment retrieval errors.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Could not resolve file {file_id}: {reason}")]
    Lookup { file_id: String, reason: String },

    #[error("Download of {name} failed: {reason}")]
    Download { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP send failed: {0}")]
    Transport(String),

    #[error("Delivery task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that end one pipeline attempt.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("No events to process")]
    EmptyBurst,

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_vars_lists_all_names() {
        let err = ConfigError::MissingEnvVars(vec!["A".into(), "B".into()]);
        assert_eq!(err.to_string(), "Missing required environment variables: A, B");
    }

    #[test]
    fn pipeline_error_is_transparent_over_delivery() {
        let err = PipelineError::from(DeliveryError::Transport("535 auth failed".into()));
        assert_eq!(err.to_string(), "SMTP send failed: 535 auth failed");
    }
}
