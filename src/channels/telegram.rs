//! Telegram channel — long-polls the Bot API for posts.
//!
//! Native Bot API client over reqwest. Besides the inbound stream it serves
//! as the pipeline's attachment fetcher (`getFile` + download) and chat
//! notifier (`sendMessage`).

use std::path::Path;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;

use crate::channels::telegram_types::{ApiResponse, Message, TelegramFile, Update};
use crate::channels::InboundStream;
use crate::error::{ChannelError, FetchError};
use crate::pipeline::types::{
    AttachmentFetcher, AttachmentRef, ChatId, ChatNotifier, RawEvent, StagedFile,
};
use crate::workspace::StagingWorkspace;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Long-poll timeout passed to getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Back-off after a failed poll.
const POLL_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

pub const START_TEXT: &str =
    "Hi! Forward me any Telegram post and I'll send it to your email.";

pub const HELP_TEXT: &str = "How to use:\n\
1) Forward me a message or post (text, photos, videos or any mix).\n\
2) I download the media, keep the text formatting and send it all to email.\n\
3) When it's done I reply \"✅ Sent to email!\"\n\n\
Note: large attachments (25 MB+) may be rejected by the mail server. I'll still try.";

/// One classified inbound update.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Content to relay.
    Post(RawEvent),
    /// Bot command, e.g. `start` or `help`.
    Command { chat_id: ChatId, name: String },
}

/// Telegram channel — connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    allowed_users: Vec<String>,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            api_base: DEFAULT_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the client at a different Bot API server (local server, tests).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{file_path}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    /// Call a Bot API method and unwrap its `result`.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(format!("{method}: {}", e.without_url())))?;

        let status = resp.status();
        let parsed: ApiResponse<T> = resp
            .json()
            .await
            .map_err(|e| ChannelError::Http(format!("{method} returned {status}: {e}")))?;

        match parsed {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => Err(ChannelError::Http(format!(
                "{method} failed ({status}): {}",
                description.unwrap_or_else(|| "no description".into())
            ))),
        }
    }

    /// Send a plain-text message, split to fit Telegram's 4096 char limit.
    pub async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            let _: serde_json::Value = self
                .call(
                    "sendMessage",
                    serde_json::json!({ "chat_id": chat_id, "text": chunk }),
                )
                .await
                .map_err(|e| ChannelError::SendFailed {
                    name: "telegram".into(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Verify the token with `getMe`.
    pub async fn health_check(&self) -> Result<(), ChannelError> {
        let me: serde_json::Value =
            self.call("getMe", serde_json::json!({}))
                .await
                .map_err(|e| ChannelError::StartupFailed {
                    name: "telegram".into(),
                    reason: e.to_string(),
                })?;
        tracing::info!(
            bot = me.get("username").and_then(|u| u.as_str()).unwrap_or("unknown"),
            "Telegram bot authenticated"
        );
        Ok(())
    }

    /// Drop updates that queued up while the relay was offline.
    pub async fn drop_pending_updates(&self) -> Result<(), ChannelError> {
        let _: bool = self
            .call(
                "deleteWebhook",
                serde_json::json!({ "drop_pending_updates": true }),
            )
            .await?;
        Ok(())
    }

    /// Start long-polling. Posts and commands arrive on the returned stream.
    pub fn start(&self) -> InboundStream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let allowed_users = self.allowed_users.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for posts...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message", "channel_post"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {}", e.without_url());
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let data: ApiResponse<Vec<Update>> = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let updates = match data {
                    ApiResponse {
                        ok: true,
                        result: Some(updates),
                        ..
                    } => updates,
                    ApiResponse { description, .. } => {
                        tracing::warn!(
                            description = description.as_deref().unwrap_or(""),
                            "Telegram getUpdates rejected"
                        );
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                for update in updates {
                    // Advance offset past this update
                    offset = offset.max(update.update_id + 1);

                    let Some(message) = update.into_message() else {
                        continue;
                    };
                    let Some(inbound) = classify(&message, &allowed_users) else {
                        continue;
                    };

                    if tx.send(inbound).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Box::pin(stream)
    }

    /// Download `file_path` (as returned by getFile) to `dest`.
    async fn download(&self, file_path: &str, dest: &Path, name: &str) -> Result<u64, FetchError> {
        let download_err = |reason: String| FetchError::Download {
            name: name.to_string(),
            reason,
        };

        let mut resp = self
            .client
            .get(self.file_url(file_path))
            .send()
            .await
            .map_err(|e| download_err(e.without_url().to_string()))?;

        if !resp.status().is_success() {
            return Err(download_err(format!("HTTP {}", resp.status())));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| download_err(e.without_url().to_string()))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    async fn fetch_one(
        &self,
        attachment: &AttachmentRef,
        workspace: &StagingWorkspace,
    ) -> Result<StagedFile, FetchError> {
        let path = workspace.reserve_path(&attachment.staged_file_name());
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();

        let file: TelegramFile = self
            .call(
                "getFile",
                serde_json::json!({ "file_id": attachment.file_id }),
            )
            .await
            .map_err(|e| FetchError::Lookup {
                file_id: attachment.file_id.clone(),
                reason: e.to_string(),
            })?;
        let remote_path = file.file_path.ok_or_else(|| FetchError::Lookup {
            file_id: attachment.file_id.clone(),
            reason: "no file_path returned (file may exceed the Bot API download limit)".into(),
        })?;

        tracing::info!(
            kind = attachment.kind.label(),
            path = %path.display(),
            "Downloading attachment"
        );
        let size = self.download(&remote_path, &path, &name).await?;

        Ok(StagedFile { name, path, size })
    }
}

// ── Pipeline collaborator implementations ───────────────────────────

#[async_trait]
impl AttachmentFetcher for TelegramChannel {
    async fn fetch(
        &self,
        event: &RawEvent,
        workspace: &StagingWorkspace,
    ) -> Result<Vec<StagedFile>, FetchError> {
        let mut staged = Vec::with_capacity(event.attachments.len());
        for attachment in &event.attachments {
            staged.push(self.fetch_one(attachment, workspace).await?);
        }
        Ok(staged)
    }
}

#[async_trait]
impl ChatNotifier for TelegramChannel {
    async fn notify(&self, chat_id: ChatId, text: &str) -> Result<(), ChannelError> {
        self.send_message(chat_id, text).await
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Turn a message into a post or command; `None` for anything to ignore.
pub fn classify(message: &Message, allowed_users: &[String]) -> Option<Inbound> {
    if message.is_service() {
        return None;
    }

    let identities = message.sender_identities();
    if !check_user_allowed(allowed_users, identities.iter().map(String::as_str)) {
        tracing::warn!(
            chat_id = message.chat.id,
            sender = ?identities,
            "Telegram: ignoring message from unauthorized user"
        );
        return None;
    }

    // Only known commands are intercepted; any other slash text is a post.
    if let Some(name) = message.command().filter(|n| command_reply(n).is_some()) {
        return Some(Inbound::Command {
            chat_id: message.chat.id,
            name,
        });
    }

    Some(Inbound::Post(message.to_raw_event()))
}

/// Reply text for a bot command.
pub fn command_reply(name: &str) -> Option<&'static str> {
    match name {
        "start" => Some(START_TEXT),
        "help" => Some(HELP_TEXT),
        _ => None,
    }
}

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // Byte index of the max_len-th char.
        let cut = remaining
            .char_indices()
            .nth(max_len)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        let chunk = &remaining[..cut];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(cut);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { cut } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
