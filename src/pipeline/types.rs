//! Shared types for the post pipeline.

use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, DeliveryError, FetchError};
use crate::workspace::StagingWorkspace;

/// Telegram chat identifier.
pub type ChatId = i64;

static UNSAFE_FILE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("static regex"));

// ── Inbound event ───────────────────────────────────────────────────

/// One inbound post event as received from the transport.
///
/// Immutable once built. Ownership moves from the dispatcher into either the
/// coalescer or the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Chat the event arrived in (and where replies go).
    pub chat_id: ChatId,
    /// Transport-native message id.
    pub message_id: i64,
    /// Burst identifier; events sharing it (within one chat) form one post.
    pub group_id: Option<String>,
    /// Text or caption rendered as inline markup. Empty when absent.
    pub markup: String,
    /// Attachment handles, resolvable by an [`AttachmentFetcher`].
    pub attachments: Vec<AttachmentRef>,
    pub received_at: DateTime<Utc>,
}

impl RawEvent {
    /// Create an event with no group, text or attachments.
    pub fn new(chat_id: ChatId, message_id: i64) -> Self {
        Self {
            chat_id,
            message_id,
            group_id: None,
            markup: String::new(),
            attachments: Vec::new(),
            received_at: Utc::now(),
        }
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_markup(mut self, markup: impl Into<String>) -> Self {
        self.markup = markup.into();
        self
    }

    pub fn with_attachment(mut self, attachment: AttachmentRef) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Coalescing key, if this event belongs to a burst.
    pub fn group_key(&self) -> Option<GroupKey> {
        self.group_id.as_ref().map(|g| GroupKey {
            chat_id: self.chat_id,
            group_id: g.clone(),
        })
    }
}

/// Burst key. Scoped by chat so equal group ids in different chats never merge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub chat_id: ChatId,
    pub group_id: String,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chat_id, self.group_id)
    }
}

// ── Attachments ─────────────────────────────────────────────────────

/// Kind of media an attachment handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Photo,
    Video,
    Document,
    Animation,
    Audio,
    Voice,
}

impl AttachmentKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Document => "document",
            Self::Animation => "animation",
            Self::Audio => "audio",
            Self::Voice => "voice",
        }
    }
}

/// Opaque attachment handle carried by a [`RawEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub kind: AttachmentKind,
    /// Id used to download the file.
    pub file_id: String,
    /// Stable id, used for file naming.
    pub file_unique_id: String,
    /// Original file name, when the sender supplied one.
    pub file_name: Option<String>,
    /// Size reported by the transport, if any.
    pub file_size: Option<u64>,
}

impl AttachmentRef {
    pub fn new(kind: AttachmentKind, file_id: &str, file_unique_id: &str) -> Self {
        Self {
            kind,
            file_id: file_id.to_string(),
            file_unique_id: file_unique_id.to_string(),
            file_name: None,
            file_size: None,
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// File name to stage this attachment under.
    ///
    /// Documents keep their (sanitized) original name; other media get
    /// `<kind>_<unique id><ext>` with a per-kind default extension.
    pub fn staged_file_name(&self) -> String {
        let uid = &self.file_unique_id;
        match self.kind {
            AttachmentKind::Photo => format!("photo_{uid}.jpg"),
            AttachmentKind::Voice => format!("voice_{uid}.ogg"),
            AttachmentKind::Video => format!("video_{uid}{}", self.extension_or(".mp4")),
            AttachmentKind::Animation => {
                format!("animation_{uid}{}", self.extension_or(".mp4"))
            }
            AttachmentKind::Audio => format!("audio_{uid}{}", self.extension_or(".mp3")),
            AttachmentKind::Document => match self.file_name.as_deref() {
                Some(name) if !name.is_empty() => sanitize_file_name(name),
                _ => format!("document_{uid}"),
            },
        }
    }

    fn extension_or(&self, default: &str) -> String {
        self.file_name
            .as_deref()
            .and_then(|n| std::path::Path::new(n).extension())
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .map(|e| format!(".{e}"))
            .unwrap_or_else(|| default.to_string())
    }
}

/// Replace every run of characters outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    UNSAFE_FILE_CHARS.replace_all(name, "_").into_owned()
}

/// An attachment materialized in a staging workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

// ── Outbound document ───────────────────────────────────────────────

/// One logical post, ready for delivery.
#[derive(Debug, Clone)]
pub struct ComposedDocument {
    pub subject: String,
    /// Complete HTML document.
    pub body: String,
    /// Staged attachments, in event order then within-event order.
    pub attachments: Vec<StagedFile>,
}

/// Summary of a successful pipeline attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub subject: String,
    pub events: usize,
    pub attachments: usize,
    pub oversized: Vec<String>,
}

// ── Collaborator traits ─────────────────────────────────────────────

/// Retrieves an event's attachments into a staging workspace.
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    /// Materialize every attachment of `event`, in order. Any failure is
    /// fatal for the whole attempt.
    async fn fetch(
        &self,
        event: &RawEvent,
        workspace: &StagingWorkspace,
    ) -> Result<Vec<StagedFile>, FetchError>;
}

/// Performs outbound delivery of a composed document.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, document: &ComposedDocument) -> Result<(), DeliveryError>;
}

/// Sends short user-visible text back to the originating chat.
#[async_trait]
pub trait ChatNotifier: Send + Sync {
    async fn notify(&self, chat_id: ChatId, text: &str) -> Result<(), ChannelError>;
}

/// Consumer of complete logical posts (one or more events).
///
/// Implementations own their failure reporting; nothing propagates back to
/// the coalescer or dispatcher.
#[async_trait]
pub trait PostHandler: Send + Sync {
    async fn handle(&self, chat_id: ChatId, events: Vec<RawEvent>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_key_scoped_by_chat() {
        let a = RawEvent::new(1, 10).with_group("g1").group_key();
        let b = RawEvent::new(2, 11).with_group("g1").group_key();
        assert!(a.is_some());
        assert_ne!(a, b);
    }

    #[test]
    fn ungrouped_event_has_no_key() {
        assert_eq!(RawEvent::new(1, 10).group_key(), None);
    }

    #[test]
    fn staged_name_photo_and_voice() {
        let photo = AttachmentRef::new(AttachmentKind::Photo, "f", "AQAD1");
        assert_eq!(photo.staged_file_name(), "photo_AQAD1.jpg");
        let voice = AttachmentRef::new(AttachmentKind::Voice, "f", "v9");
        assert_eq!(voice.staged_file_name(), "voice_v9.ogg");
    }

    #[test]
    fn staged_name_video_keeps_original_extension() {
        let video =
            AttachmentRef::new(AttachmentKind::Video, "f", "u1").with_file_name("clip.MOV");
        assert_eq!(video.staged_file_name(), "video_u1.MOV");
        let bare = AttachmentRef::new(AttachmentKind::Video, "f", "u1");
        assert_eq!(bare.staged_file_name(), "video_u1.mp4");
    }

    #[test]
    fn staged_name_audio_default_extension() {
        let audio = AttachmentRef::new(AttachmentKind::Audio, "f", "a1").with_file_name("track");
        assert_eq!(audio.staged_file_name(), "audio_a1.mp3");
    }

    #[test]
    fn staged_name_document_is_sanitized() {
        let doc = AttachmentRef::new(AttachmentKind::Document, "f", "d1")
            .with_file_name("Отчёт за май (final).pdf");
        assert_eq!(doc.staged_file_name(), "_final_.pdf");
        let unnamed = AttachmentRef::new(AttachmentKind::Document, "f", "d1");
        assert_eq!(unnamed.staged_file_name(), "document_d1");
    }

    #[test]
    fn sanitize_collapses_runs() {
        assert_eq!(sanitize_file_name("a b  c.txt"), "a_b_c.txt");
        assert_eq!(sanitize_file_name("ok-name_1.tar.gz"), "ok-name_1.tar.gz");
    }
}
