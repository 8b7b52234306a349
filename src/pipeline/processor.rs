//! Post pipeline — turns one logical post into one delivered document.
//!
//! Flow, as a single attempt with no retry:
//! 1. Acquire a staging workspace
//! 2. Fetch every event's attachments into it, in order
//! 3. Compose subject + body from the events' texts
//! 4. Warn the chat about oversized attachments (non-fatal)
//! 5. Hand the document to the delivery sink
//! 6. Release the workspace, whatever happened
//!
//! [`PostPipeline::process`] returns the outcome; the [`PostHandler`] impl
//! turns it into the chat acknowledgment.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::pipeline::composer;
use crate::pipeline::types::{
    AttachmentFetcher, ChatId, ChatNotifier, ComposedDocument, DeliveryReport, DeliverySink,
    PostHandler, RawEvent, StagedFile,
};
use crate::workspace::{StagingWorkspace, WorkspaceManager};

/// Default oversized-attachment threshold: 25 MiB.
pub const DEFAULT_OVERSIZE_THRESHOLD: u64 = 25 * 1024 * 1024;

/// At most this many file names are listed in the oversize advisory.
const ADVISORY_MAX_NAMES: usize = 5;

pub const SUCCESS_ACK: &str = "✅ Sent to email!";

/// Orchestrates fetch → compose → deliver → cleanup for one post.
pub struct PostPipeline {
    workspaces: WorkspaceManager,
    fetcher: Arc<dyn AttachmentFetcher>,
    sink: Arc<dyn DeliverySink>,
    notifier: Arc<dyn ChatNotifier>,
    oversize_threshold: u64,
}

impl PostPipeline {
    pub fn new(
        workspaces: WorkspaceManager,
        fetcher: Arc<dyn AttachmentFetcher>,
        sink: Arc<dyn DeliverySink>,
        notifier: Arc<dyn ChatNotifier>,
    ) -> Self {
        Self {
            workspaces,
            fetcher,
            sink,
            notifier,
            oversize_threshold: DEFAULT_OVERSIZE_THRESHOLD,
        }
    }

    pub fn with_oversize_threshold(mut self, bytes: u64) -> Self {
        self.oversize_threshold = bytes;
        self
    }

    /// Run one attempt for `events` (a non-empty, ordered post).
    ///
    /// The staging workspace is released before this returns, on every path.
    pub async fn process(
        &self,
        chat_id: ChatId,
        events: &[RawEvent],
    ) -> Result<DeliveryReport, PipelineError> {
        if events.is_empty() {
            return Err(PipelineError::EmptyBurst);
        }

        let workspace = self.workspaces.acquire().await?;
        info!(
            chat_id,
            events = events.len(),
            workspace = %workspace.path().display(),
            "Processing post"
        );

        let result = self.attempt(chat_id, events, &workspace).await;
        self.workspaces.release(workspace).await;
        result
    }

    async fn attempt(
        &self,
        chat_id: ChatId,
        events: &[RawEvent],
        workspace: &StagingWorkspace,
    ) -> Result<DeliveryReport, PipelineError> {
        let mut attachments: Vec<StagedFile> = Vec::new();
        for event in events {
            let staged = self.fetcher.fetch(event, workspace).await?;
            attachments.extend(staged);
        }

        let document = ComposedDocument {
            subject: composer::subject(&Local::now()),
            body: composer::compose_events(events),
            attachments,
        };

        let oversized: Vec<String> = document
            .attachments
            .iter()
            .filter(|f| f.size > self.oversize_threshold)
            .map(|f| f.name.clone())
            .collect();
        if !oversized.is_empty() {
            warn!(chat_id, files = ?oversized, "Oversized attachments in post");
            let text = oversize_advisory(&oversized, self.oversize_threshold);
            self.notify(chat_id, &text).await;
        }

        self.sink.deliver(&document).await?;

        info!(
            chat_id,
            sink = self.sink.name(),
            attachments = document.attachments.len(),
            "Post delivered"
        );

        Ok(DeliveryReport {
            subject: document.subject,
            events: events.len(),
            attachments: document.attachments.len(),
            oversized,
        })
    }

    async fn notify(&self, chat_id: ChatId, text: &str) {
        if let Err(e) = self.notifier.notify(chat_id, text).await {
            warn!(chat_id, error = %e, "Failed to notify chat");
        }
    }
}

#[async_trait]
impl PostHandler for PostPipeline {
    async fn handle(&self, chat_id: ChatId, events: Vec<RawEvent>) {
        match self.process(chat_id, &events).await {
            Ok(report) => {
                info!(chat_id, subject = %report.subject, "Post processed");
                self.notify(chat_id, SUCCESS_ACK).await;
            }
            Err(e) => {
                error!(chat_id, error = %e, "Post processing failed");
                self.notify(chat_id, &failure_ack(&e)).await;
            }
        }
    }
}

/// User-visible failure acknowledgment.
pub fn failure_ack(err: &PipelineError) -> String {
    format!("❌ Failed to send: {err}")
}

/// Advisory listing up to five oversized file names plus a remainder count.
pub fn oversize_advisory(names: &[String], threshold: u64) -> String {
    let listed = names
        .iter()
        .take(ADVISORY_MAX_NAMES)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let more = if names.len() > ADVISORY_MAX_NAMES {
        format!(" and {} more", names.len() - ADVISORY_MAX_NAMES)
    } else {
        String::new()
    };
    let megabytes = threshold / (1024 * 1024);
    format!(
        "⚠️ Some files are larger than {megabytes} MB: {listed}{more}. \
         I'll try to send anyway, but the mail server may reject the message."
    )
}
