//! Ingest dispatcher — routes each inbound event to the coalescer or
//! straight to the post handler.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::pipeline::coalescer::GroupCoalescer;
use crate::pipeline::types::{PostHandler, RawEvent};

/// What happened to a dispatched event.
#[derive(Debug)]
pub enum Dispatched {
    /// Buffered in an open burst.
    Buffered,
    /// Ungrouped; processing already started on its own task.
    Spawned(JoinHandle<()>),
}

/// Routes grouped events into the coalescer and processes ungrouped
/// events immediately, each on its own task so the caller never waits on
/// delivery.
pub struct IngestDispatcher {
    coalescer: Arc<GroupCoalescer>,
    handler: Arc<dyn PostHandler>,
}

impl IngestDispatcher {
    pub fn new(coalescer: Arc<GroupCoalescer>, handler: Arc<dyn PostHandler>) -> Self {
        Self { coalescer, handler }
    }

    pub fn coalescer(&self) -> &Arc<GroupCoalescer> {
        &self.coalescer
    }

    pub fn dispatch(&self, event: RawEvent) -> Dispatched {
        if let Some(key) = event.group_key() {
            self.coalescer.observe(key, event);
            return Dispatched::Buffered;
        }

        debug!(chat_id = event.chat_id, message_id = event.message_id, "Ungrouped event");
        let handler = Arc::clone(&self.handler);
        Dispatched::Spawned(tokio::spawn(async move {
            handler.handle(event.chat_id, vec![event]).await;
        }))
    }
}
