//! Burst coalescer — debounces grouped events into one logical post.
//!
//! Each open burst owns one accumulator in the registry: the events seen so
//! far and the single armed quiet-window timer. Every new event for the key
//! cancels that timer and arms a fresh one. When a timer survives its whole
//! window, the accumulator is removed from the registry and its events are
//! handed to the [`PostHandler`] from the timer's own task.
//!
//! Invariants:
//! - an accumulator is in the registry iff its burst is open
//! - append + cancel + rearm for one key happens under the registry lock
//! - a timer flushes only if its epoch still matches the accumulator's, so a
//!   cancelled timer that already woke up is a no-op
//! - removal happens before dispatch, so a new burst under the same key
//!   starts a new accumulator instead of joining the one being flushed

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::pipeline::types::{GroupKey, PostHandler, RawEvent};

/// Default quiet window before a burst is considered complete.
pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_millis(1600);

/// Per-burst state.
struct GroupAccumulator {
    events: Vec<RawEvent>,
    epoch: u64,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    groups: HashMap<GroupKey, GroupAccumulator>,
    /// Shared across all keys so epochs are never reused.
    next_epoch: u64,
}

impl Registry {
    fn bump_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }
}

/// Debounces grouped events per (chat, group id) key.
///
/// Must be used from within a Tokio runtime: `observe` spawns the timers.
pub struct GroupCoalescer {
    quiet_window: Duration,
    handler: Arc<dyn PostHandler>,
    registry: Arc<Mutex<Registry>>,
}

impl GroupCoalescer {
    pub fn new(quiet_window: Duration, handler: Arc<dyn PostHandler>) -> Self {
        Self {
            quiet_window,
            handler,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Append `event` to the burst for `key` and restart its quiet window.
    ///
    /// Never suspends.
    pub fn observe(&self, key: GroupKey, event: RawEvent) {
        let deadline = Instant::now() + self.quiet_window;
        let mut registry = lock(&self.registry);
        let epoch = registry.bump_epoch();

        match registry.groups.entry(key) {
            Entry::Occupied(mut entry) => {
                let timer = self.arm(entry.key().clone(), epoch, deadline);
                let acc = entry.get_mut();
                acc.timer.abort();
                acc.timer = timer;
                acc.epoch = epoch;
                acc.events.push(event);
                debug!(
                    group = %entry.key(),
                    events = entry.get().events.len(),
                    "Event appended to burst"
                );
            }
            Entry::Vacant(entry) => {
                let timer = self.arm(entry.key().clone(), epoch, deadline);
                debug!(group = %entry.key(), "Burst opened");
                entry.insert(GroupAccumulator {
                    events: vec![event],
                    epoch,
                    timer,
                });
            }
        }
    }

    /// Spawn the flush task for `key`, valid only while `epoch` is current.
    fn arm(&self, key: GroupKey, epoch: u64, deadline: Instant) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let handler = Arc::clone(&self.handler);

        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;

            let events = {
                let mut registry = lock(&registry);
                match registry.groups.get(&key) {
                    Some(acc) if acc.epoch == epoch => {
                        registry.groups.remove(&key).map(|acc| acc.events)
                    }
                    _ => None,
                }
            };
            let Some(events) = events else {
                return;
            };

            info!(group = %key, events = events.len(), "Flushing burst");
            handler.handle(key.chat_id, events).await;
        })
    }

    /// Number of bursts currently open.
    pub fn open_bursts(&self) -> usize {
        lock(&self.registry).groups.len()
    }

    /// Events buffered so far for `key`, if its burst is open.
    pub fn buffered(&self, key: &GroupKey) -> Option<usize> {
        lock(&self.registry).groups.get(key).map(|acc| acc.events.len())
    }

    /// Close every open burst now: cancel all timers and return the bursts.
    pub fn drain(&self) -> Vec<(GroupKey, Vec<RawEvent>)> {
        let mut registry = lock(&self.registry);
        registry
            .groups
            .drain()
            .map(|(key, acc)| {
                acc.timer.abort();
                (key, acc.events)
            })
            .collect()
    }

    /// Drain and process every open burst without waiting for its window.
    pub async fn flush_all(&self) {
        let bursts = self.drain();
        if !bursts.is_empty() {
            info!(bursts = bursts.len(), "Flushing open bursts early");
        }
        for (key, events) in bursts {
            self.handler.handle(key.chat_id, events).await;
        }
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}
