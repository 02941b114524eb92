//! Per-run stream bus
//!
//! Connects the run executor's output to HTTP subscribers. Each run owns a
//! FIFO [`MessageQueue`] plus, while the executor holds it, a [`RunControl`]
//! cancellation handle. Queues have create-on-access semantics so a
//! subscriber can join before the executor starts publishing.
//!
//! Delivery is work-queue style: each message is dequeued by exactly one
//! subscriber. One primary subscriber per run is the supported shape.

mod control;
mod queue;

pub use control::{CancelAction, CancelSignal, RunControl};
pub use queue::{MessageQueue, StreamMessage};

use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Bus of per-run queues and cancellation handles
#[derive(Default)]
pub struct StreamBus {
    queues: DashMap<Uuid, Arc<MessageQueue>>,
    controls: DashMap<Uuid, RunControl>,
}

impl StreamBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock a run: create its cancellation handle. An existing handle is
    /// overwritten with a warning - at most one holder per run is expected.
    pub fn lock(&self, run_id: Uuid) -> RunControl {
        let control = RunControl::new();
        if self.controls.insert(run_id, control.clone()).is_some() {
            tracing::warn!(run_id = %run_id, "Run was already locked, overwriting control handle");
        }
        control
    }

    /// Unlock a run: remove its cancellation handle
    pub fn unlock(&self, run_id: Uuid) {
        self.controls.remove(&run_id);
    }

    /// Whether a run is currently locked
    pub fn is_locked(&self, run_id: Uuid) -> bool {
        self.controls.contains_key(&run_id)
    }

    /// The run's cancellation handle, if locked
    pub fn control(&self, run_id: Uuid) -> Option<RunControl> {
        self.controls.get(&run_id).map(|entry| entry.clone())
    }

    /// The run's queue, created on first access
    pub fn queue(&self, run_id: Uuid) -> Arc<MessageQueue> {
        Arc::clone(
            &self
                .queues
                .entry(run_id)
                .or_insert_with(|| Arc::new(MessageQueue::new())),
        )
    }

    /// The run's queue only if it already exists
    pub fn existing_queue(&self, run_id: Uuid) -> Option<Arc<MessageQueue>> {
        self.queues.get(&run_id).map(|entry| Arc::clone(&entry))
    }

    /// Publish a message to a run's queue
    pub fn publish(&self, run_id: Uuid, message: StreamMessage) {
        self.queue(run_id).push(message);
    }

    /// Drop all bus state for a run (queue and control handle)
    pub fn remove_run(&self, run_id: Uuid) {
        self.queues.remove(&run_id);
        self.controls.remove(&run_id);
    }
}
