//! Cancellation plumbing
//!
//! [`CancelSignal`] is a pure single-shot signal; [`RunControl`] pairs one
//! with a write-once [`CancelAction`] so the executor can read *why* a run
//! was cancelled after observing *that* it was.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;

/// Why a run was cancelled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelAction {
    /// Stop the run, keeping its output and checkpoint progress
    #[default]
    Interrupt,
    /// Discard the run entirely, reverting the thread
    Rollback,
}

#[derive(Default)]
struct SignalInner {
    notify: Notify,
    fired: AtomicBool,
}

/// Single-shot cancellation signal
#[derive(Clone, Default)]
pub struct CancelSignal {
    inner: Arc<SignalInner>,
}

impl CancelSignal {
    /// Create an unfired signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal, waking all waiters. Subsequent fires are no-ops.
    pub fn fire(&self) {
        self.inner.fired.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Whether the signal has fired
    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Wait until the signal fires. Returns immediately if it already has.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so a concurrent fire cannot be lost.
            let notified = self.inner.notify.notified();
            if self.is_fired() {
                return;
            }
            notified.await;
        }
    }
}

/// Per-run cancellation handle: the signal plus a write-once reason
#[derive(Clone, Default)]
pub struct RunControl {
    signal: CancelSignal,
    action: Arc<OnceLock<CancelAction>>,
}

impl RunControl {
    /// Create an unfired handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the handle with a reason. The first reason wins; later fires
    /// only re-assert the signal.
    pub fn fire(&self, action: CancelAction) {
        let _ = self.action.set(action);
        self.signal.fire();
    }

    /// Whether the handle has fired
    pub fn is_fired(&self) -> bool {
        self.signal.is_fired()
    }

    /// The recorded reason, once fired
    pub fn action(&self) -> Option<CancelAction> {
        self.action.get().copied()
    }

    /// The underlying signal
    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }
}
