//! Aggregate-document persistence
//!
//! Presents one operation: apply a function atomically to the aggregate
//! document. Reads see a consistent snapshot; writes are serialised
//! process-wide through a single async mutex. A guard obtained from
//! [`Persistence::begin`] may be held across awaits - a callback that
//! suspends keeps exclusive access until it returns.
//!
//! A background flusher writes the document to disk whenever it is dirty,
//! and the binary performs a final flush on shutdown. Flush failures are
//! retried on the next tick and escalate to a fatal error after a bounded
//! number of consecutive misses.

mod document;

pub use document::AggregateDoc;

use crate::errors::{Result, ServerError};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;

struct PersistInner {
    doc: Mutex<AggregateDoc>,
    dirty: AtomicBool,
    path: Option<PathBuf>,
}

/// Shared handle to the aggregate document
#[derive(Clone)]
pub struct Persistence {
    inner: Arc<PersistInner>,
}

/// Exclusive access to the aggregate document. Mutable access marks the
/// document dirty for the next flush.
pub struct DocGuard<'a> {
    guard: MutexGuard<'a, AggregateDoc>,
    dirty: &'a AtomicBool,
}

impl Deref for DocGuard<'_> {
    type Target = AggregateDoc;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for DocGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.dirty.store(true, Ordering::Release);
        &mut self.guard
    }
}

impl Persistence {
    /// Ephemeral persistence with no backing file (tests, embedded use)
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(PersistInner {
                doc: Mutex::new(AggregateDoc::default()),
                dirty: AtomicBool::new(false),
                path: None,
            }),
        }
    }

    /// Open the document at `path`, constructing an empty one when the file
    /// does not exist. A present but unreadable or unparsable document is a
    /// startup error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            AggregateDoc::default()
        };

        tracing::info!(path = %path.display(), "Opened aggregate document");
        Ok(Self {
            inner: Arc::new(PersistInner {
                doc: Mutex::new(doc),
                dirty: AtomicBool::new(false),
                path: Some(path),
            }),
        })
    }

    /// Acquire exclusive access to the document. The guard may be held
    /// across awaits; no other operation observes partial mutations.
    pub async fn begin(&self) -> DocGuard<'_> {
        DocGuard {
            guard: self.inner.doc.lock().await,
            dirty: &self.inner.dirty,
        }
    }

    /// Read from a consistent snapshot of the document
    pub async fn read<T>(&self, f: impl FnOnce(&AggregateDoc) -> T) -> T {
        let doc = self.inner.doc.lock().await;
        f(&doc)
    }

    /// Apply a mutation atomically, returning its result
    pub async fn apply<T>(&self, f: impl FnOnce(&mut AggregateDoc) -> Result<T>) -> Result<T> {
        let mut guard = self.begin().await;
        f(&mut guard)
    }

    /// Whether unflushed mutations exist
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::Acquire)
    }

    /// Flush the document to disk if dirty. Returns `true` when a write
    /// happened. A failed write re-marks the document dirty so the next
    /// tick retries.
    pub async fn flush(&self) -> Result<bool> {
        let Some(path) = self.inner.path.as_deref() else {
            return Ok(false);
        };
        if !self.inner.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }

        let encoded = {
            let doc = self.inner.doc.lock().await;
            serde_json::to_string_pretty(&*doc)?
        };

        if let Err(err) = write_atomic(path, &encoded).await {
            self.inner.dirty.store(true, Ordering::Release);
            return Err(err);
        }
        tracing::debug!(path = %path.display(), bytes = encoded.len(), "Flushed aggregate document");
        Ok(true)
    }

    /// Spawn the background flusher. The task resolves only when
    /// `max_failures` consecutive flushes have failed; the binary treats
    /// that as fatal and shuts down.
    pub fn spawn_flusher(&self, interval: Duration, max_failures: u32) -> JoinHandle<ServerError> {
        let persistence = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut failures = 0u32;

            loop {
                ticker.tick().await;
                match persistence.flush().await {
                    Ok(_) => failures = 0,
                    Err(err) => {
                        failures += 1;
                        tracing::warn!(
                            error = %err,
                            consecutive = failures,
                            "Failed to flush aggregate document"
                        );
                        if failures >= max_failures {
                            tracing::error!(
                                consecutive = failures,
                                "Persistent flush failure, escalating"
                            );
                            return ServerError::Fatal(format!(
                                "aggregate document flush failed {failures} times in a row: {err}"
                            ));
                        }
                    }
                }
            }
        })
    }
}

/// Write via a sibling temp file and rename so a crash mid-write never
/// leaves a truncated document.
async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
