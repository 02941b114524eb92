//! Checkpoint storage trait for pluggable backend implementations
//!
//! [`Checkpointer`] is the abstraction the hosting server depends on for
//! persistent checkpoint storage. The server never inspects stored payloads
//! beyond the `values`/`next`/`tasks` fields used for thread status
//! derivation, so any backend that can round-trip [`Checkpoint`] values
//! (SQL, KV stores, object storage) slots in behind this trait.
//!
//! Implementations must be `Send + Sync`; each `thread_id` owns an
//! independent checkpoint history.

use crate::{
    checkpoint::{Checkpoint, CheckpointMetadata, CheckpointRef, CheckpointTuple, PendingWrite},
    error::Result,
};
use async_trait::async_trait;
use std::collections::HashMap;

/// Core trait for implementing checkpoint storage backends
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Fetch just the checkpoint addressed by `config`, if present.
    async fn get(&self, config: &CheckpointRef) -> Result<Option<Checkpoint>> {
        Ok(self.get_tuple(config).await?.map(|t| t.checkpoint))
    }

    /// Retrieve the checkpoint addressed by `config` with its metadata and
    /// parent link. With `checkpoint_id = None` this returns the latest
    /// checkpoint of the thread, or `None` if the thread has no history.
    async fn get_tuple(&self, config: &CheckpointRef) -> Result<Option<CheckpointTuple>>;

    /// List checkpoints newest-first.
    ///
    /// * `config` filters by thread (and namespace) when present.
    /// * `filter` is a metadata subset filter over `metadata.extra`.
    /// * `before` restricts results to checkpoints stored before the
    ///   referenced one.
    /// * `limit` caps the result count.
    async fn list(
        &self,
        config: Option<&CheckpointRef>,
        filter: Option<&HashMap<String, serde_json::Value>>,
        before: Option<&CheckpointRef>,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>>;

    /// Store a checkpoint, returning the concrete address it was stored
    /// under (the input `config` with the checkpoint's ID filled in).
    async fn put(
        &self,
        config: &CheckpointRef,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointRef>;

    /// Store intermediate writes linked to the checkpoint at `config`.
    async fn put_writes(&self, config: &CheckpointRef, writes: Vec<PendingWrite>) -> Result<()>;

    /// Delete the entire checkpoint history of a thread.
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;

    /// Copy the full checkpoint history of `source_thread_id` under
    /// `target_thread_id`, leaving the source untouched.
    async fn copy_thread(&self, source_thread_id: &str, target_thread_id: &str) -> Result<()>;

    /// Drop all stored checkpoints.
    async fn clear(&self) -> Result<()>;
}
