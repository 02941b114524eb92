//! Checkpointer proxy
//!
//! Thin facade over the injected [`Checkpointer`] implementation. The core
//! never inspects checkpoint payloads beyond the fields thread-status
//! derivation reads; everything here is delegation plus the two lookups the
//! run executor needs.

use crate::errors::Result;
use std::collections::HashMap;
use std::sync::Arc;
use trellis_checkpoint::{
    Checkpoint, CheckpointMetadata, CheckpointRef, CheckpointTuple, Checkpointer, PendingWrite,
};
use uuid::Uuid;

/// Shared handle to the injected checkpoint store
#[derive(Clone)]
pub struct CheckpointerHandle {
    inner: Arc<dyn Checkpointer>,
}

impl CheckpointerHandle {
    /// Wrap an injected checkpointer implementation
    pub fn new(inner: Arc<dyn Checkpointer>) -> Self {
        Self { inner }
    }

    /// Retrieve the checkpoint tuple addressed by `config`
    pub async fn get_tuple(&self, config: &CheckpointRef) -> Result<Option<CheckpointTuple>> {
        Ok(self.inner.get_tuple(config).await?)
    }

    /// List checkpoints newest-first
    pub async fn list(
        &self,
        config: Option<&CheckpointRef>,
        filter: Option<&HashMap<String, serde_json::Value>>,
        before: Option<&CheckpointRef>,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>> {
        Ok(self.inner.list(config, filter, before, limit).await?)
    }

    /// Store a checkpoint
    pub async fn put(
        &self,
        config: &CheckpointRef,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointRef> {
        Ok(self.inner.put(config, checkpoint, metadata).await?)
    }

    /// Store intermediate writes for a checkpoint
    pub async fn put_writes(&self, config: &CheckpointRef, writes: Vec<PendingWrite>) -> Result<()> {
        Ok(self.inner.put_writes(config, writes).await?)
    }

    /// Delete a thread's checkpoint history
    pub async fn delete(&self, thread_id: Uuid) -> Result<()> {
        Ok(self.inner.delete_thread(&thread_id.to_string()).await?)
    }

    /// Copy a thread's checkpoint history under a new thread id
    pub async fn copy(&self, source: Uuid, target: Uuid) -> Result<()> {
        Ok(self
            .inner
            .copy_thread(&source.to_string(), &target.to_string())
            .await?)
    }

    /// Drop all stored checkpoints
    pub async fn clear(&self) -> Result<()> {
        Ok(self.inner.clear().await?)
    }

    /// The latest checkpoint of a thread, if any
    pub async fn latest(&self, thread_id: Uuid) -> Result<Option<CheckpointTuple>> {
        self.get_tuple(&CheckpointRef::latest(thread_id.to_string()))
            .await
    }
}
