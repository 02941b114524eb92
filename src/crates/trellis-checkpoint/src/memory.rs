//! In-memory checkpoint storage for development and testing
//!
//! Reference implementation of [`Checkpointer`] backed by a thread-safe
//! `HashMap`. All data is lost on restart; for production persistence
//! implement the trait over a durable backend.

use crate::{
    checkpoint::{Checkpoint, CheckpointMetadata, CheckpointRef, CheckpointTuple, PendingWrite},
    error::{CheckpointError, Result},
    traits::Checkpointer,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Storage entry for in-memory checkpoints
#[derive(Debug, Clone)]
struct CheckpointEntry {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
    config: CheckpointRef,
    parent_config: Option<CheckpointRef>,
    writes: Vec<PendingWrite>,
}

/// Thread-safe in-memory checkpoint storage, keyed by thread id with
/// entries in insertion order (oldest first).
type CheckpointStorage = Arc<RwLock<HashMap<String, Vec<CheckpointEntry>>>>;

/// In-memory checkpointer implementation
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointer {
    storage: CheckpointStorage,
}

impl InMemoryCheckpointer {
    /// Create a new in-memory checkpointer
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads with stored history
    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Total number of checkpoints across all threads
    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|entries| entries.len())
            .sum()
    }

    fn tuple_of(entry: &CheckpointEntry) -> CheckpointTuple {
        CheckpointTuple {
            config: entry.config.clone(),
            checkpoint: entry.checkpoint.clone(),
            metadata: entry.metadata.clone(),
            parent_config: entry.parent_config.clone(),
        }
    }

    fn metadata_matches(entry: &CheckpointEntry, filter: &HashMap<String, serde_json::Value>) -> bool {
        filter
            .iter()
            .all(|(key, value)| entry.metadata.extra.get(key) == Some(value))
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn get_tuple(&self, config: &CheckpointRef) -> Result<Option<CheckpointTuple>> {
        if config.thread_id.is_empty() {
            return Err(CheckpointError::Invalid("thread_id is required".to_string()));
        }

        let storage = self.storage.read().await;
        let Some(entries) = storage.get(&config.thread_id) else {
            return Ok(None);
        };

        let entry = match &config.checkpoint_id {
            Some(checkpoint_id) => entries.iter().find(|e| &e.checkpoint.id == checkpoint_id),
            None => entries.last(),
        };

        Ok(entry.map(Self::tuple_of))
    }

    async fn list(
        &self,
        config: Option<&CheckpointRef>,
        filter: Option<&HashMap<String, serde_json::Value>>,
        before: Option<&CheckpointRef>,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>> {
        let storage = self.storage.read().await;

        let thread_ids: Vec<String> = match config {
            Some(cfg) if !cfg.thread_id.is_empty() => vec![cfg.thread_id.clone()],
            _ => storage.keys().cloned().collect(),
        };

        let mut results = Vec::new();
        'threads: for thread_id in thread_ids {
            let Some(entries) = storage.get(&thread_id) else {
                continue;
            };

            // Entries are oldest-first; a `before` cursor cuts off everything
            // at or after the referenced checkpoint.
            let cutoff = before
                .and_then(|b| b.checkpoint_id.as_ref())
                .and_then(|id| entries.iter().position(|e| &e.checkpoint.id == id))
                .unwrap_or(entries.len());

            for entry in entries[..cutoff].iter().rev() {
                if let Some(filter_map) = filter {
                    if !Self::metadata_matches(entry, filter_map) {
                        continue;
                    }
                }

                results.push(Self::tuple_of(entry));
                if let Some(lim) = limit {
                    if results.len() >= lim {
                        break 'threads;
                    }
                }
            }
        }

        Ok(results)
    }

    async fn put(
        &self,
        config: &CheckpointRef,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointRef> {
        if config.thread_id.is_empty() {
            return Err(CheckpointError::Invalid("thread_id is required".to_string()));
        }

        let mut storage = self.storage.write().await;
        let entries = storage.entry(config.thread_id.clone()).or_default();

        let stored_config = CheckpointRef {
            thread_id: config.thread_id.clone(),
            checkpoint_ns: config.checkpoint_ns.clone(),
            checkpoint_id: Some(checkpoint.id.clone()),
        };
        let parent_config = entries.last().map(|prev| prev.config.clone());

        entries.push(CheckpointEntry {
            checkpoint,
            metadata,
            config: stored_config.clone(),
            parent_config,
            writes: Vec::new(),
        });

        Ok(stored_config)
    }

    async fn put_writes(&self, config: &CheckpointRef, writes: Vec<PendingWrite>) -> Result<()> {
        let checkpoint_id = config
            .checkpoint_id
            .as_ref()
            .ok_or_else(|| CheckpointError::Invalid("checkpoint_id is required".to_string()))?;

        let mut storage = self.storage.write().await;
        let entries = storage
            .get_mut(&config.thread_id)
            .ok_or_else(|| CheckpointError::NotFound(config.thread_id.clone()))?;
        let entry = entries
            .iter_mut()
            .find(|e| &e.checkpoint.id == checkpoint_id)
            .ok_or_else(|| CheckpointError::NotFound(checkpoint_id.clone()))?;

        entry.writes.extend(writes);
        Ok(())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.storage.write().await.remove(thread_id);
        Ok(())
    }

    async fn copy_thread(&self, source_thread_id: &str, target_thread_id: &str) -> Result<()> {
        let mut storage = self.storage.write().await;
        let Some(entries) = storage.get(source_thread_id) else {
            // Nothing to copy; a thread with no history is valid.
            return Ok(());
        };

        let copied: Vec<CheckpointEntry> = entries
            .iter()
            .map(|entry| {
                let mut cloned = entry.clone();
                cloned.config.thread_id = target_thread_id.to_string();
                if let Some(parent) = cloned.parent_config.as_mut() {
                    parent.thread_id = target_thread_id.to_string();
                }
                cloned
            })
            .collect();

        storage.insert(target_thread_id.to_string(), copied);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.storage.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn checkpoint_with(values: &[(&str, serde_json::Value)]) -> Checkpoint {
        Checkpoint::new(
            values
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_put_and_get_latest() {
        let saver = InMemoryCheckpointer::new();
        let config = CheckpointRef::latest("thread-1");

        saver
            .put(&config, checkpoint_with(&[("x", json!(1))]), CheckpointMetadata::new())
            .await
            .unwrap();
        saver
            .put(&config, checkpoint_with(&[("x", json!(2))]), CheckpointMetadata::new())
            .await
            .unwrap();

        let tuple = saver.get_tuple(&config).await.unwrap().unwrap();
        assert_eq!(tuple.checkpoint.values.get("x"), Some(&json!(2)));
        assert!(tuple.parent_config.is_some());
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let saver = InMemoryCheckpointer::new();
        let config = CheckpointRef::latest("thread-1");

        let stored = saver
            .put(&config, checkpoint_with(&[("x", json!(1))]), CheckpointMetadata::new())
            .await
            .unwrap();
        saver
            .put(&config, checkpoint_with(&[("x", json!(2))]), CheckpointMetadata::new())
            .await
            .unwrap();

        let tuple = saver.get_tuple(&stored).await.unwrap().unwrap();
        assert_eq!(tuple.checkpoint.values.get("x"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_list_newest_first_with_limit() {
        let saver = InMemoryCheckpointer::new();
        let config = CheckpointRef::latest("thread-1");

        for i in 0..5 {
            saver
                .put(&config, checkpoint_with(&[("i", json!(i))]), CheckpointMetadata::new())
                .await
                .unwrap();
        }

        let tuples = saver.list(Some(&config), None, None, Some(3)).await.unwrap();
        assert_eq!(tuples.len(), 3);
        assert_eq!(tuples[0].checkpoint.values.get("i"), Some(&json!(4)));
        assert_eq!(tuples[2].checkpoint.values.get("i"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_list_before_cursor() {
        let saver = InMemoryCheckpointer::new();
        let config = CheckpointRef::latest("thread-1");

        let mut refs = Vec::new();
        for i in 0..4 {
            refs.push(
                saver
                    .put(&config, checkpoint_with(&[("i", json!(i))]), CheckpointMetadata::new())
                    .await
                    .unwrap(),
            );
        }

        let tuples = saver
            .list(Some(&config), None, Some(&refs[2]), None)
            .await
            .unwrap();
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[0].checkpoint.values.get("i"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_metadata_filter() {
        let saver = InMemoryCheckpointer::new();
        let config = CheckpointRef::latest("thread-1");

        saver
            .put(
                &config,
                checkpoint_with(&[("i", json!(0))]),
                CheckpointMetadata::new().with_extra("kind", json!("seed")),
            )
            .await
            .unwrap();
        saver
            .put(&config, checkpoint_with(&[("i", json!(1))]), CheckpointMetadata::new())
            .await
            .unwrap();

        let mut filter = HashMap::new();
        filter.insert("kind".to_string(), json!("seed"));
        let tuples = saver
            .list(Some(&config), Some(&filter), None, None)
            .await
            .unwrap();
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].checkpoint.values.get("i"), Some(&json!(0)));
    }

    #[tokio::test]
    async fn test_copy_thread_is_independent() {
        let saver = InMemoryCheckpointer::new();
        let source = CheckpointRef::latest("src");

        saver
            .put(&source, checkpoint_with(&[("x", json!(1))]), CheckpointMetadata::new())
            .await
            .unwrap();
        saver.copy_thread("src", "dst").await.unwrap();

        // Writing to the source must not affect the copy.
        saver
            .put(&source, checkpoint_with(&[("x", json!(2))]), CheckpointMetadata::new())
            .await
            .unwrap();

        let copied = saver
            .get_tuple(&CheckpointRef::latest("dst"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(copied.checkpoint.values.get("x"), Some(&json!(1)));
        assert_eq!(copied.config.thread_id, "dst");
    }

    #[tokio::test]
    async fn test_delete_thread() {
        let saver = InMemoryCheckpointer::new();
        let config = CheckpointRef::latest("thread-1");
        saver
            .put(&config, Checkpoint::empty(), CheckpointMetadata::new())
            .await
            .unwrap();

        saver.delete_thread("thread-1").await.unwrap();
        assert!(saver.get_tuple(&config).await.unwrap().is_none());
        assert_eq!(saver.thread_count().await, 0);
    }
}
