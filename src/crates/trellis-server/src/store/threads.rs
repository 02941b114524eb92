//! Thread store: CRUD, status derivation, and state delegation
//!
//! Thread status is a derived projection: `error` beats `interrupted`
//! (non-empty `next` on the reported checkpoint), which beats `busy` (any
//! pending run), which beats `idle`. The state sub-interface delegates to
//! the graph library bound to the thread and writes the re-read values back
//! into the thread after every mutation.

use super::StoreContext;
use crate::errors::{Result, ServerError};
use crate::graph::{Graph, RunnableConfig, StateSnapshot, Superstep};
use crate::models::{IfExists, Metadata, Thread, ThreadStatus};
use crate::utils::{json_contains, map_contains};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use trellis_checkpoint::{Checkpoint, CheckpointRef};
use uuid::Uuid;

/// Search parameters for threads
#[derive(Debug, Clone, Default)]
pub struct ThreadSearch {
    /// Restrict to threads in this status
    pub status: Option<ThreadStatus>,
    /// Subset filter over the thread's materialised values
    pub values: Option<Metadata>,
    /// Metadata subset filter
    pub metadata: Option<Metadata>,
    /// Page size
    pub limit: Option<usize>,
    /// Page offset
    pub offset: Option<usize>,
}

/// Store of thread aggregates
#[derive(Clone)]
pub struct ThreadStore {
    ctx: Arc<StoreContext>,
}

impl ThreadStore {
    pub(super) fn new(ctx: Arc<StoreContext>) -> Self {
        Self { ctx }
    }

    /// Search threads, newest first
    pub async fn search(&self, query: ThreadSearch) -> Vec<Thread> {
        self.ctx
            .persistence
            .read(|doc| {
                let mut matches: Vec<Thread> = doc
                    .threads
                    .values()
                    .filter(|thread| {
                        if let Some(status) = query.status {
                            if thread.status != status {
                                return false;
                            }
                        }
                        if let Some(filter) = &query.metadata {
                            if !map_contains(&thread.metadata, filter) {
                                return false;
                            }
                        }
                        if let Some(filter) = &query.values {
                            let Some(values) = &thread.values else {
                                return false;
                            };
                            if !filter.iter().all(|(key, expected)| {
                                values
                                    .get(key)
                                    .is_some_and(|actual| json_contains(actual, expected))
                            }) {
                                return false;
                            }
                        }
                        true
                    })
                    .cloned()
                    .collect();

                matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                matches
                    .into_iter()
                    .skip(query.offset.unwrap_or(0))
                    .take(query.limit.unwrap_or(20))
                    .collect()
            })
            .await
    }

    /// Fetch a thread
    pub async fn get(&self, thread_id: Uuid) -> Result<Thread> {
        self.ctx
            .persistence
            .read(|doc| doc.threads.get(&thread_id).cloned())
            .await
            .ok_or_else(|| ServerError::not_found("thread", thread_id))
    }

    /// Create a thread
    pub async fn put(
        &self,
        thread_id: Uuid,
        metadata: Metadata,
        if_exists: IfExists,
    ) -> Result<Thread> {
        self.ctx
            .persistence
            .apply(|doc| {
                if let Some(existing) = doc.threads.get(&thread_id) {
                    return match if_exists {
                        IfExists::Raise => Err(ServerError::Conflict(format!(
                            "thread {thread_id} already exists"
                        ))),
                        IfExists::DoNothing => Ok(existing.clone()),
                    };
                }

                let thread = Thread::new(thread_id, metadata);
                doc.threads.insert(thread_id, thread.clone());
                tracing::info!(thread_id = %thread_id, "Created thread");
                Ok(thread)
            })
            .await
    }

    /// Shallow-merge metadata into a thread
    pub async fn patch(&self, thread_id: Uuid, metadata: Metadata) -> Result<Thread> {
        self.ctx
            .persistence
            .apply(|doc| {
                let thread = doc
                    .threads
                    .get_mut(&thread_id)
                    .ok_or_else(|| ServerError::not_found("thread", thread_id))?;
                for (key, value) in metadata {
                    thread.metadata.insert(key, value);
                }
                thread.updated_at = Utc::now();
                Ok(thread.clone())
            })
            .await
    }

    /// Copy a thread: new id, inherited metadata/config/values, copied
    /// checkpoint history
    pub async fn copy(&self, thread_id: Uuid) -> Result<Thread> {
        let source = self.get(thread_id).await?;
        let target_id = Uuid::new_v4();

        self.ctx.checkpointer.copy(thread_id, target_id).await?;

        self.ctx
            .persistence
            .apply(|doc| {
                let now = Utc::now();
                let copy = Thread {
                    thread_id: target_id,
                    status: ThreadStatus::Idle,
                    config: source.config.clone(),
                    metadata: source.metadata.clone(),
                    values: source.values.clone(),
                    interrupts: source.interrupts.clone(),
                    created_at: now,
                    updated_at: now,
                };
                doc.threads.insert(target_id, copy.clone());
                tracing::info!(source = %thread_id, copy = %target_id, "Copied thread");
                Ok(copy)
            })
            .await
    }

    /// Delete a thread, cascading to its runs and checkpoints
    pub async fn delete(&self, thread_id: Uuid) -> Result<()> {
        let removed_runs = self
            .ctx
            .persistence
            .apply(|doc| {
                if doc.threads.remove(&thread_id).is_none() {
                    return Err(ServerError::not_found("thread", thread_id));
                }
                let run_ids = doc.run_ids_for_thread(thread_id);
                for run_id in &run_ids {
                    doc.remove_run(*run_id);
                }
                Ok(run_ids)
            })
            .await?;

        for run_id in removed_runs {
            // An executing run is told to stop before its bus state goes.
            if let Some(control) = self.ctx.bus.control(run_id) {
                control.fire(crate::bus::CancelAction::Interrupt);
            }
            self.ctx.bus.remove_run(run_id);
        }
        self.ctx.checkpointer.delete(thread_id).await?;
        tracing::info!(thread_id = %thread_id, "Deleted thread");
        Ok(())
    }

    /// Re-derive the thread's status from an optional checkpoint payload
    /// and an optional error.
    ///
    /// 1. error present → `error`
    /// 2. checkpoint has non-empty `next` → `interrupted`
    /// 3. any pending run on the thread → `busy`
    /// 4. otherwise → `idle`
    ///
    /// `values` is set from the checkpoint when present, else cleared;
    /// `interrupts` is the task-id → interrupts mapping of the checkpoint.
    pub async fn set_status(
        &self,
        thread_id: Uuid,
        checkpoint: Option<&Checkpoint>,
        error: Option<&str>,
    ) -> Result<Thread> {
        self.ctx
            .persistence
            .apply(|doc| {
                let has_pending = doc.thread_has_pending_run(thread_id);
                let thread = doc
                    .threads
                    .get_mut(&thread_id)
                    .ok_or_else(|| ServerError::not_found("thread", thread_id))?;

                thread.status = if error.is_some() {
                    ThreadStatus::Error
                } else if checkpoint.is_some_and(|c| c.is_interrupted()) {
                    ThreadStatus::Interrupted
                } else if has_pending {
                    ThreadStatus::Busy
                } else {
                    ThreadStatus::Idle
                };

                thread.values = checkpoint.map(|c| c.values.clone());
                thread.interrupts = checkpoint
                    .map(|c| {
                        c.tasks
                            .iter()
                            .map(|task| (task.id.clone(), task.interrupts.clone()))
                            .collect()
                    })
                    .unwrap_or_default();
                if let Some(error) = error {
                    thread
                        .metadata
                        .insert("error".to_string(), json!(error));
                }
                thread.updated_at = Utc::now();
                Ok(thread.clone())
            })
            .await
    }

    /// Refresh the thread projection from the latest stored checkpoint
    pub async fn refresh_from_checkpoint(&self, thread_id: Uuid) -> Result<Thread> {
        let latest = self.ctx.checkpointer.latest(thread_id).await?;
        self.set_status(thread_id, latest.map(|t| t.checkpoint).as_ref(), None)
            .await
    }

    fn state_config(thread: &Thread, checkpoint_id: Option<&str>) -> RunnableConfig {
        let mut config = thread.config.clone();
        config.set_configurable("thread_id", json!(thread.thread_id.to_string()));
        if let Some(checkpoint_id) = checkpoint_id {
            config.set_configurable("checkpoint_id", json!(checkpoint_id));
        }
        config
    }

    fn graph_for(&self, thread: &Thread) -> Result<Arc<dyn Graph>> {
        let graph_id = thread.graph_id().ok_or_else(|| {
            ServerError::BadRequest(format!(
                "thread {} has no graph bound; launch a run first",
                thread.thread_id
            ))
        })?;
        self.ctx.registry.resolve(graph_id)
    }

    /// Read the thread's state snapshot. A thread with no bound graph
    /// reports its materialised values in an otherwise empty snapshot.
    pub async fn get_state(
        &self,
        thread_id: Uuid,
        checkpoint_id: Option<&str>,
        subgraphs: bool,
    ) -> Result<StateSnapshot> {
        let thread = self.get(thread_id).await?;
        if thread.graph_id().is_none() {
            let mut snapshot = StateSnapshot::empty(thread_id.to_string());
            snapshot.values = thread.values.clone().unwrap_or_default();
            return Ok(snapshot);
        }

        let graph = self.graph_for(&thread)?;
        graph
            .get_state(Self::state_config(&thread, checkpoint_id), subgraphs)
            .await
    }

    /// Apply a single state update through the graph, then refresh the
    /// thread projection
    pub async fn update_state(
        &self,
        thread_id: Uuid,
        values: Value,
        as_node: Option<String>,
        checkpoint_id: Option<&str>,
    ) -> Result<CheckpointRef> {
        let thread = self.get(thread_id).await?;
        let graph = self.graph_for(&thread)?;
        let stored = graph
            .update_state(Self::state_config(&thread, checkpoint_id), values, as_node)
            .await?;
        self.refresh_from_checkpoint(thread_id).await?;
        Ok(stored)
    }

    /// Apply a sequence of supersteps through the graph, then refresh the
    /// thread projection
    pub async fn bulk_update_state(
        &self,
        thread_id: Uuid,
        supersteps: Vec<Superstep>,
    ) -> Result<Thread> {
        let thread = self.get(thread_id).await?;
        let graph = self.graph_for(&thread)?;
        graph
            .bulk_update_state(Self::state_config(&thread, None), supersteps)
            .await?;
        self.refresh_from_checkpoint(thread_id).await
    }

    /// Historical state snapshots, newest first. A thread with no bound
    /// graph has no history.
    pub async fn state_history(
        &self,
        thread_id: Uuid,
        limit: Option<usize>,
        before: Option<&str>,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<Vec<StateSnapshot>> {
        let thread = self.get(thread_id).await?;
        if thread.graph_id().is_none() {
            return Ok(Vec::new());
        }

        let graph = self.graph_for(&thread)?;
        let before = before.map(|id| CheckpointRef::exact(thread_id.to_string(), id));
        graph
            .get_state_history(Self::state_config(&thread, None), limit, before, metadata)
            .await
    }
}
