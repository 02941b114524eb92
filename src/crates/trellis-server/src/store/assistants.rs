//! Assistant store: CRUD and versioning
//!
//! Every mutating patch records a new immutable [`AssistantVersion`];
//! `set_latest` copies a named version back into the live assistant.
//! Deleting an assistant cascades to its version records and to all runs
//! referencing it.

use super::StoreContext;
use crate::errors::{Result, ServerError};
use crate::graph::RunnableConfig;
use crate::models::{Assistant, AssistantVersion, IfExists, Metadata};
use crate::utils::map_contains;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Search parameters for assistants
#[derive(Debug, Clone, Default)]
pub struct AssistantSearch {
    /// Restrict to assistants bound to this graph
    pub graph_id: Option<String>,
    /// Metadata subset filter
    pub metadata: Option<Metadata>,
    /// Page size
    pub limit: Option<usize>,
    /// Page offset
    pub offset: Option<usize>,
}

/// Creation parameters for an assistant
#[derive(Debug, Clone)]
pub struct PutAssistant {
    /// Assistant id (caller-chosen or freshly generated)
    pub assistant_id: Uuid,
    /// Graph the assistant executes
    pub graph_id: String,
    /// Default configuration
    pub config: RunnableConfig,
    /// Opaque metadata
    pub metadata: Metadata,
    /// Display name; defaults to `graph_id`
    pub name: Option<String>,
    /// Conflict policy
    pub if_exists: IfExists,
}

/// Patch parameters; every present field replaces the live value except
/// `metadata`, which shallow-merges
#[derive(Debug, Clone, Default)]
pub struct AssistantPatch {
    pub graph_id: Option<String>,
    pub config: Option<RunnableConfig>,
    pub metadata: Option<Metadata>,
    pub name: Option<String>,
}

/// Store of assistant aggregates
#[derive(Clone)]
pub struct AssistantStore {
    ctx: Arc<StoreContext>,
}

impl AssistantStore {
    pub(super) fn new(ctx: Arc<StoreContext>) -> Self {
        Self { ctx }
    }

    /// Search assistants, newest first
    pub async fn search(&self, query: AssistantSearch) -> Vec<Assistant> {
        self.ctx
            .persistence
            .read(|doc| {
                let mut matches: Vec<Assistant> = doc
                    .assistants
                    .values()
                    .filter(|assistant| {
                        if let Some(graph_id) = &query.graph_id {
                            if &assistant.graph_id != graph_id {
                                return false;
                            }
                        }
                        if let Some(filter) = &query.metadata {
                            if !map_contains(&assistant.metadata, filter) {
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

    /// Fetch an assistant
    pub async fn get(&self, assistant_id: Uuid) -> Result<Assistant> {
        self.ctx
            .persistence
            .read(|doc| doc.assistants.get(&assistant_id).cloned())
            .await
            .ok_or_else(|| ServerError::not_found("assistant", assistant_id))
    }

    /// Create an assistant (version 1)
    pub async fn put(&self, req: PutAssistant) -> Result<Assistant> {
        self.ctx
            .persistence
            .apply(|doc| {
                if let Some(existing) = doc.assistants.get(&req.assistant_id) {
                    return match req.if_exists {
                        IfExists::Raise => Err(ServerError::Conflict(format!(
                            "assistant {} already exists",
                            req.assistant_id
                        ))),
                        IfExists::DoNothing => Ok(existing.clone()),
                    };
                }

                let assistant = Assistant::new(
                    req.assistant_id,
                    req.graph_id,
                    req.config,
                    req.metadata,
                    req.name,
                );
                doc.assistant_versions.push(assistant.snapshot());
                doc.assistants.insert(assistant.assistant_id, assistant.clone());
                tracing::info!(assistant_id = %assistant.assistant_id, graph_id = %assistant.graph_id, "Created assistant");
                Ok(assistant)
            })
            .await
    }

    /// Patch an assistant, creating a new version
    pub async fn patch(&self, assistant_id: Uuid, patch: AssistantPatch) -> Result<Assistant> {
        self.ctx
            .persistence
            .apply(|doc| {
                let max_version = doc
                    .versions_of(assistant_id)
                    .first()
                    .map(|v| v.version)
                    .unwrap_or(0);
                let assistant = doc
                    .assistants
                    .get_mut(&assistant_id)
                    .ok_or_else(|| ServerError::not_found("assistant", assistant_id))?;

                if let Some(graph_id) = patch.graph_id {
                    assistant.graph_id = graph_id;
                }
                if let Some(config) = patch.config {
                    assistant.config = config;
                }
                if let Some(metadata) = patch.metadata {
                    for (key, value) in metadata {
                        assistant.metadata.insert(key, value);
                    }
                }
                if let Some(name) = patch.name {
                    assistant.name = name;
                }

                assistant.version = max_version + 1;
                assistant.updated_at = Utc::now();
                let snapshot = assistant.snapshot();
                let patched = assistant.clone();
                doc.assistant_versions.push(snapshot);
                Ok(patched)
            })
            .await
    }

    /// Delete an assistant, cascading to its versions and runs
    pub async fn delete(&self, assistant_id: Uuid) -> Result<()> {
        let removed_runs = self
            .ctx
            .persistence
            .apply(|doc| {
                if doc.assistants.remove(&assistant_id).is_none() {
                    return Err(ServerError::not_found("assistant", assistant_id));
                }
                doc.assistant_versions
                    .retain(|v| v.assistant_id != assistant_id);

                let run_ids = doc.run_ids_for_assistant(assistant_id);
                for run_id in &run_ids {
                    doc.remove_run(*run_id);
                }
                Ok(run_ids)
            })
            .await?;

        for run_id in removed_runs {
            self.ctx.bus.remove_run(run_id);
        }
        tracing::info!(assistant_id = %assistant_id, "Deleted assistant");
        Ok(())
    }

    /// Copy a named version into the live assistant
    pub async fn set_latest(&self, assistant_id: Uuid, version: u32) -> Result<Assistant> {
        self.ctx
            .persistence
            .apply(|doc| {
                let snapshot = doc
                    .assistant_versions
                    .iter()
                    .find(|v| v.assistant_id == assistant_id && v.version == version)
                    .cloned()
                    .ok_or_else(|| {
                        ServerError::NotFound(format!(
                            "assistant {assistant_id} version {version}"
                        ))
                    })?;
                let assistant = doc
                    .assistants
                    .get_mut(&assistant_id)
                    .ok_or_else(|| ServerError::not_found("assistant", assistant_id))?;

                assistant.graph_id = snapshot.graph_id;
                assistant.config = snapshot.config;
                assistant.metadata = snapshot.metadata;
                assistant.name = snapshot.name;
                assistant.version = snapshot.version;
                assistant.updated_at = Utc::now();
                Ok(assistant.clone())
            })
            .await
    }

    /// Version records of an assistant, newest first
    pub async fn get_versions(&self, assistant_id: Uuid) -> Result<Vec<AssistantVersion>> {
        let versions = self
            .ctx
            .persistence
            .read(|doc| doc.versions_of(assistant_id))
            .await;
        if versions.is_empty() {
            return Err(ServerError::not_found("assistant", assistant_id));
        }
        Ok(versions)
    }
}
