//! Request and query payloads of the HTTP surface
//!
//! Responses reuse the entity serialisations directly; only requests need
//! dedicated shapes.

use crate::bus::CancelAction;
use crate::graph::{RunnableConfig, StreamMode, Superstep};
use crate::models::{IfExists, IfNotExists, Metadata, MultitaskStrategy, RunStatus, ThreadStatus};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use trellis_checkpoint::CheckpointRef;
use uuid::Uuid;

/// Accepts both `"values"` and `["values", "updates"]`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

/// A checkpoint reference in a request body; the thread id comes from the
/// path
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckpointPointer {
    pub checkpoint_id: Option<String>,
    #[serde(default)]
    pub checkpoint_ns: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateAssistantRequest {
    pub assistant_id: Option<Uuid>,
    pub graph_id: String,
    #[serde(default)]
    pub config: RunnableConfig,
    #[serde(default)]
    pub metadata: Metadata,
    pub name: Option<String>,
    #[serde(default)]
    pub if_exists: IfExists,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchAssistantsRequest {
    pub graph_id: Option<String>,
    pub metadata: Option<Metadata>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PatchAssistantRequest {
    pub graph_id: Option<String>,
    pub config: Option<RunnableConfig>,
    pub metadata: Option<Metadata>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetLatestRequest {
    pub version: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateThreadRequest {
    pub thread_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub if_exists: IfExists,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchThreadsRequest {
    pub status: Option<ThreadStatus>,
    pub values: Option<Metadata>,
    pub metadata: Option<Metadata>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PatchThreadRequest {
    pub metadata: Metadata,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStateRequest {
    pub values: Value,
    pub as_node: Option<String>,
    pub checkpoint_id: Option<String>,
    pub checkpoint: Option<CheckpointPointer>,
}

impl UpdateStateRequest {
    /// The checkpoint id addressed by either field
    pub fn effective_checkpoint_id(&self) -> Option<&str> {
        self.checkpoint_id
            .as_deref()
            .or_else(|| self.checkpoint.as_ref()?.checkpoint_id.as_deref())
    }
}

/// Response body of a state update
#[derive(Debug, serde::Serialize)]
pub struct UpdateStateResponse {
    pub checkpoint: CheckpointRef,
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckpointStateRequest {
    pub checkpoint: Option<CheckpointPointer>,
    #[serde(default)]
    pub subgraphs: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubgraphsQuery {
    #[serde(default)]
    pub subgraphs: bool,
}

/// `before` cursor: a bare checkpoint id or a checkpoint object
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BeforeRef {
    Id(String),
    Pointer(CheckpointPointer),
}

impl BeforeRef {
    pub fn checkpoint_id(&self) -> Option<&str> {
        match self {
            BeforeRef::Id(id) => Some(id.as_str()),
            BeforeRef::Pointer(pointer) => pointer.checkpoint_id.as_deref(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryRequest {
    pub limit: Option<usize>,
    pub before: Option<BeforeRef>,
    pub metadata: Option<HashMap<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub before: Option<String>,
}

fn batch_if_exists_default() -> IfExists {
    IfExists::DoNothing
}

#[derive(Debug, Deserialize)]
pub struct BatchStateRequest {
    pub supersteps: Vec<Superstep>,
    pub thread_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default = "batch_if_exists_default")]
    pub if_exists: IfExists,
}

#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    pub assistant_id: Uuid,
    pub input: Option<Value>,
    pub command: Option<Value>,
    pub stream_mode: Option<OneOrMany<StreamMode>>,
    #[serde(default)]
    pub interrupt_before: Vec<String>,
    #[serde(default)]
    pub interrupt_after: Vec<String>,
    #[serde(default)]
    pub config: RunnableConfig,
    #[serde(default)]
    pub metadata: Metadata,
    pub multitask_strategy: Option<MultitaskStrategy>,
    #[serde(default)]
    pub if_not_exists: IfNotExists,
    #[serde(default)]
    pub after_seconds: i64,
    pub user_id: Option<String>,
}

impl CreateRunRequest {
    /// Field validation surfaced as 422
    pub fn validate(&self) -> Result<(), String> {
        if self.input.is_some() && self.command.is_some() {
            return Err("input and command are mutually exclusive".to_string());
        }
        if self.after_seconds < 0 {
            return Err("after_seconds must not be negative".to_string());
        }
        Ok(())
    }

    /// Requested stream modes, defaulting to `values`
    pub fn stream_modes(&self) -> Vec<StreamMode> {
        self.stream_mode
            .clone()
            .map(OneOrMany::into_vec)
            .filter(|modes| !modes.is_empty())
            .unwrap_or_else(StreamMode::default_modes)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RunListQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub status: Option<RunStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRunRequest {
    #[serde(default)]
    pub action: CancelAction,
}
