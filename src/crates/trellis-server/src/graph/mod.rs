//! The opaque graph-library interface
//!
//! The control plane treats graph execution as an external concern reached
//! through exactly six operations: `invoke`, `stream`, `get_state`,
//! `update_state`, `bulk_update_state` and `get_state_history`. Graph
//! implementations receive the checkpointer at construction and own all
//! checkpoint payload semantics; none of their internal types leak into the
//! server's data model.

mod builtin;
mod config;
mod registry;

pub use builtin::EchoGraph;
pub use config::RunnableConfig;
pub use registry::{GraphDeps, GraphFactory, GraphRegistry};

use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use trellis_checkpoint::{CheckpointMetadata, CheckpointRef, CheckpointTask};

/// What a run feeds into the graph
#[derive(Debug, Clone)]
pub enum GraphInput {
    /// Fresh input values
    Input(Value),
    /// A command addressed to a paused graph (resume payload, goto, etc.)
    Command(Value),
    /// Resume from the latest checkpoint with no new input
    Resume,
}

/// Output channels a stream subscriber can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Complete state values after each superstep
    Values,
    /// Per-node deltas
    Updates,
    /// Message tokens
    Messages,
    /// Debug events
    Debug,
    /// Graph-defined custom payloads
    Custom,
    /// Raw execution events
    Events,
}

impl StreamMode {
    /// Stream-mode topic name on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamMode::Values => "values",
            StreamMode::Updates => "updates",
            StreamMode::Messages => "messages",
            StreamMode::Debug => "debug",
            StreamMode::Custom => "custom",
            StreamMode::Events => "events",
        }
    }

    /// The default mode set for runs that do not request any
    pub fn default_modes() -> Vec<StreamMode> {
        vec![StreamMode::Values]
    }
}

/// One chunk yielded by a streaming graph invocation
#[derive(Debug, Clone)]
pub struct StreamChunk {
    /// The mode this chunk belongs to
    pub mode: StreamMode,
    /// Chunk payload
    pub data: Value,
}

/// Stream of graph output chunks
pub type GraphStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// A thread-state snapshot as reported by the graph library
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Materialised state values
    pub values: HashMap<String, Value>,

    /// Nodes scheduled next; non-empty when the graph is paused
    #[serde(default)]
    pub next: Vec<String>,

    /// Tasks recorded at this step
    #[serde(default)]
    pub tasks: Vec<CheckpointTask>,

    /// Checkpoint metadata
    #[serde(default)]
    pub metadata: CheckpointMetadata,

    /// When the snapshot was recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Address of the underlying checkpoint
    pub checkpoint: CheckpointRef,

    /// Address of the previous checkpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_checkpoint: Option<CheckpointRef>,
}

impl StateSnapshot {
    /// An empty snapshot for threads with no checkpoint history
    pub fn empty(thread_id: impl Into<String>) -> Self {
        Self {
            values: HashMap::new(),
            next: Vec::new(),
            tasks: Vec::new(),
            metadata: CheckpointMetadata::default(),
            created_at: None,
            checkpoint: CheckpointRef::latest(thread_id),
            parent_checkpoint: None,
        }
    }
}

/// One state update inside a superstep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateUpdate {
    /// Values to apply
    pub values: Value,

    /// Node the update is attributed to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_node: Option<String>,
}

/// A batch of state updates applied as one logical step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Superstep {
    /// Updates applied within this step
    pub updates: Vec<StateUpdate>,
}

/// The six-operation surface of an installed graph
#[async_trait]
pub trait Graph: Send + Sync {
    /// Execute to completion, returning the final state values
    async fn invoke(&self, input: GraphInput, config: RunnableConfig) -> Result<Value>;

    /// Execute while yielding chunks for the requested stream modes
    async fn stream(
        &self,
        input: GraphInput,
        config: RunnableConfig,
        modes: &[StreamMode],
    ) -> Result<GraphStream>;

    /// Read the state snapshot addressed by the config's checkpoint
    async fn get_state(&self, config: RunnableConfig, subgraphs: bool) -> Result<StateSnapshot>;

    /// Apply a single state update, returning the new checkpoint address
    async fn update_state(
        &self,
        config: RunnableConfig,
        values: Value,
        as_node: Option<String>,
    ) -> Result<CheckpointRef>;

    /// Apply a sequence of supersteps, returning the final checkpoint address
    async fn bulk_update_state(
        &self,
        config: RunnableConfig,
        supersteps: Vec<Superstep>,
    ) -> Result<CheckpointRef>;

    /// List historical state snapshots, newest first
    async fn get_state_history(
        &self,
        config: RunnableConfig,
        limit: Option<usize>,
        before: Option<CheckpointRef>,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<Vec<StateSnapshot>>;
}
