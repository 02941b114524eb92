//! Core checkpoint data structures
//!
//! A checkpoint is a persisted snapshot of a thread's graph state at one
//! step, addressed by `(thread_id, checkpoint_ns, checkpoint_id)`. The
//! hosting server inspects `values`, `next` and `tasks` (thread status is
//! derived from them); everything else is opaque payload owned by the graph
//! library.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Checkpoint ID type
pub type CheckpointId = String;

/// Pending write tuple: (task_id, channel, value)
pub type PendingWrite = (String, String, serde_json::Value);

/// Address of a checkpoint within a thread.
///
/// `checkpoint_id = None` addresses the latest checkpoint of the thread.
/// `checkpoint_ns` is empty for the root graph; subgraphs write under their
/// own namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRef {
    /// Thread the checkpoint belongs to
    pub thread_id: String,

    /// Checkpoint namespace (empty string for the root graph)
    #[serde(default)]
    pub checkpoint_ns: String,

    /// Specific checkpoint, or `None` for the latest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<CheckpointId>,
}

impl CheckpointRef {
    /// Address the latest checkpoint of a thread
    pub fn latest(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            checkpoint_ns: String::new(),
            checkpoint_id: None,
        }
    }

    /// Address a specific checkpoint of a thread
    pub fn exact(thread_id: impl Into<String>, checkpoint_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            checkpoint_ns: String::new(),
            checkpoint_id: Some(checkpoint_id.into()),
        }
    }

    /// Set the checkpoint namespace
    pub fn with_ns(mut self, ns: impl Into<String>) -> Self {
        self.checkpoint_ns = ns.into();
        self
    }
}

/// A task recorded in a checkpoint.
///
/// Tasks with a non-empty `interrupts` list represent points where the graph
/// paused for external input; the server projects them into the owning
/// thread's `interrupts` map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointTask {
    /// Task identifier
    pub id: String,

    /// Node name the task belongs to
    pub name: String,

    /// Interrupt payloads raised by this task
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interrupts: Vec<serde_json::Value>,

    /// Error recorded for this task, if it failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

/// State snapshot at a given point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The ID of the checkpoint (unique, monotonically increasing per thread)
    pub id: CheckpointId,

    /// The timestamp of the checkpoint
    pub ts: DateTime<Utc>,

    /// The materialised state values at the time of the checkpoint
    pub values: HashMap<String, serde_json::Value>,

    /// Nodes scheduled to execute next; non-empty means the graph paused
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next: Vec<String>,

    /// Tasks recorded at this checkpoint
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<CheckpointTask>,
}

impl Checkpoint {
    /// Create a new checkpoint with a fresh ID
    pub fn new(values: HashMap<String, serde_json::Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            values,
            next: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Create an empty checkpoint
    pub fn empty() -> Self {
        Self::new(HashMap::new())
    }

    /// Set the nodes scheduled next
    pub fn with_next(mut self, next: Vec<String>) -> Self {
        self.next = next;
        self
    }

    /// Set the recorded tasks
    pub fn with_tasks(mut self, tasks: Vec<CheckpointTask>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Whether this checkpoint left the graph paused mid-execution
    pub fn is_interrupted(&self) -> bool {
        !self.next.is_empty()
    }
}

/// Origin of a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Created from the input to an invocation
    Input,
    /// Created from inside the execution loop
    Loop,
    /// Created from a manual state update
    Update,
    /// Created as a copy of another checkpoint
    Fork,
}

/// Metadata associated with a checkpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// The source of the checkpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckpointSource>,

    /// Step number: -1 for the input checkpoint, 0.. for loop checkpoints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,

    /// Parent checkpoint IDs, keyed by checkpoint namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parents: Option<HashMap<String, CheckpointId>>,

    /// Additional custom metadata
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl CheckpointMetadata {
    /// Create empty metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source
    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the step number
    pub fn with_step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    /// Add custom metadata
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A checkpoint together with its address, metadata and parent link
#[derive(Debug, Clone)]
pub struct CheckpointTuple {
    /// Address of this checkpoint
    pub config: CheckpointRef,

    /// The checkpoint itself
    pub checkpoint: Checkpoint,

    /// Metadata associated with the checkpoint
    pub metadata: CheckpointMetadata,

    /// Address of the previous checkpoint, if any
    pub parent_config: Option<CheckpointRef>,
}

impl CheckpointTuple {
    /// Create a new tuple with no parent
    pub fn new(config: CheckpointRef, checkpoint: Checkpoint, metadata: CheckpointMetadata) -> Self {
        Self {
            config,
            checkpoint,
            metadata,
            parent_config: None,
        }
    }

    /// Set the parent address
    pub fn with_parent(mut self, parent: CheckpointRef) -> Self {
        self.parent_config = Some(parent);
        self
    }
}
