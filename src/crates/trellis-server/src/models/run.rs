//! Run aggregate: one execution of an assistant against a thread.

use super::Metadata;
use crate::graph::{RunnableConfig, StreamMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Run lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Created, waiting for the picker
    #[default]
    Pending,
    /// Currently executing
    Running,
    /// Failed permanently
    Error,
    /// Completed
    Success,
    /// Timed out after exhausting retries
    Timeout,
    /// Cancelled with the interrupt action
    Interrupted,
}

impl RunStatus {
    /// Whether the run can still make progress
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Pending | RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Error => "error",
            RunStatus::Success => "success",
            RunStatus::Timeout => "timeout",
            RunStatus::Interrupted => "interrupted",
        };
        write!(f, "{s}")
    }
}

/// Policy for launching a run against a thread that already has pending runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultitaskStrategy {
    /// Refuse the new run
    #[default]
    Reject,
    /// Cancel the inflight runs (rolling back unstarted ones) and proceed
    Rollback,
    /// Interrupt the inflight runs and proceed
    Interrupt,
    /// Queue the new run behind the inflight ones
    Enqueue,
}

/// Execution arguments captured at run creation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunKwargs {
    /// Graph input; mutually exclusive with `command`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,

    /// Resume command; mutually exclusive with `input`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<serde_json::Value>,

    /// Stream modes requested by the creator
    #[serde(default = "StreamMode::default_modes")]
    pub stream_mode: Vec<StreamMode>,

    /// Nodes to pause before
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interrupt_before: Vec<String>,

    /// Nodes to pause after
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interrupt_after: Vec<String>,

    /// Fully merged configuration handed to the graph
    #[serde(default)]
    pub config: RunnableConfig,
}

/// One execution of an assistant against a thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique run identifier
    pub run_id: Uuid,

    /// Owning thread
    pub thread_id: Uuid,

    /// Assistant executed by this run
    pub assistant_id: Uuid,

    /// Lifecycle status
    pub status: RunStatus,

    /// Execution arguments
    pub kwargs: RunKwargs,

    /// Policy applied when the thread was busy at creation
    pub multitask_strategy: MultitaskStrategy,

    /// Opaque metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Scheduled execution time; in the future for delayed runs
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Whether the picker may hand this run to the executor at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == RunStatus::Pending && self.created_at <= now
    }
}
