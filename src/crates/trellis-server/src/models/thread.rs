//! Thread aggregate: a durable container for conversational state and
//! checkpoints.

use super::Metadata;
use crate::graph::RunnableConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Derived thread status (see the status derivation rule in the thread store)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    /// No pending work
    #[default]
    Idle,
    /// At least one run is pending or executing
    Busy,
    /// The latest checkpoint paused mid-graph awaiting input
    Interrupted,
    /// The last run failed
    Error,
}

impl std::fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ThreadStatus::Idle => "idle",
            ThreadStatus::Busy => "busy",
            ThreadStatus::Interrupted => "interrupted",
            ThreadStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// A durable container for conversational state and checkpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    /// Unique thread identifier
    pub thread_id: Uuid,

    /// Derived status
    pub status: ThreadStatus,

    /// Configuration merged into runs on this thread
    #[serde(default)]
    pub config: RunnableConfig,

    /// Opaque metadata; may carry `graph_id` / `assistant_id` seeded by the
    /// first run
    #[serde(default)]
    pub metadata: Metadata,

    /// Materialised values of the latest checkpoint, absent before the
    /// first checkpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<HashMap<String, serde_json::Value>>,

    /// Interrupt payloads of the latest checkpoint, keyed by task id
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub interrupts: HashMap<String, Vec<serde_json::Value>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    /// Create an idle thread
    pub fn new(thread_id: Uuid, metadata: Metadata) -> Self {
        let now = Utc::now();
        Self {
            thread_id,
            status: ThreadStatus::Idle,
            config: RunnableConfig::default(),
            metadata,
            values: None,
            interrupts: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The graph bound to this thread, if any run has seeded it
    pub fn graph_id(&self) -> Option<&str> {
        self.metadata.get("graph_id").and_then(|v| v.as_str())
    }
}
