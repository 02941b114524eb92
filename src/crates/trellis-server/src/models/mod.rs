//! Domain model: assistants, threads, runs
//!
//! These are the aggregate shapes persisted in the server's document store.
//! Assistants and threads are independent aggregates; a run belongs to one
//! thread and one assistant.

mod assistant;
mod run;
mod thread;

pub use assistant::{Assistant, AssistantVersion};
pub use run::{MultitaskStrategy, Run, RunKwargs, RunStatus};
pub use thread::{Thread, ThreadStatus};

use serde::{Deserialize, Serialize};

/// Opaque metadata mapping attached to every aggregate
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Conflict policy for create operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IfExists {
    /// Fail with a conflict when the entity already exists
    #[default]
    Raise,
    /// Return the existing entity unmodified
    DoNothing,
}

/// Policy for resolving a referenced thread that does not exist yet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IfNotExists {
    /// Fail with not-found
    #[default]
    Reject,
    /// Create the thread implicitly
    Create,
}
