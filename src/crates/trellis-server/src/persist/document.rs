//! The aggregate document
//!
//! One JSON document holds every control-plane aggregate: assistants and
//! their version history, threads, runs, and the per-run retry counters.
//! All mutation goes through [`super::Persistence`], which serialises
//! access process-wide.

use crate::models::{Assistant, AssistantVersion, Run, RunStatus, Thread};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The persisted aggregate document
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AggregateDoc {
    /// Live assistants by id
    #[serde(default)]
    pub assistants: HashMap<Uuid, Assistant>,

    /// Immutable assistant version records
    #[serde(default)]
    pub assistant_versions: Vec<AssistantVersion>,

    /// Threads by id
    #[serde(default)]
    pub threads: HashMap<Uuid, Thread>,

    /// Runs by id
    #[serde(default)]
    pub runs: HashMap<Uuid, Run>,

    /// Delivery attempts per run, incremented each time the picker hands a
    /// run to the executor
    #[serde(default)]
    pub retry_counter: HashMap<Uuid, u32>,
}

impl AggregateDoc {
    /// Runs belonging to a thread
    pub fn runs_for_thread(&self, thread_id: Uuid) -> impl Iterator<Item = &Run> {
        self.runs.values().filter(move |run| run.thread_id == thread_id)
    }

    /// Pending runs belonging to a thread
    pub fn pending_runs_for_thread(&self, thread_id: Uuid) -> Vec<Run> {
        let mut pending: Vec<Run> = self
            .runs_for_thread(thread_id)
            .filter(|run| run.status == RunStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        pending
    }

    /// Whether any run on the thread is still pending
    pub fn thread_has_pending_run(&self, thread_id: Uuid) -> bool {
        self.runs_for_thread(thread_id)
            .any(|run| run.status == RunStatus::Pending)
    }

    /// Run ids belonging to an assistant
    pub fn run_ids_for_assistant(&self, assistant_id: Uuid) -> Vec<Uuid> {
        self.runs
            .values()
            .filter(|run| run.assistant_id == assistant_id)
            .map(|run| run.run_id)
            .collect()
    }

    /// Run ids belonging to a thread
    pub fn run_ids_for_thread(&self, thread_id: Uuid) -> Vec<Uuid> {
        self.runs_for_thread(thread_id).map(|run| run.run_id).collect()
    }

    /// Version records of an assistant, newest first
    pub fn versions_of(&self, assistant_id: Uuid) -> Vec<AssistantVersion> {
        let mut versions: Vec<AssistantVersion> = self
            .assistant_versions
            .iter()
            .filter(|v| v.assistant_id == assistant_id)
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        versions
    }

    /// Remove a run and its retry counter
    pub fn remove_run(&mut self, run_id: Uuid) -> Option<Run> {
        self.retry_counter.remove(&run_id);
        self.runs.remove(&run_id)
    }
}
