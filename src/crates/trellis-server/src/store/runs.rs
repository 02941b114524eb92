//! Run store: creation, picking, joining, cancellation
//!
//! Run creation reserves a pending run against a (possibly implicit)
//! thread and reports the thread's inflight runs so the boundary can apply
//! the multitask strategy. The picker hands due pending runs to the
//! executor strictly FIFO by scheduled time. Joining subscribes to the
//! run's queue until the `control:done` sentinel or a terminal run status.

use super::StoreContext;
use crate::bus::{CancelAction, CancelSignal, RunControl, StreamMessage};
use crate::errors::{Result, ServerError};
use crate::graph::{RunnableConfig, StreamMode};
use crate::models::{
    IfNotExists, Metadata, MultitaskStrategy, Run, RunKwargs, RunStatus, Thread, ThreadStatus,
};
use crate::utils::map_contains;
use chrono::{Duration as ChronoDuration, Utc};
use futures::Stream;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// How long a join waits on the queue before re-checking the run's status
const JOIN_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Creation parameters for a run
#[derive(Debug, Clone)]
pub struct RunCreate {
    /// Run id (caller-chosen or freshly generated)
    pub run_id: Uuid,
    /// Thread to execute against
    pub thread_id: Uuid,
    /// Assistant to execute
    pub assistant_id: Uuid,
    /// Graph input; mutually exclusive with `command`
    pub input: Option<Value>,
    /// Resume command; mutually exclusive with `input`
    pub command: Option<Value>,
    /// Requested stream modes
    pub stream_mode: Vec<StreamMode>,
    /// Nodes to pause before
    pub interrupt_before: Vec<String>,
    /// Nodes to pause after
    pub interrupt_after: Vec<String>,
    /// Per-run config overlay
    pub config: RunnableConfig,
    /// Opaque metadata
    pub metadata: Metadata,
    /// Policy when the thread is busy
    pub multitask_strategy: MultitaskStrategy,
    /// Policy when the thread does not exist
    pub if_not_exists: IfNotExists,
    /// Delay before the run becomes due
    pub after_seconds: i64,
    /// Caller identity folded into the configurable mapping
    pub user_id: Option<String>,
    /// When set and the thread has inflight runs, do not insert; return the
    /// inflight runs as-is for the caller to apply its strategy
    pub prevent_insert_in_inflight: bool,
}

impl RunCreate {
    /// Minimal creation request with defaults for everything optional
    pub fn new(thread_id: Uuid, assistant_id: Uuid) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            thread_id,
            assistant_id,
            input: None,
            command: None,
            stream_mode: StreamMode::default_modes(),
            interrupt_before: Vec::new(),
            interrupt_after: Vec::new(),
            config: RunnableConfig::default(),
            metadata: Metadata::new(),
            multitask_strategy: MultitaskStrategy::default(),
            if_not_exists: IfNotExists::default(),
            after_seconds: 0,
            user_id: None,
            prevent_insert_in_inflight: false,
        }
    }
}

/// Search parameters for runs on a thread
#[derive(Debug, Clone, Default)]
pub struct RunSearch {
    /// Restrict to runs in this status
    pub status: Option<RunStatus>,
    /// Metadata subset filter
    pub metadata: Option<Metadata>,
    /// Page size
    pub limit: Option<usize>,
    /// Page offset
    pub offset: Option<usize>,
}

/// A pending run handed to the executor
pub struct PickedRun {
    /// Snapshot of the run at pick time
    pub run: Run,
    /// Delivery attempt number (1-based)
    pub attempt: u32,
    /// Cancellation handle locked in the bus for this run
    pub control: RunControl,
}

/// Options for joining a run's stream
#[derive(Default)]
pub struct JoinOptions {
    /// End silently instead of erroring when the run does not exist
    pub ignore_not_found: bool,
    /// Cancel the run with `interrupt` when the subscriber goes away
    /// before the stream finishes
    pub cancel_on_disconnect: bool,
    /// External subscriber-side cancel token
    pub cancel: Option<CancelSignal>,
}

/// Store of run aggregates
#[derive(Clone)]
pub struct RunStore {
    ctx: Arc<StoreContext>,
}

impl RunStore {
    pub(super) fn new(ctx: Arc<StoreContext>) -> Self {
        Self { ctx }
    }

    /// Create a run.
    ///
    /// Returns `[new_run, ...inflight]` on insert, or the inflight runs
    /// as-is when `prevent_insert_in_inflight` stopped the insert. The
    /// caller applies the multitask strategy to the tail.
    pub async fn put(&self, req: RunCreate) -> Result<Vec<Run>> {
        if req.input.is_some() && req.command.is_some() {
            return Err(ServerError::BadRequest(
                "a run takes either input or command, not both".to_string(),
            ));
        }

        self.ctx
            .persistence
            .apply(|doc| {
                let assistant = doc
                    .assistants
                    .get(&req.assistant_id)
                    .cloned()
                    .ok_or_else(|| ServerError::not_found("assistant", req.assistant_id))?;

                // Resolve (or implicitly create) the thread.
                if !doc.threads.contains_key(&req.thread_id) {
                    match req.if_not_exists {
                        IfNotExists::Reject => {
                            return Err(ServerError::not_found("thread", req.thread_id))
                        }
                        IfNotExists::Create => {
                            let mut metadata = Metadata::new();
                            metadata.insert(
                                "graph_id".to_string(),
                                json!(assistant.graph_id.clone()),
                            );
                            metadata.insert(
                                "assistant_id".to_string(),
                                json!(assistant.assistant_id.to_string()),
                            );
                            let mut thread = Thread::new(req.thread_id, metadata);
                            thread.status = ThreadStatus::Busy;
                            thread.config = assistant.config.merged_with(&req.config);
                            doc.threads.insert(req.thread_id, thread);
                            tracing::debug!(thread_id = %req.thread_id, "Implicitly created thread");
                        }
                    }
                } else {
                    let thread = doc.threads.get_mut(&req.thread_id).expect("checked above");
                    if thread.status != ThreadStatus::Busy {
                        thread.status = ThreadStatus::Busy;
                        thread.config = assistant
                            .config
                            .merged_with(&thread.config)
                            .merged_with(&req.config);
                        thread.updated_at = Utc::now();
                    }
                }

                let inflight = doc.pending_runs_for_thread(req.thread_id);
                if req.prevent_insert_in_inflight && !inflight.is_empty() {
                    return Ok(inflight);
                }

                let thread = doc.threads.get(&req.thread_id).expect("resolved above");

                // Configurable layering: assistant, then thread, then the
                // caller's config; synthesized identifiers override all.
                let mut config = assistant
                    .config
                    .merged_with(&thread.config)
                    .merged_with(&req.config);
                config.set_configurable("run_id", json!(req.run_id.to_string()));
                config.set_configurable("thread_id", json!(req.thread_id.to_string()));
                config.set_configurable("graph_id", json!(assistant.graph_id.clone()));
                config.set_configurable(
                    "assistant_id",
                    json!(assistant.assistant_id.to_string()),
                );
                if let Some(user_id) = &req.user_id {
                    config.set_configurable("user_id", json!(user_id));
                }

                let now = Utc::now();
                let run = Run {
                    run_id: req.run_id,
                    thread_id: req.thread_id,
                    assistant_id: req.assistant_id,
                    status: RunStatus::Pending,
                    kwargs: RunKwargs {
                        input: req.input.clone(),
                        command: req.command.clone(),
                        stream_mode: req.stream_mode.clone(),
                        interrupt_before: req.interrupt_before.clone(),
                        interrupt_after: req.interrupt_after.clone(),
                        config,
                    },
                    multitask_strategy: req.multitask_strategy,
                    metadata: req.metadata.clone(),
                    created_at: now + ChronoDuration::seconds(req.after_seconds),
                    updated_at: now,
                };
                doc.runs.insert(run.run_id, run.clone());
                tracing::info!(
                    run_id = %run.run_id,
                    thread_id = %run.thread_id,
                    strategy = ?run.multitask_strategy,
                    "Created run"
                );

                let mut result = vec![run];
                result.extend(inflight);
                Ok(result)
            })
            .await
    }

    /// Pick the due pending runs, FIFO by scheduled time with run-id
    /// tiebreak. Each picked run is locked in the bus and has its retry
    /// counter bumped before the persistence lock is released.
    pub async fn next(&self) -> Vec<PickedRun> {
        let now = Utc::now();
        let mut doc = self.ctx.persistence.begin().await;

        let mut due: Vec<Run> = doc
            .runs
            .values()
            .filter(|run| run.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });

        let mut picked = Vec::new();
        for run in due {
            if self.ctx.bus.is_locked(run.run_id) {
                continue;
            }
            let control = self.ctx.bus.lock(run.run_id);
            let attempt = {
                let counter = doc.retry_counter.entry(run.run_id).or_insert(0);
                *counter += 1;
                *counter
            };
            picked.push(PickedRun {
                run,
                attempt,
                control,
            });
        }
        picked
    }

    /// Fetch a run, verifying thread ownership when a thread id is given
    pub async fn get(&self, run_id: Uuid, thread_id: Option<Uuid>) -> Result<Run> {
        let run = self
            .ctx
            .persistence
            .read(|doc| doc.runs.get(&run_id).cloned())
            .await
            .ok_or_else(|| ServerError::not_found("run", run_id))?;
        if let Some(thread_id) = thread_id {
            if run.thread_id != thread_id {
                return Err(ServerError::not_found("run", run_id));
            }
        }
        Ok(run)
    }

    /// Search the runs of a thread, newest first
    pub async fn search(&self, thread_id: Uuid, query: RunSearch) -> Result<Vec<Run>> {
        self.ctx
            .persistence
            .read(|doc| {
                if !doc.threads.contains_key(&thread_id) {
                    return Err(ServerError::not_found("thread", thread_id));
                }
                let mut matches: Vec<Run> = doc
                    .runs_for_thread(thread_id)
                    .filter(|run| {
                        if let Some(status) = query.status {
                            if run.status != status {
                                return false;
                            }
                        }
                        if let Some(filter) = &query.metadata {
                            if !map_contains(&run.metadata, filter) {
                                return false;
                            }
                        }
                        true
                    })
                    .cloned()
                    .collect();

                matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                Ok(matches
                    .into_iter()
                    .skip(query.offset.unwrap_or(0))
                    .take(query.limit.unwrap_or(20))
                    .collect())
            })
            .await
    }

    /// Update a run's status
    pub async fn set_status(&self, run_id: Uuid, status: RunStatus) -> Result<Run> {
        self.ctx
            .persistence
            .apply(|doc| {
                let run = doc
                    .runs
                    .get_mut(&run_id)
                    .ok_or_else(|| ServerError::not_found("run", run_id))?;
                run.status = status;
                run.updated_at = Utc::now();
                Ok(run.clone())
            })
            .await
    }

    /// Reschedule a transiently failed run for a later attempt
    pub async fn reschedule(&self, run_id: Uuid, delay: Duration) -> Result<Run> {
        self.ctx
            .persistence
            .apply(|doc| {
                let run = doc
                    .runs
                    .get_mut(&run_id)
                    .ok_or_else(|| ServerError::not_found("run", run_id))?;
                run.status = RunStatus::Pending;
                run.created_at = Utc::now()
                    + ChronoDuration::from_std(delay)
                        .unwrap_or_else(|_| ChronoDuration::seconds(0));
                run.updated_at = Utc::now();
                Ok(run.clone())
            })
            .await
    }

    /// Delete a run, dropping its bus state and retry counter
    pub async fn delete(&self, run_id: Uuid, thread_id: Option<Uuid>) -> Result<()> {
        self.ctx
            .persistence
            .apply(|doc| {
                let run = doc
                    .runs
                    .get(&run_id)
                    .ok_or_else(|| ServerError::not_found("run", run_id))?;
                if let Some(thread_id) = thread_id {
                    if run.thread_id != thread_id {
                        return Err(ServerError::not_found("run", run_id));
                    }
                }
                doc.remove_run(run_id);
                Ok(())
            })
            .await?;

        // Wake any joiners before the queue goes away; they hold the Arc.
        self.ctx.bus.publish(run_id, StreamMessage::done(run_id));
        self.ctx.bus.remove_run(run_id);
        tracing::info!(run_id = %run_id, "Deleted run");
        Ok(())
    }

    /// Cancel runs.
    ///
    /// Fires each locked run's cancellation handle with `action`. Pending
    /// runs that were never handed to the executor are marked interrupted,
    /// except under `rollback`, where they are deleted outright. Runs in a
    /// terminal state are left alone with a warning. Fails with not-found
    /// when any requested run id did not match.
    pub async fn cancel(
        &self,
        thread_id: Option<Uuid>,
        run_ids: &[Uuid],
        action: CancelAction,
    ) -> Result<()> {
        let mut found = 0usize;
        let mut deleted = Vec::new();

        {
            let mut doc = self.ctx.persistence.begin().await;
            for &run_id in run_ids {
                let Some(run) = doc.runs.get(&run_id) else {
                    tracing::warn!(run_id = %run_id, "Cancel requested for unknown run");
                    continue;
                };
                if let Some(thread_id) = thread_id {
                    if run.thread_id != thread_id {
                        tracing::warn!(run_id = %run_id, "Cancel requested across threads");
                        continue;
                    }
                }
                found += 1;

                let control = self.ctx.bus.control(run_id);
                if let Some(control) = &control {
                    control.fire(action);
                }

                match run.status {
                    RunStatus::Pending => {
                        if control.is_some() || action != CancelAction::Rollback {
                            let run = doc.runs.get_mut(&run_id).expect("present above");
                            run.status = RunStatus::Interrupted;
                            run.updated_at = Utc::now();
                        } else {
                            // Never started; rollback deletes it eagerly.
                            doc.remove_run(run_id);
                            deleted.push(run_id);
                        }
                    }
                    status => {
                        tracing::warn!(
                            run_id = %run_id,
                            status = %status,
                            "Cannot cancel a finished run"
                        );
                    }
                }
            }
        }

        for run_id in deleted {
            self.ctx.bus.publish(run_id, StreamMessage::done(run_id));
            self.ctx.bus.remove_run(run_id);
        }

        if found < run_ids.len() {
            return Err(ServerError::NotFound(format!(
                "{} of {} runs not found",
                run_ids.len() - found,
                run_ids.len()
            )));
        }
        Ok(())
    }

    /// Subscribe to a run's stream, yielding `(event, data)` pairs until
    /// the `control:done` sentinel, a terminal run status, or subscriber
    /// cancellation (which cancels the run with `interrupt` when the
    /// thread id is known).
    pub fn join_stream(
        &self,
        run_id: Uuid,
        thread_id: Option<Uuid>,
        opts: JoinOptions,
    ) -> impl Stream<Item = (String, Value)> + Send + 'static {
        let store = self.clone();

        async_stream::stream! {
            match store.get(run_id, thread_id).await {
                Ok(_) => {}
                Err(_) => {
                    if !opts.ignore_not_found {
                        yield (
                            "error".to_string(),
                            json!({"error": "NotFound", "message": format!("run {run_id} not found")}),
                        );
                    }
                    return;
                }
            }

            let mut guard = DisconnectGuard {
                store: store.clone(),
                run_id,
                thread_id,
                armed: opts.cancel_on_disconnect,
            };
            let queue = store.ctx.bus.queue(run_id);

            loop {
                match queue.get(JOIN_POLL_TIMEOUT, opts.cancel.as_ref()).await {
                    Ok(message) if message.is_done() => break,
                    Ok(message) if message.is_control() => continue,
                    Ok(message) => {
                        let event = message.event_name().to_string();
                        yield (event, message.data);
                    }
                    Err(ServerError::Timeout) => {
                        // Quiet cycle; end once the run can no longer produce.
                        match store.get(run_id, thread_id).await {
                            Ok(run) if run.status.is_active() => continue,
                            _ => break,
                        }
                    }
                    Err(ServerError::Cancelled) => {
                        if let Some(thread_id) = thread_id {
                            if let Err(err) = store
                                .cancel(Some(thread_id), &[run_id], CancelAction::Interrupt)
                                .await
                            {
                                tracing::debug!(run_id = %run_id, error = %err, "Cancel on subscriber disconnect failed");
                            }
                        }
                        guard.armed = false;
                        return;
                    }
                    Err(err) => {
                        tracing::warn!(run_id = %run_id, error = %err, "Join stream failed");
                        break;
                    }
                }
            }
            guard.armed = false;
        }
    }

    /// Consume a run's join stream and return its final value: the last
    /// `values` event, or `{__error__}` when the run failed.
    pub async fn wait(&self, run_id: Uuid, thread_id: Option<Uuid>) -> Result<Value> {
        use futures::StreamExt;

        self.get(run_id, thread_id).await?;

        let stream = self.join_stream(run_id, thread_id, JoinOptions::default());
        futures::pin_mut!(stream);

        let mut last_values = Value::Null;
        let mut error = None;
        while let Some((event, data)) = stream.next().await {
            match event.as_str() {
                "values" => last_values = data,
                "error" => error = Some(data),
                _ => {}
            }
        }

        match error {
            Some(err) => Ok(json!({ "__error__": err })),
            None => Ok(last_values),
        }
    }

    /// Wait for a run, falling back to the thread's current values when the
    /// run produced none
    pub async fn join(&self, run_id: Uuid, thread_id: Uuid) -> Result<Value> {
        let thread_exists = self
            .ctx
            .persistence
            .read(|doc| doc.threads.contains_key(&thread_id))
            .await;
        if !thread_exists {
            return Err(ServerError::not_found("thread", thread_id));
        }

        let value = self.wait(run_id, Some(thread_id)).await?;
        if !value.is_null() {
            return Ok(value);
        }

        let values = self
            .ctx
            .persistence
            .read(|doc| {
                doc.threads
                    .get(&thread_id)
                    .and_then(|thread| thread.values.clone())
            })
            .await;
        Ok(values
            .map(|map| Value::Object(map.into_iter().collect()))
            .unwrap_or(Value::Null))
    }
}

/// Cancels the run when a join subscriber is dropped mid-stream
struct DisconnectGuard {
    store: RunStore,
    run_id: Uuid,
    thread_id: Option<Uuid>,
    armed: bool,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(thread_id) = self.thread_id else {
            return;
        };
        let store = self.store.clone();
        let run_id = self.run_id;
        tokio::spawn(async move {
            if let Err(err) = store
                .cancel(Some(thread_id), &[run_id], CancelAction::Interrupt)
                .await
            {
                tracing::debug!(run_id = %run_id, error = %err, "Cancel on subscriber drop failed");
            }
        });
    }
}
