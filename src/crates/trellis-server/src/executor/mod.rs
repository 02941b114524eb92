//! Run executor
//!
//! A single worker consumes the picker's batches strictly in order, which
//! is what makes the `enqueue` multitask strategy serial. For each picked
//! run it drives the graph's stream under the run's cancellation handle,
//! publishes every chunk to the stream bus, and settles the terminal run
//! and thread statuses from the final checkpoint.
//!
//! Transient failures (I/O, timeouts) reschedule the run with exponential
//! backoff and jitter until the attempt budget is exhausted.

use crate::bus::{CancelAction, CancelSignal, StreamMessage};
use crate::config::ExecutorConfig;
use crate::errors::{Result, ServerError};
use crate::graph::GraphInput;
use crate::models::{Run, RunStatus};
use crate::store::{PickedRun, Stores};
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use tokio::task::JoinHandle;
use trellis_checkpoint::Checkpoint;
use uuid::Uuid;

/// How a graph invocation ended
enum Outcome {
    /// The stream ran to completion
    Completed,
    /// The run was no longer pending when the worker reached it
    Skipped,
    /// The cancellation handle fired
    Cancelled(CancelAction),
}

/// The background worker driving graph invocations
pub struct RunExecutor {
    stores: Stores,
    config: ExecutorConfig,
    shutdown: CancelSignal,
}

impl RunExecutor {
    /// Create an executor over the stores
    pub fn new(stores: Stores, config: ExecutorConfig) -> Self {
        Self {
            stores,
            config,
            shutdown: CancelSignal::new(),
        }
    }

    /// Signal that stops the worker loop
    pub fn shutdown_signal(&self) -> CancelSignal {
        self.shutdown.clone()
    }

    /// Spawn the worker loop
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run_loop())
    }

    async fn run_loop(self) {
        let interval = Duration::from_millis(self.config.picker_interval_ms);
        tracing::info!(interval_ms = self.config.picker_interval_ms, "Run executor started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let batch = self.stores.runs.next().await;
            for picked in batch {
                if self.shutdown.is_fired() {
                    // Leave the run pending for the next process lifetime.
                    self.stores.context().bus.unlock(picked.run.run_id);
                    continue;
                }
                self.execute(picked).await;
            }
        }
        tracing::info!("Run executor stopped");
    }

    /// Execute one picked run end to end, always unlocking it in the bus
    pub async fn execute(&self, picked: PickedRun) {
        let PickedRun {
            run,
            attempt,
            control,
        } = picked;
        let run_id = run.run_id;
        let thread_id = run.thread_id;

        // Captured before the graph writes anything, so rollback can revert
        // the thread projection to its pre-run state.
        let pre_run_checkpoint = match self.stores.context().checkpointer.latest(thread_id).await {
            Ok(tuple) => tuple.map(|t| t.checkpoint),
            Err(err) => {
                tracing::warn!(run_id = %run_id, error = %err, "Could not read pre-run checkpoint");
                None
            }
        };

        let outcome = self.drive(&run, attempt, &control).await;
        let grace = Duration::from_secs(self.config.cancellation_grace_secs);

        let settled = tokio::time::timeout(
            grace,
            self.settle(run_id, thread_id, attempt, outcome, pre_run_checkpoint),
        )
        .await;
        if settled.is_err() {
            tracing::error!(run_id = %run_id, "Run settlement exceeded the grace period");
        }

        self.stores.context().bus.unlock(run_id);
    }

    /// Drive the graph stream, publishing chunks until completion,
    /// cancellation or failure
    async fn drive(
        &self,
        run: &Run,
        attempt: u32,
        control: &crate::bus::RunControl,
    ) -> Result<Outcome> {
        let run_id = run.run_id;
        let bus = &self.stores.context().bus;

        // The run may have been cancelled or deleted between pick and
        // execution.
        match self.stores.runs.get(run_id, None).await {
            Ok(current) if current.status == RunStatus::Pending => {}
            _ => return Ok(Outcome::Skipped),
        }
        if control.is_fired() {
            return Ok(Outcome::Cancelled(
                control.action().unwrap_or(CancelAction::Interrupt),
            ));
        }

        self.stores.runs.set_status(run_id, RunStatus::Running).await?;
        bus.publish(
            run_id,
            StreamMessage::stream(
                run_id,
                "metadata",
                json!({"run_id": run_id.to_string(), "attempt": attempt}),
            ),
        );
        tracing::info!(run_id = %run_id, attempt = attempt, "Run started");

        let graph_id = run
            .kwargs
            .config
            .configurable_str("graph_id")
            .ok_or_else(|| {
                ServerError::BadRequest(format!("run {run_id} carries no graph_id"))
            })?
            .to_string();
        let graph = self.stores.context().registry.resolve(&graph_id)?;

        let input = match (&run.kwargs.input, &run.kwargs.command) {
            (Some(input), _) => GraphInput::Input(input.clone()),
            (None, Some(command)) => GraphInput::Command(command.clone()),
            (None, None) => GraphInput::Resume,
        };

        let mut stream = graph
            .stream(input, run.kwargs.config.clone(), &run.kwargs.stream_mode)
            .await?;

        loop {
            tokio::select! {
                biased;
                _ = control.signal().cancelled() => {
                    return Ok(Outcome::Cancelled(
                        control.action().unwrap_or(CancelAction::Interrupt),
                    ));
                }
                chunk = stream.next() => match chunk {
                    Some(Ok(chunk)) => {
                        bus.publish(
                            run_id,
                            StreamMessage::stream(run_id, chunk.mode.as_str(), chunk.data),
                        );
                    }
                    Some(Err(err)) => return Err(err),
                    None => break,
                },
            }
        }
        Ok(Outcome::Completed)
    }

    /// Settle terminal statuses and notify subscribers
    async fn settle(
        &self,
        run_id: Uuid,
        thread_id: Uuid,
        attempt: u32,
        outcome: Result<Outcome>,
        pre_run_checkpoint: Option<Checkpoint>,
    ) {
        let bus = &self.stores.context().bus;

        match outcome {
            Ok(Outcome::Skipped) => {
                // Wake joiners of a run that was cancelled before it started.
                bus.publish(run_id, StreamMessage::done(run_id));
            }
            Ok(Outcome::Completed) => {
                let checkpoint = self.latest_checkpoint(thread_id).await;
                self.try_set_run_status(run_id, RunStatus::Success).await;
                self.try_set_thread_status(thread_id, checkpoint.as_ref(), None)
                    .await;
                bus.publish(run_id, StreamMessage::done(run_id));
                tracing::info!(run_id = %run_id, "Run succeeded");
            }
            Ok(Outcome::Cancelled(CancelAction::Interrupt)) => {
                let checkpoint = self.latest_checkpoint(thread_id).await;
                self.try_set_run_status(run_id, RunStatus::Interrupted).await;
                self.try_set_thread_status(thread_id, checkpoint.as_ref(), None)
                    .await;
                bus.publish(run_id, StreamMessage::done(run_id));
                tracing::info!(run_id = %run_id, "Run interrupted");
            }
            Ok(Outcome::Cancelled(CancelAction::Rollback)) => {
                // Discard the run's output entirely and revert the thread
                // projection to its pre-run checkpoint.
                if let Err(err) = self.stores.runs.delete(run_id, None).await {
                    tracing::warn!(run_id = %run_id, error = %err, "Rollback delete failed");
                }
                self.try_set_thread_status(thread_id, pre_run_checkpoint.as_ref(), None)
                    .await;
                tracing::info!(run_id = %run_id, "Run rolled back");
            }
            Err(err) if err.is_transient() && attempt < self.config.max_attempts => {
                let delay = self.backoff_delay(attempt);
                tracing::warn!(
                    run_id = %run_id,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, rescheduling run"
                );
                if let Err(err) = self.stores.runs.reschedule(run_id, delay).await {
                    tracing::warn!(run_id = %run_id, error = %err, "Reschedule failed");
                }
            }
            Err(err) => {
                let status = match err {
                    ServerError::Timeout => RunStatus::Timeout,
                    _ => RunStatus::Error,
                };
                let message = err.to_string();
                tracing::error!(run_id = %run_id, attempt = attempt, error = %message, "Run failed");

                bus.publish(
                    run_id,
                    StreamMessage::stream(run_id, "error", json!({"message": message.clone()})),
                );
                let checkpoint = self.latest_checkpoint(thread_id).await;
                self.try_set_run_status(run_id, status).await;
                self.try_set_thread_status(thread_id, checkpoint.as_ref(), Some(message.as_str()))
                    .await;
                bus.publish(run_id, StreamMessage::done(run_id));
            }
        }
    }

    async fn latest_checkpoint(&self, thread_id: Uuid) -> Option<Checkpoint> {
        match self.stores.context().checkpointer.latest(thread_id).await {
            Ok(tuple) => tuple.map(|t| t.checkpoint),
            Err(err) => {
                tracing::warn!(thread_id = %thread_id, error = %err, "Could not read final checkpoint");
                None
            }
        }
    }

    async fn try_set_run_status(&self, run_id: Uuid, status: RunStatus) {
        if let Err(err) = self.stores.runs.set_status(run_id, status).await {
            tracing::warn!(run_id = %run_id, error = %err, "Run status update failed");
        }
    }

    async fn try_set_thread_status(
        &self,
        thread_id: Uuid,
        checkpoint: Option<&Checkpoint>,
        error: Option<&str>,
    ) {
        if let Err(err) = self
            .stores
            .threads
            .set_status(thread_id, checkpoint, error)
            .await
        {
            tracing::warn!(thread_id = %thread_id, error = %err, "Thread status update failed");
        }
    }

    /// Exponential backoff capped at the configured maximum, with up to
    /// 25 % random jitter
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .config
            .backoff_initial_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.backoff_max_ms);
        let jitter = (base as f64 * 0.25 * rand::random::<f64>()) as u64;
        Duration::from_millis(base + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::StreamBus;
    use crate::checkpointer::CheckpointerHandle;
    use crate::graph::{GraphDeps, GraphRegistry};
    use crate::persist::Persistence;
    use crate::store::StoreContext;
    use std::sync::Arc;
    use trellis_checkpoint::InMemoryCheckpointer;

    fn executor() -> RunExecutor {
        let checkpointer = CheckpointerHandle::new(Arc::new(InMemoryCheckpointer::new()));
        let registry = GraphRegistry::new(GraphDeps {
            checkpointer: checkpointer.clone(),
        });
        let stores = Stores::new(StoreContext {
            persistence: Persistence::in_memory(),
            bus: Arc::new(StreamBus::new()),
            checkpointer,
            registry: Arc::new(registry),
        });
        RunExecutor::new(stores, ExecutorConfig::default())
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let executor = executor();
        let d1 = executor.backoff_delay(1).as_millis() as u64;
        let d2 = executor.backoff_delay(2).as_millis() as u64;
        let d10 = executor.backoff_delay(10).as_millis() as u64;

        // Base schedule is 500, 1000, ... capped at 30s; jitter adds at
        // most 25 %.
        assert!((500..=625).contains(&d1));
        assert!((1000..=1250).contains(&d2));
        assert!(d10 <= 37_500);
    }
}
