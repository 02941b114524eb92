//! Builtin `echo` graph
//!
//! A minimal state graph used by the default server binary and the test
//! suite. It merges object inputs into the thread state, records one
//! checkpoint per superstep through the injected checkpointer, and supports
//! the full state surface (get/update/bulk-update/history).
//!
//! A handful of reserved input keys steer its behaviour so harnesses can
//! exercise the executor's edge paths:
//!
//! - `__steps__`: number of supersteps to run (default 1)
//! - `__sleep_ms__`: delay before each superstep
//! - `__interrupt__`: pause after applying the input, leaving a non-empty
//!   `next` and a task carrying the given payload
//! - `__fail__`: `"transient"`, `"timeout"` or `"fatal"` - fail after the
//!   first superstep with the corresponding error class

use super::{
    Graph, GraphInput, GraphStream, RunnableConfig, StateSnapshot, StateUpdate, StreamChunk,
    StreamMode, Superstep,
};
use crate::checkpointer::CheckpointerHandle;
use crate::errors::{Result, ServerError};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use trellis_checkpoint::{
    Checkpoint, CheckpointMetadata, CheckpointRef, CheckpointSource, CheckpointTask,
    CheckpointTuple,
};

const INTERRUPT_NODE: &str = "human";

/// The builtin state-merging graph
pub struct EchoGraph {
    checkpointer: CheckpointerHandle,
}

/// Interpreted form of a graph input
struct Plan {
    updates: Map<String, Value>,
    steps: u64,
    sleep: Duration,
    interrupt: Option<Value>,
    failure: Option<String>,
}

impl EchoGraph {
    /// Create an echo graph over the given checkpoint store
    pub fn new(checkpointer: CheckpointerHandle) -> Self {
        Self { checkpointer }
    }

    fn thread_ref(config: &RunnableConfig) -> Result<CheckpointRef> {
        let thread_id = config
            .configurable_str("thread_id")
            .ok_or_else(|| ServerError::BadRequest("config is missing thread_id".to_string()))?;
        let mut reference = CheckpointRef::latest(thread_id);
        if let Some(checkpoint_id) = config.configurable_str("checkpoint_id") {
            reference.checkpoint_id = Some(checkpoint_id.to_string());
        }
        Ok(reference)
    }

    fn base_metadata(config: &RunnableConfig) -> CheckpointMetadata {
        let mut metadata = CheckpointMetadata::new();
        if let Some(run_id) = config.configurable_str("run_id") {
            metadata = metadata.with_extra("run_id", json!(run_id));
        }
        metadata
    }

    fn snapshot(tuple: CheckpointTuple) -> StateSnapshot {
        StateSnapshot {
            values: tuple.checkpoint.values,
            next: tuple.checkpoint.next,
            tasks: tuple.checkpoint.tasks,
            metadata: tuple.metadata,
            created_at: Some(tuple.checkpoint.ts),
            checkpoint: tuple.config,
            parent_checkpoint: tuple.parent_config,
        }
    }

    async fn latest_state(
        &self,
        reference: &CheckpointRef,
    ) -> Result<(HashMap<String, Value>, i64)> {
        let latest = self
            .checkpointer
            .get_tuple(&CheckpointRef::latest(reference.thread_id.clone()))
            .await?;
        match latest {
            Some(tuple) => {
                let step = tuple.metadata.step.unwrap_or(-1) + 1;
                Ok((tuple.checkpoint.values, step))
            }
            None => Ok((HashMap::new(), 0)),
        }
    }

    fn plan(input: GraphInput) -> Result<Plan> {
        let mut plan = Plan {
            updates: Map::new(),
            steps: 1,
            sleep: Duration::ZERO,
            interrupt: None,
            failure: None,
        };

        let payload = match input {
            GraphInput::Input(value) => value,
            GraphInput::Command(value) => {
                // A command resumes a paused graph; its payload lands under
                // a dedicated key so callers can observe delivery.
                plan.updates.insert("__resume__".to_string(), value);
                return Ok(plan);
            }
            GraphInput::Resume => return Ok(plan),
        };

        let map = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ServerError::BadRequest(format!(
                    "echo graph expects an object input, got {other}"
                )))
            }
        };

        for (key, value) in map {
            match key.as_str() {
                "__steps__" => plan.steps = value.as_u64().unwrap_or(1).max(1),
                "__sleep_ms__" => {
                    plan.sleep = Duration::from_millis(value.as_u64().unwrap_or(0));
                }
                "__interrupt__" => plan.interrupt = Some(value),
                "__fail__" => plan.failure = value.as_str().map(str::to_string),
                _ => {
                    plan.updates.insert(key, value);
                }
            }
        }
        Ok(plan)
    }

    fn failure_error(kind: &str) -> ServerError {
        match kind {
            "timeout" => ServerError::Timeout,
            "transient" => ServerError::Transient("echo graph induced failure".to_string()),
            _ => ServerError::Fatal("echo graph induced failure".to_string()),
        }
    }

    async fn apply_update(
        &self,
        reference: &CheckpointRef,
        values: HashMap<String, Value>,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointRef> {
        let checkpoint = Checkpoint::new(values);
        let stored = self
            .checkpointer
            .put(
                &CheckpointRef::latest(reference.thread_id.clone()),
                checkpoint,
                metadata,
            )
            .await?;
        Ok(stored)
    }
}

#[async_trait]
impl Graph for EchoGraph {
    async fn invoke(&self, input: GraphInput, config: RunnableConfig) -> Result<Value> {
        use futures::StreamExt;

        let mut stream = self
            .stream(input, config, &[StreamMode::Values])
            .await?;
        let mut last = Value::Null;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if chunk.mode == StreamMode::Values {
                last = chunk.data;
            }
        }
        Ok(last)
    }

    async fn stream(
        &self,
        input: GraphInput,
        config: RunnableConfig,
        modes: &[StreamMode],
    ) -> Result<GraphStream> {
        let reference = Self::thread_ref(&config)?;
        let base_metadata = Self::base_metadata(&config);
        let modes: Vec<StreamMode> = if modes.is_empty() {
            StreamMode::default_modes()
        } else {
            modes.to_vec()
        };

        let plan = Self::plan(input)?;
        let (mut values, first_step) = self.latest_state(&reference).await?;
        let checkpointer = self.checkpointer.clone();

        let stream = async_stream::stream! {
            for i in 0..plan.steps {
                if !plan.sleep.is_zero() {
                    tokio::time::sleep(plan.sleep).await;
                }

                let mut delta = if i == 0 {
                    plan.updates.clone()
                } else {
                    Map::new()
                };
                delta.insert("step".to_string(), json!(first_step + i as i64));
                for (key, value) in &delta {
                    values.insert(key.clone(), value.clone());
                }

                let step_metadata = base_metadata
                    .clone()
                    .with_source(CheckpointSource::Loop)
                    .with_step(first_step + i as i64);
                let checkpoint = Checkpoint::new(values.clone());
                if let Err(err) = checkpointer
                    .put(
                        &CheckpointRef::latest(reference.thread_id.clone()),
                        checkpoint,
                        step_metadata,
                    )
                    .await
                {
                    yield Err(err);
                    return;
                }

                for mode in &modes {
                    match mode {
                        StreamMode::Values => {
                            yield Ok(StreamChunk {
                                mode: StreamMode::Values,
                                data: Value::Object(values.clone().into_iter().collect()),
                            });
                        }
                        StreamMode::Updates => {
                            yield Ok(StreamChunk {
                                mode: StreamMode::Updates,
                                data: json!({"echo": Value::Object(delta.clone())}),
                            });
                        }
                        // This graph produces no token, debug or event output.
                        _ => {}
                    }
                }

                if let Some(kind) = &plan.failure {
                    yield Err(Self::failure_error(kind));
                    return;
                }
            }

            if let Some(payload) = plan.interrupt {
                let task = CheckpointTask {
                    id: format!("task-{}", first_step + plan.steps as i64),
                    name: INTERRUPT_NODE.to_string(),
                    interrupts: vec![payload],
                    error: None,
                };
                let checkpoint = Checkpoint::new(values.clone())
                    .with_next(vec![INTERRUPT_NODE.to_string()])
                    .with_tasks(vec![task]);
                let metadata = base_metadata
                    .clone()
                    .with_source(CheckpointSource::Loop)
                    .with_step(first_step + plan.steps as i64);
                if let Err(err) = checkpointer
                    .put(
                        &CheckpointRef::latest(reference.thread_id.clone()),
                        checkpoint,
                        metadata,
                    )
                    .await
                {
                    yield Err(err);
                    return;
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn get_state(&self, config: RunnableConfig, _subgraphs: bool) -> Result<StateSnapshot> {
        let reference = Self::thread_ref(&config)?;
        match self.checkpointer.get_tuple(&reference).await? {
            Some(tuple) => Ok(Self::snapshot(tuple)),
            None => Ok(StateSnapshot::empty(reference.thread_id)),
        }
    }

    async fn update_state(
        &self,
        config: RunnableConfig,
        values: Value,
        as_node: Option<String>,
    ) -> Result<CheckpointRef> {
        let reference = Self::thread_ref(&config)?;
        let updates = match values {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ServerError::BadRequest(format!(
                    "state update expects an object, got {other}"
                )))
            }
        };

        let (mut state, step) = self.latest_state(&reference).await?;
        for (key, value) in updates {
            state.insert(key, value);
        }

        let mut metadata = Self::base_metadata(&config)
            .with_source(CheckpointSource::Update)
            .with_step(step);
        if let Some(node) = as_node {
            metadata = metadata.with_extra("written_by", json!(node));
        }
        self.apply_update(&reference, state, metadata).await
    }

    async fn bulk_update_state(
        &self,
        config: RunnableConfig,
        supersteps: Vec<Superstep>,
    ) -> Result<CheckpointRef> {
        let reference = Self::thread_ref(&config)?;
        if supersteps.is_empty() {
            return Err(ServerError::BadRequest(
                "at least one superstep is required".to_string(),
            ));
        }

        let (mut state, mut step) = self.latest_state(&reference).await?;
        let mut stored = CheckpointRef::latest(reference.thread_id.clone());

        for superstep in supersteps {
            let mut written_by = Vec::new();
            for StateUpdate { values, as_node } in superstep.updates {
                if let Value::Object(map) = values {
                    for (key, value) in map {
                        state.insert(key, value);
                    }
                }
                if let Some(node) = as_node {
                    written_by.push(json!(node));
                }
            }

            let mut metadata = Self::base_metadata(&config)
                .with_source(CheckpointSource::Update)
                .with_step(step);
            if !written_by.is_empty() {
                metadata = metadata.with_extra("written_by", Value::Array(written_by));
            }
            stored = self.apply_update(&reference, state.clone(), metadata).await?;
            step += 1;
        }
        Ok(stored)
    }

    async fn get_state_history(
        &self,
        config: RunnableConfig,
        limit: Option<usize>,
        before: Option<CheckpointRef>,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<Vec<StateSnapshot>> {
        let reference = Self::thread_ref(&config)?;
        let tuples = self
            .checkpointer
            .list(
                Some(&CheckpointRef::latest(reference.thread_id.clone())),
                metadata.as_ref(),
                before.as_ref(),
                limit,
            )
            .await?;
        Ok(tuples.into_iter().map(Self::snapshot).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::Arc;
    use trellis_checkpoint::InMemoryCheckpointer;
    use uuid::Uuid;

    fn graph() -> EchoGraph {
        EchoGraph::new(CheckpointerHandle::new(Arc::new(
            InMemoryCheckpointer::new(),
        )))
    }

    fn config_for(thread_id: Uuid) -> RunnableConfig {
        let mut config = RunnableConfig::default();
        config.set_configurable("thread_id", json!(thread_id.to_string()));
        config
    }

    async fn collect(stream: GraphStream) -> Vec<StreamChunk> {
        stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|chunk| chunk.unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_stream_merges_input_and_checkpoints() {
        let graph = graph();
        let thread_id = Uuid::new_v4();

        let stream = graph
            .stream(
                GraphInput::Input(json!({"x": 1})),
                config_for(thread_id),
                &[StreamMode::Values],
            )
            .await
            .unwrap();
        let chunks = collect(stream).await;

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data.get("x"), Some(&json!(1)));

        let snapshot = graph.get_state(config_for(thread_id), false).await.unwrap();
        assert_eq!(snapshot.values.get("x"), Some(&json!(1)));
        assert!(snapshot.next.is_empty());
    }

    #[tokio::test]
    async fn test_multi_step_stream_counts_steps() {
        let graph = graph();
        let thread_id = Uuid::new_v4();

        let stream = graph
            .stream(
                GraphInput::Input(json!({"__steps__": 3})),
                config_for(thread_id),
                &[StreamMode::Values],
            )
            .await
            .unwrap();
        let chunks = collect(stream).await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].data.get("step"), Some(&json!(2)));

        let history = graph
            .get_state_history(config_for(thread_id), None, None, None)
            .await
            .unwrap();
        assert_eq!(history.len(), 3);
        // Newest first.
        assert_eq!(history[0].values.get("step"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_interrupt_leaves_paused_state() {
        let graph = graph();
        let thread_id = Uuid::new_v4();

        let stream = graph
            .stream(
                GraphInput::Input(json!({"q": "approve?", "__interrupt__": {"why": "review"}})),
                config_for(thread_id),
                &[StreamMode::Values],
            )
            .await
            .unwrap();
        collect(stream).await;

        let snapshot = graph.get_state(config_for(thread_id), false).await.unwrap();
        assert_eq!(snapshot.next, vec![INTERRUPT_NODE.to_string()]);
        assert_eq!(snapshot.tasks.len(), 1);
        assert_eq!(snapshot.tasks[0].interrupts[0], json!({"why": "review"}));
    }

    #[tokio::test]
    async fn test_failure_directive_yields_error() {
        let graph = graph();
        let thread_id = Uuid::new_v4();

        let mut stream = graph
            .stream(
                GraphInput::Input(json!({"__fail__": "transient"})),
                config_for(thread_id),
                &[StreamMode::Values],
            )
            .await
            .unwrap();

        // First chunk is the merged values, second is the induced failure.
        assert!(stream.next().await.unwrap().is_ok());
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_update_state_and_history() {
        let graph = graph();
        let thread_id = Uuid::new_v4();

        graph
            .update_state(config_for(thread_id), json!({"a": 1}), None)
            .await
            .unwrap();
        graph
            .update_state(
                config_for(thread_id),
                json!({"b": 2}),
                Some("editor".to_string()),
            )
            .await
            .unwrap();

        let snapshot = graph.get_state(config_for(thread_id), false).await.unwrap();
        assert_eq!(snapshot.values.get("a"), Some(&json!(1)));
        assert_eq!(snapshot.values.get("b"), Some(&json!(2)));
        assert_eq!(snapshot.metadata.extra.get("written_by"), Some(&json!("editor")));
    }

    #[tokio::test]
    async fn test_bulk_update_one_checkpoint_per_superstep() {
        let graph = graph();
        let thread_id = Uuid::new_v4();

        let supersteps = vec![
            Superstep {
                updates: vec![StateUpdate {
                    values: json!({"a": 1}),
                    as_node: None,
                }],
            },
            Superstep {
                updates: vec![StateUpdate {
                    values: json!({"b": 2}),
                    as_node: None,
                }],
            },
            Superstep {
                updates: vec![StateUpdate {
                    values: json!({"c": 3}),
                    as_node: None,
                }],
            },
        ];
        graph
            .bulk_update_state(config_for(thread_id), supersteps)
            .await
            .unwrap();

        let history = graph
            .get_state_history(config_for(thread_id), Some(10), None, None)
            .await
            .unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].values.get("c"), Some(&json!(3)));
        assert!(history[2].values.get("b").is_none());
    }

    #[tokio::test]
    async fn test_invoke_returns_final_values() {
        let graph = graph();
        let thread_id = Uuid::new_v4();

        let result = graph
            .invoke(GraphInput::Input(json!({"x": 7})), config_for(thread_id))
            .await
            .unwrap();
        assert_eq!(result.get("x"), Some(&json!(7)));
    }
}
