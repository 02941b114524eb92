//! Shared test harness: stores over an in-memory checkpointer with the
//! builtin echo graph installed.

use std::sync::Arc;
use trellis_checkpoint::InMemoryCheckpointer;
use trellis_server::bus::StreamBus;
use trellis_server::checkpointer::CheckpointerHandle;
use trellis_server::config::ExecutorConfig;
use trellis_server::executor::RunExecutor;
use trellis_server::graph::{EchoGraph, Graph, GraphDeps, GraphRegistry, RunnableConfig};
use trellis_server::models::{Assistant, IfExists, Metadata};
use trellis_server::persist::Persistence;
use trellis_server::store::{PutAssistant, StoreContext, Stores};
use uuid::Uuid;

pub fn stores() -> Stores {
    stores_with_persistence(Persistence::in_memory())
}

pub fn stores_with_persistence(persistence: Persistence) -> Stores {
    let checkpointer = CheckpointerHandle::new(Arc::new(InMemoryCheckpointer::new()));
    let registry = GraphRegistry::new(GraphDeps {
        checkpointer: checkpointer.clone(),
    });
    registry.register(
        "echo",
        Arc::new(|deps: &GraphDeps| {
            Arc::new(EchoGraph::new(deps.checkpointer.clone())) as Arc<dyn Graph>
        }),
    );

    Stores::new(StoreContext {
        persistence,
        bus: Arc::new(StreamBus::new()),
        checkpointer,
        registry: Arc::new(registry),
    })
}

/// Executor with a fast retry schedule suitable for tests
pub fn executor(stores: &Stores) -> RunExecutor {
    let config = ExecutorConfig {
        max_attempts: 3,
        backoff_initial_ms: 1,
        backoff_max_ms: 10,
        cancellation_grace_secs: 5,
        picker_interval_ms: 20,
    };
    RunExecutor::new(stores.clone(), config)
}

pub fn meta(value: serde_json::Value) -> Metadata {
    serde_json::from_value(value).expect("object literal")
}

pub async fn echo_assistant(stores: &Stores) -> Assistant {
    stores
        .assistants
        .put(PutAssistant {
            assistant_id: Uuid::new_v4(),
            graph_id: "echo".to_string(),
            config: RunnableConfig::default(),
            metadata: Metadata::new(),
            name: None,
            if_exists: IfExists::Raise,
        })
        .await
        .expect("assistant creation")
}
