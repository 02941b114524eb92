//! Graph registry
//!
//! Maps `graph_id` to a factory producing the installed graph, wired with
//! the checkpointer at first resolution. Populated at startup from the
//! `[graphs]` config section; a missing `graph_id` surfaces as a bad
//! request when a run or state operation tries to use it.

use super::Graph;
use crate::checkpointer::CheckpointerHandle;
use crate::errors::{Result, ServerError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Dependencies handed to graph factories
#[derive(Clone)]
pub struct GraphDeps {
    /// Checkpoint storage for the constructed graph
    pub checkpointer: CheckpointerHandle,
}

/// Constructor for an installed graph
pub type GraphFactory = Arc<dyn Fn(&GraphDeps) -> Arc<dyn Graph> + Send + Sync>;

/// Registry of installed graphs
pub struct GraphRegistry {
    deps: GraphDeps,
    factories: RwLock<HashMap<String, GraphFactory>>,
    // Graphs are stateless between calls; one instance per graph_id is
    // constructed lazily and reused.
    instances: RwLock<HashMap<String, Arc<dyn Graph>>>,
}

impl GraphRegistry {
    /// Create an empty registry
    pub fn new(deps: GraphDeps) -> Self {
        Self {
            deps,
            factories: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Build a registry from the `[graphs]` config section, where each entry
    /// maps a graph id to a builtin factory name.
    pub fn from_config(deps: GraphDeps, graphs: &HashMap<String, String>) -> Result<Self> {
        let registry = Self::new(deps);
        for (graph_id, factory_name) in graphs {
            let factory = builtin_factory(factory_name).ok_or_else(|| {
                ServerError::BadRequest(format!(
                    "unknown graph factory '{factory_name}' for graph '{graph_id}'"
                ))
            })?;
            registry.register(graph_id, factory);
        }
        Ok(registry)
    }

    /// Register (or replace) a graph factory
    pub fn register(&self, graph_id: impl Into<String>, factory: GraphFactory) {
        let graph_id = graph_id.into();
        self.instances.write().remove(&graph_id);
        self.factories.write().insert(graph_id, factory);
    }

    /// Whether a graph id is installed
    pub fn contains(&self, graph_id: &str) -> bool {
        self.factories.read().contains_key(graph_id)
    }

    /// Installed graph ids
    pub fn graph_ids(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }

    /// Resolve a graph id to its (cached) instance
    pub fn resolve(&self, graph_id: &str) -> Result<Arc<dyn Graph>> {
        if let Some(instance) = self.instances.read().get(graph_id) {
            return Ok(Arc::clone(instance));
        }

        let factory = self
            .factories
            .read()
            .get(graph_id)
            .cloned()
            .ok_or_else(|| ServerError::BadRequest(format!("graph '{graph_id}' is not installed")))?;

        let instance = factory(&self.deps);
        self.instances
            .write()
            .insert(graph_id.to_string(), Arc::clone(&instance));
        Ok(instance)
    }
}

/// Resolve a builtin factory by name
fn builtin_factory(name: &str) -> Option<GraphFactory> {
    match name {
        "echo" => Some(Arc::new(|deps: &GraphDeps| {
            Arc::new(super::EchoGraph::new(deps.checkpointer.clone())) as Arc<dyn Graph>
        })),
        _ => None,
    }
}
