//! Control-plane stores
//!
//! Each store wraps the shared [`StoreContext`] and owns one aggregate's
//! operations: assistants (CRUD + versioning), threads (CRUD + status
//! derivation + state delegation), and runs (creation, picking, joining,
//! cancellation).

pub mod assistants;
pub mod runs;
pub mod threads;

pub use assistants::{AssistantPatch, AssistantSearch, AssistantStore, PutAssistant};
pub use runs::{JoinOptions, PickedRun, RunCreate, RunSearch, RunStore};
pub use threads::{ThreadSearch, ThreadStore};

use crate::bus::StreamBus;
use crate::checkpointer::CheckpointerHandle;
use crate::graph::GraphRegistry;
use crate::persist::Persistence;
use std::sync::Arc;

/// Shared dependencies of every store
pub struct StoreContext {
    /// Aggregate-document persistence
    pub persistence: Persistence,
    /// Per-run stream bus
    pub bus: Arc<StreamBus>,
    /// Injected checkpoint storage
    pub checkpointer: CheckpointerHandle,
    /// Installed graphs
    pub registry: Arc<GraphRegistry>,
}

/// The three aggregate stores over one shared context
#[derive(Clone)]
pub struct Stores {
    ctx: Arc<StoreContext>,
    /// Assistant store
    pub assistants: AssistantStore,
    /// Thread store
    pub threads: ThreadStore,
    /// Run store
    pub runs: RunStore,
}

impl Stores {
    /// Build the stores over a shared context
    pub fn new(ctx: StoreContext) -> Self {
        let ctx = Arc::new(ctx);
        Self {
            assistants: AssistantStore::new(Arc::clone(&ctx)),
            threads: ThreadStore::new(Arc::clone(&ctx)),
            runs: RunStore::new(Arc::clone(&ctx)),
            ctx,
        }
    }

    /// The shared context
    pub fn context(&self) -> &Arc<StoreContext> {
        &self.ctx
    }
}
