//! Trellis server binary
//!
//! Startup order: tracing, configuration, persistence (unreadable document
//! is fatal), graph registry, stores, background flusher and executor,
//! then the HTTP listener. Shutdown drains the executor, performs a final
//! persistence flush, and exits 0.

use std::sync::Arc;
use std::time::Duration;

use trellis_checkpoint::InMemoryCheckpointer;
use trellis_server::api::create_router;
use trellis_server::checkpointer::CheckpointerHandle;
use trellis_server::config::ServerConfig;
use trellis_server::executor::RunExecutor;
use trellis_server::graph::{GraphDeps, GraphRegistry};
use trellis_server::persist::Persistence;
use trellis_server::store::{StoreContext, Stores};
use trellis_server::bus::StreamBus;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    tracing::info!(version = trellis_server::version(), "Starting trellis-server");

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "Invalid configuration");
            anyhow::bail!("configuration error: {err}");
        }
    };
    tracing::info!(
        addr = %config.bind_addr(),
        persist_path = %config.persistence.path.display(),
        graphs = config.graphs.len(),
        "Configuration loaded"
    );

    // An unreadable persisted document is a startup error, not something to
    // silently overwrite.
    let persistence = match Persistence::open(&config.persistence.path) {
        Ok(persistence) => persistence,
        Err(err) => {
            tracing::error!(error = %err, path = %config.persistence.path.display(), "Cannot open aggregate document");
            anyhow::bail!("persistence error: {err}");
        }
    };

    let checkpointer = CheckpointerHandle::new(Arc::new(InMemoryCheckpointer::new()));
    let registry = GraphRegistry::from_config(
        GraphDeps {
            checkpointer: checkpointer.clone(),
        },
        &config.graphs,
    )
    .map_err(|err| anyhow::anyhow!("graph registry error: {err}"))?;
    if config.graphs.is_empty() {
        tracing::warn!("No graphs configured; runs will fail until graphs are registered");
    }

    let stores = Stores::new(StoreContext {
        persistence: persistence.clone(),
        bus: Arc::new(StreamBus::new()),
        checkpointer,
        registry: Arc::new(registry),
    });

    let mut flusher = persistence.spawn_flusher(
        Duration::from_secs(config.persistence.flush_interval_secs),
        config.persistence.max_flush_failures,
    );

    let executor = RunExecutor::new(stores.clone(), config.executor.clone());
    let executor_shutdown = executor.shutdown_signal();
    let executor_handle = executor.spawn();

    let router = create_router(stores);
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    tracing::info!(addr = %listener.local_addr()?, "Listening");

    let server = axum::serve(listener, router.into_make_service());

    tokio::select! {
        result = server.with_graceful_shutdown(shutdown_signal()) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "HTTP server failed");
            }
        }
        fatal = &mut flusher => {
            match fatal {
                Ok(err) => tracing::error!(error = %err, "Persistence escalated to fatal"),
                Err(err) => tracing::error!(error = %err, "Flusher task failed"),
            }
            anyhow::bail!("persistence failure");
        }
    }

    tracing::info!("Shutting down");
    executor_shutdown.fire();
    let _ = executor_handle.await;
    flusher.abort();

    // Final flush so a clean exit never loses acknowledged writes.
    if let Err(err) = persistence.flush().await {
        tracing::error!(error = %err, "Final flush failed");
        anyhow::bail!("final flush failed: {err}");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to install ctrl-c handler");
    }
}
