//! batchq model server - one worker draining the shared job queue.

use std::env;
use std::sync::Arc;

use batchq_common::logging::init_tracing;
use batchq_common::RedisStore;
use batchq_model_server::{BatchDispatcher, Config, HttpEngine, InferenceEngine};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    println!("batchq-model-server {}", VERSION);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle --version / -V
    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        print_version();
        return Ok(());
    }

    // Load configuration
    let config = Config::load().map_err(|e| {
        format!(
            "Failed to load configuration: {}. \
             Make sure config.toml exists or set MODEL_SERVER__ENGINE__BASE_URL.",
            e
        )
    })?;

    init_tracing("model_server", &config.logging.level);

    // Connect to the shared store
    let store = Arc::new(RedisStore::connect(&config.store).await?);
    if config.store.enable_keyspace_events {
        store.enable_keyspace_events().await?;
    }

    // Create the engine
    let engine = Arc::new(HttpEngine::new(&config.engine)?);
    match engine.health_check().await {
        Ok(()) => tracing::info!("Model endpoint {} is healthy", config.engine.base_url),
        Err(e) => tracing::warn!("Model endpoint not ready yet: {}", e),
    }

    let dispatcher = BatchDispatcher::new(
        store,
        engine,
        config.store.queue.clone(),
        config.image.clone(),
        &config.dispatch,
    );

    tracing::info!(
        queue = %config.store.queue,
        batch_size = config.dispatch.batch_size,
        idle_sleep_ms = config.dispatch.idle_sleep_ms,
        result_ttl_secs = config.dispatch.result_ttl_secs,
        "Starting dispatcher"
    );

    dispatcher.run(shutdown_signal()).await?;

    Ok(())
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}
