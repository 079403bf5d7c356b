use std::env;
use std::sync::Arc;

use axum::middleware;
use batchq_common::logging::init_tracing;
use batchq_common::RedisStore;
use batchq_gateway::{logging::request_logger, routes, AppState, Config};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if env::args().any(|a| a == "--version" || a == "-V") {
        println!("batchq-gateway {}", VERSION);
        return Ok(());
    }

    // Load configuration
    let config = Config::load().map_err(|e| format!("Failed to load configuration: {}", e))?;

    init_tracing("gateway", &config.logging.level);

    // Connect to the shared store
    let store = Arc::new(RedisStore::connect(&config.store).await?);
    if config.store.enable_keyspace_events {
        store.enable_keyspace_events().await?;
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let policy = config.wait.policy();
    tracing::info!(
        queue = %config.store.queue,
        notify_timeout_ms = policy.notify_timeout.as_millis() as u64,
        budget_ms = policy.total_budget().as_millis() as u64,
        "Starting batchq gateway"
    );

    let state = Arc::new(AppState::new(config, store));

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::router(state)
        .layer(middleware::from_fn(request_logger))
        .layer(cors);

    tracing::info!("Listening on {}", addr);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
