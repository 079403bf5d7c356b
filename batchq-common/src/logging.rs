//! Process-wide tracing setup shared by both binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` applies. Each event
/// carries its target (`batchq_gateway::...`, `batchq_model_server::...`),
/// which tells the two servers apart in shared log output.
pub fn init_tracing(service: &'static str, default_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    tracing::info!(service, version = env!("CARGO_PKG_VERSION"), "Logging initialised");
}
