//! batchq gateway
//!
//! HTTP front end that turns each prediction request into a queued job and
//! waits for a model server to publish its result.

pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod test_util;
pub mod waiter;

pub use config::Config;
pub use error::ApiError;
pub use waiter::{PendingJob, PollPolicy, ResultWaiter, WaitError, WaitPolicy};

use std::sync::Arc;

use batchq_common::CoordinationStore;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub waiter: ResultWaiter,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn CoordinationStore>) -> Self {
        let waiter = ResultWaiter::new(store, config.store.queue.clone(), config.wait.policy());
        Self { config, waiter }
    }
}
