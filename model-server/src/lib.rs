//! batchq model server
//!
//! Drains the shared job queue in batches, runs each batch through an
//! inference engine in a single call and writes results back with a TTL.

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod test_util;

pub use config::{Config, DispatchConfig, EngineConfig};
pub use dispatcher::{BatchDispatcher, CycleReport, DispatchState};
pub use engine::{HttpEngine, InferenceEngine};
pub use error::{DispatchError, EngineError};
