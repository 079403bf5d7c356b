//! Inference engine abstraction layer.
//!
//! The dispatcher only needs one capability from a model: take an ordered
//! batch of images and return a ranked prediction list for each, in the same
//! order. Model loading and preprocessing live behind this trait.

mod http;

pub use http::{load_labels, rank, HttpEngine};

use async_trait::async_trait;
use batchq_common::{ImageBatch, Prediction};

use crate::error::EngineError;

/// Primary trait for inference engines.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Short identifier used in logs (e.g. "http").
    fn engine_type(&self) -> &'static str;

    /// Check the engine is reachable before the worker starts draining.
    async fn health_check(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Run the whole batch in a single call.
    ///
    /// Returns one prediction list per image, in batch order.
    async fn predict(&self, batch: &ImageBatch) -> Result<Vec<Vec<Prediction>>, EngineError>;
}
