//! Helpers shared by unit and integration tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use batchq_common::{encode_job, DType, ImageBatch, ImagePayload, ImageSpec, Job, Prediction};

use crate::engine::InferenceEngine;
use crate::error::EngineError;

/// Tiny 2x2 single-channel input so test batches stay small.
pub fn test_spec() -> ImageSpec {
    ImageSpec {
        width: 2,
        height: 2,
        channels: 1,
        dtype: DType::Float32,
    }
}

/// Encoded job whose image is filled with `value`.
pub fn job_bytes(id: &str, value: f32) -> Vec<u8> {
    let payload = ImagePayload::from_f32(test_spec().shape(), &[value; 4]).unwrap();
    encode_job(&Job::with_id(id, payload)).unwrap()
}

/// Engine that records every batch it sees.
///
/// Each image is labelled `value_{n}` where `n` is its first element, which
/// lets tests check results land on the right job.
pub struct MockEngine {
    batch_sizes: Mutex<Vec<usize>>,
    fail: AtomicBool,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            batch_sizes: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn failing() -> Self {
        let engine = Self::new();
        engine.fail.store(true, Ordering::SeqCst);
        engine
    }

    /// Sizes of every batch passed to `predict`, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceEngine for MockEngine {
    fn engine_type(&self) -> &'static str {
        "mock"
    }

    async fn predict(&self, batch: &ImageBatch) -> Result<Vec<Vec<Prediction>>, EngineError> {
        self.batch_sizes.lock().unwrap().push(batch.len());
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::InferenceFailed("mock failure".to_string()));
        }

        let values = batch.to_f32();
        Ok(values
            .chunks_exact(batch.item_len())
            .map(|item| vec![Prediction::new(format!("value_{}", item[0]), 1.0)])
            .collect())
    }
}
