//! Helpers shared by unit and integration tests.

use std::sync::Arc;
use std::time::Duration;

use batchq_common::{
    decode_job, CoordinationStore, DType, ImageBatch, ImagePayload, ImageSpec, Prediction,
    ResultLifecycle, StoredResult,
};
use tokio::task::JoinHandle;

pub const QUEUE: &str = "image_queue";

/// Tiny 2x2 single-channel input so test payloads stay small.
pub fn test_spec() -> ImageSpec {
    ImageSpec {
        width: 2,
        height: 2,
        channels: 1,
        dtype: DType::Float32,
    }
}

/// Payload matching [`test_spec`] filled with `value`.
pub fn test_payload(value: f32) -> ImagePayload {
    ImagePayload::from_f32(test_spec().shape(), &[value; 4]).unwrap()
}

/// Stand-in for a model server.
///
/// Pops jobs one at a time, waits `delay`, then publishes a single prediction
/// labelled `value_{n}` where `n` is the first element of the image. Jobs that
/// fail to decode get an error marker.
pub fn spawn_echo_worker(store: Arc<dyn CoordinationStore>, delay: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let results = ResultLifecycle::new(store.clone(), Duration::from_secs(60));
        loop {
            let Some(bytes) = store.pop(QUEUE).await.unwrap() else {
                tokio::time::sleep(Duration::from_millis(5)).await;
                continue;
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let (id, result) = match decode_job(&bytes) {
                Ok(job) => {
                    let batch = ImageBatch::stack([&job.payload]).unwrap();
                    let label = format!("value_{}", batch.to_f32()[0]);
                    let result = StoredResult::Ok {
                        predictions: vec![Prediction::new(label, 1.0)],
                    };
                    (job.id, result)
                }
                Err(e) => {
                    let Some(id) = e.job_id() else { continue };
                    let result = StoredResult::Error {
                        error: e.to_string(),
                    };
                    (id.to_string(), result)
                }
            };
            results.publish(&id, &result).await.unwrap();
        }
    })
}
