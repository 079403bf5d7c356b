//! Batch dispatcher for processing queued jobs.
//!
//! Each worker runs one dispatcher loop:
//!
//! ```text
//! Idle -> Draining -> Inferring -> Publishing -> Idle
//! ```
//!
//! Draining pops up to `batch_size` items with the store's atomic pop, so
//! concurrent workers never share a job. The whole batch goes to the engine
//! in one call. Error markers for jobs that fail to decode are written first,
//! then predictions in drain order, all with the result TTL.
//!
//! Known limitation: if the engine fails, the decoded jobs of that cycle are
//! lost. There is no redelivery; waiting gateways time out.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use batchq_common::{
    decode_job_expecting, CoordinationStore, ImageBatch, ImageSpec, Job, Prediction,
    ResultLifecycle, StoreError, StoredResult,
};
use chrono::Utc;
use futures_util::FutureExt;

use crate::config::DispatchConfig;
use crate::engine::InferenceEngine;
use crate::error::{DispatchError, EngineError};

/// Where a worker is in its dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Draining,
    Inferring,
    Publishing,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchState::Idle => "idle",
            DispatchState::Draining => "draining",
            DispatchState::Inferring => "inferring",
            DispatchState::Publishing => "publishing",
        };
        f.write_str(name)
    }
}

/// What one dispatch cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Items popped from the queue.
    pub drained: usize,
    /// Jobs sent to the engine and published with predictions, in drain order.
    pub inferred: Vec<String>,
    /// Jobs published with an error marker.
    pub failed: Vec<String>,
    /// Items dropped because no job id could be recovered.
    pub dropped: usize,
}

impl CycleReport {
    /// Nothing was waiting in the queue.
    pub fn is_idle(&self) -> bool {
        self.drained == 0
    }
}

/// A drained item after decoding.
enum Slot {
    Ready(Job),
    Failed { id: String, reason: String },
}

/// Drains the queue in batches and runs them through the engine.
pub struct BatchDispatcher {
    store: Arc<dyn CoordinationStore>,
    engine: Arc<dyn InferenceEngine>,
    results: ResultLifecycle,
    queue: String,
    image_spec: ImageSpec,
    batch_size: usize,
    idle_sleep: Duration,
}

impl BatchDispatcher {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        engine: Arc<dyn InferenceEngine>,
        queue: impl Into<String>,
        image_spec: ImageSpec,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            results: ResultLifecycle::new(store.clone(), config.result_ttl()),
            store,
            engine,
            queue: queue.into(),
            image_spec,
            batch_size: config.batch_size.max(1),
            idle_sleep: config.idle_sleep(),
        }
    }

    /// Run the dispatcher loop until `shutdown` resolves.
    ///
    /// Shutdown is only observed between cycles, so a drained batch is always
    /// carried through to publishing. Engine failures are logged and the loop
    /// continues; store failures end the loop with an error.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), DispatchError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            match self.run_cycle().await {
                Ok(report) if report.is_idle() => {
                    tracing::trace!(state = %DispatchState::Idle, "Queue empty, sleeping");
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(self.idle_sleep) => {}
                    }
                    continue;
                }
                Ok(report) => {
                    let backlog = self.store.queue_len(&self.queue).await.ok();
                    tracing::info!(
                        drained = report.drained,
                        backlog,
                        inferred = report.inferred.len(),
                        failed = report.failed.len(),
                        dropped = report.dropped,
                        "Dispatch cycle complete"
                    );
                }
                Err(DispatchError::Engine(e)) => {
                    tracing::error!("Batch abandoned, decoded jobs in this cycle are lost: {}", e);
                }
                Err(e) => return Err(e),
            }

            if (&mut shutdown).now_or_never().is_some() {
                break;
            }
        }

        tracing::info!("Dispatcher stopped");
        Ok(())
    }

    /// Run exactly one drain/infer/publish cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport, DispatchError> {
        tracing::trace!(state = %DispatchState::Draining);
        let items = self.drain().await?;
        let mut report = CycleReport {
            drained: items.len(),
            ..CycleReport::default()
        };
        if items.is_empty() {
            return Ok(report);
        }

        let slots = self.decode(&items, &mut report);
        let mut jobs = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Slot::Ready(job) => jobs.push(job),
                Slot::Failed { id, reason } => {
                    self.results
                        .publish(&id, &StoredResult::Error { error: reason })
                        .await?;
                    report.failed.push(id);
                }
            }
        }
        if jobs.is_empty() {
            return Ok(report);
        }

        tracing::trace!(state = %DispatchState::Inferring, jobs = jobs.len());
        let predictions = self.infer(&jobs).await?;

        tracing::trace!(state = %DispatchState::Publishing, jobs = jobs.len());
        for (job, predictions) in jobs.into_iter().zip(predictions) {
            self.results
                .publish(&job.id, &StoredResult::Ok { predictions })
                .await?;
            report.inferred.push(job.id);
        }

        Ok(report)
    }

    /// Pop up to `batch_size` items, stopping at the first empty pop.
    async fn drain(&self) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut items = Vec::with_capacity(self.batch_size);
        while items.len() < self.batch_size {
            match self.store.pop(&self.queue).await? {
                Some(item) => items.push(item),
                None => break,
            }
        }
        Ok(items)
    }

    fn decode(&self, items: &[Vec<u8>], report: &mut CycleReport) -> Vec<Slot> {
        let mut slots = Vec::with_capacity(items.len());
        for item in items {
            match decode_job_expecting(item, &self.image_spec) {
                Ok(job) => slots.push(Slot::Ready(job)),
                Err(e) => match e.job_id() {
                    Some(id) => {
                        tracing::warn!(job_id = id, "Rejecting malformed job: {}", e);
                        slots.push(Slot::Failed {
                            id: id.to_string(),
                            reason: e.to_string(),
                        });
                    }
                    None => {
                        tracing::warn!("Dropping queue item without a job id: {}", e);
                        report.dropped += 1;
                    }
                },
            }
        }
        slots
    }

    async fn infer(&self, jobs: &[Job]) -> Result<Vec<Vec<Prediction>>, EngineError> {
        let batch = ImageBatch::stack(jobs.iter().map(|job| &job.payload))
            .map_err(|e| EngineError::InvalidBatch(e.to_string()))?;

        let oldest_wait_ms = jobs
            .iter()
            .filter_map(|job| job.enqueued_at)
            .map(|t| (Utc::now() - t).num_milliseconds())
            .max();
        tracing::info!(
            engine = self.engine.engine_type(),
            shape = ?batch.shape,
            oldest_wait_ms,
            "Running batch"
        );

        let predictions = self.engine.predict(&batch).await?;
        if predictions.len() != jobs.len() {
            return Err(EngineError::ResultCountMismatch {
                expected: jobs.len(),
                actual: predictions.len(),
            });
        }
        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{job_bytes, test_spec, MockEngine};
    use batchq_common::MemoryStore;

    const QUEUE: &str = "image_queue";

    fn dispatcher(
        store: Arc<MemoryStore>,
        engine: Arc<MockEngine>,
        batch_size: usize,
    ) -> BatchDispatcher {
        let config = DispatchConfig {
            batch_size,
            idle_sleep_ms: 250,
            result_ttl_secs: 3600,
        };
        BatchDispatcher::new(store, engine, QUEUE, test_spec(), &config)
    }

    async fn take(store: &MemoryStore, id: &str) -> StoredResult {
        let bytes = store.get(id).await.unwrap().expect("result present");
        StoredResult::from_bytes(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_empty_queue_skips_engine() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(MockEngine::new());
        let dispatcher = dispatcher(store.clone(), engine.clone(), 32);

        let report = dispatcher.run_cycle().await.unwrap();
        assert!(report.is_idle());
        assert!(engine.batch_sizes().is_empty());
        assert_eq!(store.pop_calls(), 1);
    }

    #[tokio::test]
    async fn test_partial_batch_preserves_order() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(MockEngine::new());
        for i in 0..3 {
            store.push(QUEUE, job_bytes(&format!("job-{i}"), i as f32)).await.unwrap();
        }

        let report = dispatcher(store.clone(), engine.clone(), 32)
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(report.drained, 3);
        assert_eq!(report.inferred, vec!["job-0", "job-1", "job-2"]);
        assert_eq!(engine.batch_sizes(), vec![3]);
        for i in 0..3 {
            match take(&store, &format!("job-{i}")).await {
                StoredResult::Ok { predictions } => {
                    assert_eq!(predictions[0].label, format!("value_{i}"));
                }
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_malformed_job_is_isolated() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(MockEngine::new());
        store.push(QUEUE, job_bytes("good-1", 1.0)).await.unwrap();
        store
            .push(
                QUEUE,
                br#"{"id": "bad", "image": "!!", "shape": [1, 2, 2, 1], "dtype": "float32"}"#.to_vec(),
            )
            .await
            .unwrap();
        store.push(QUEUE, job_bytes("good-2", 2.0)).await.unwrap();

        let report = dispatcher(store.clone(), engine.clone(), 32)
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(report.inferred, vec!["good-1", "good-2"]);
        assert_eq!(report.failed, vec!["bad"]);
        assert_eq!(engine.batch_sizes(), vec![2]);
        assert!(matches!(take(&store, "good-1").await, StoredResult::Ok { .. }));
        assert!(matches!(take(&store, "good-2").await, StoredResult::Ok { .. }));
        assert!(matches!(take(&store, "bad").await, StoredResult::Error { .. }));
    }

    #[tokio::test]
    async fn test_wrong_shape_gets_error_marker() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(MockEngine::new());
        let payload = batchq_common::ImagePayload::from_f32(vec![1, 3], &[0.0; 3]).unwrap();
        let bytes = batchq_common::encode_job(&Job::with_id("odd", payload)).unwrap();
        store.push(QUEUE, bytes).await.unwrap();

        let report = dispatcher(store.clone(), engine.clone(), 32)
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(report.failed, vec!["odd"]);
        assert!(engine.batch_sizes().is_empty());
        match take(&store, "odd").await {
            StoredResult::Error { error } => assert!(error.contains("expected shape")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_item_without_id_is_dropped() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(MockEngine::new());
        store.push(QUEUE, b"garbage".to_vec()).await.unwrap();
        store.push(QUEUE, job_bytes("ok", 0.0)).await.unwrap();

        let report = dispatcher(store.clone(), engine.clone(), 32)
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(report.drained, 2);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.inferred, vec!["ok"]);
    }

    #[tokio::test]
    async fn test_engine_failure_keeps_decode_error_markers() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(MockEngine::failing());
        store.push(QUEUE, job_bytes("a", 0.0)).await.unwrap();
        store
            .push(QUEUE, br#"{"id": "broken", "image": "", "shape": [], "dtype": "float32"}"#.to_vec())
            .await
            .unwrap();

        let err = dispatcher(store.clone(), engine.clone(), 32)
            .run_cycle()
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Engine(_)));
        assert!(!store.contains_key("a").await);
        match take(&store, "broken").await {
            StoredResult::Error { error } => assert!(error.contains("broken")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(store.queue_len(QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_outage_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        store.set_offline(true);
        let engine = Arc::new(MockEngine::new());

        let result = dispatcher(store, engine, 32)
            .run(std::future::pending())
            .await;

        assert!(matches!(result, Err(DispatchError::Store(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_worker_sleeps_between_drains() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(MockEngine::new());
        let dispatcher = dispatcher(store.clone(), engine.clone(), 32);

        dispatcher
            .run(tokio::time::sleep(Duration::from_millis(1000)))
            .await
            .unwrap();

        // One empty pop per 250ms sleep: t = 0, 250, 500, 750 (and maybe 1000).
        let pops = store.pop_calls();
        assert!((4..=5).contains(&pops), "unexpected pop count {pops}");
        assert!(engine.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_run_publishes_queued_jobs() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(MockEngine::new());
        store.push(QUEUE, job_bytes("queued", 4.0)).await.unwrap();

        dispatcher(store.clone(), engine.clone(), 32)
            .run(tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();

        assert_eq!(engine.batch_sizes(), vec![1]);
        assert!(matches!(take(&store, "queued").await, StoredResult::Ok { .. }));
    }

    #[tokio::test]
    async fn test_engine_failure_does_not_stop_loop() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(MockEngine::failing());
        store.push(QUEUE, job_bytes("lost", 0.0)).await.unwrap();

        let dispatcher = dispatcher(store.clone(), engine.clone(), 32);
        dispatcher
            .run(tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();

        assert_eq!(engine.batch_sizes(), vec![1]);
        assert!(!store.contains_key("lost").await);
    }
}
