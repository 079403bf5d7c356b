//! Waiter behaviour against stores that misbehave at the wrong moment.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use batchq_common::{
    decode_job, CoordinationStore, MemoryStore, Prediction, ResultLifecycle, StoreError,
    StoredResult, Subscription,
};
use batchq_gateway::test_util::{test_payload, QUEUE};
use batchq_gateway::{PollPolicy, ResultWaiter, WaitError, WaitPolicy};

/// Wraps a [`MemoryStore`], optionally failing pushes, answering each job the
/// moment it is pushed, or never answering reads.
#[derive(Default)]
struct ScriptedStore {
    inner: Arc<MemoryStore>,
    fail_push: bool,
    answer_on_push: bool,
    stall_reads: bool,
}

#[async_trait]
impl CoordinationStore for ScriptedStore {
    async fn push(&self, queue: &str, item: Vec<u8>) -> Result<(), StoreError> {
        if self.fail_push {
            return Err(StoreError::Unavailable("push refused".to_string()));
        }
        if self.answer_on_push {
            let job = decode_job(&item).unwrap();
            let results = ResultLifecycle::new(self.inner.clone(), Duration::from_secs(60));
            let result = StoredResult::Ok {
                predictions: vec![Prediction::new("instant", 0.9)],
            };
            return results.publish(&job.id, &result).await;
        }
        self.inner.push(queue, item).await
    }

    async fn pop(&self, queue: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.pop(queue).await
    }

    async fn queue_len(&self, queue: &str) -> Result<usize, StoreError> {
        self.inner.queue_len(queue).await
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if self.stall_reads {
            std::future::pending::<()>().await;
        }
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }

    async fn subscribe(&self, key: &str) -> Result<Box<dyn Subscription>, StoreError> {
        self.inner.subscribe(key).await
    }
}

#[tokio::test]
async fn test_failed_push_releases_subscription() {
    let inner = Arc::new(MemoryStore::new());
    let store = Arc::new(ScriptedStore {
        inner: inner.clone(),
        fail_push: true,
        ..ScriptedStore::default()
    });
    let waiter = ResultWaiter::new(store, QUEUE, WaitPolicy::default());

    let err = waiter.submit(test_payload(1.0)).await.unwrap_err();

    assert!(matches!(err, WaitError::Store(StoreError::Unavailable(_))));
    assert_eq!(inner.active_subscriptions(), 0);
    assert_eq!(inner.queue_len(QUEUE).await.unwrap(), 0);
}

#[tokio::test]
async fn test_immediate_answer_is_not_missed() {
    let inner = Arc::new(MemoryStore::new());
    let store = Arc::new(ScriptedStore {
        inner: inner.clone(),
        answer_on_push: true,
        ..ScriptedStore::default()
    });
    // No polling at all: only the notification can deliver the result.
    let policy = WaitPolicy {
        notify_timeout: Duration::from_secs(10),
        poll: PollPolicy {
            interval: Duration::from_millis(250),
            max_attempts: 0,
        },
    };
    let waiter = ResultWaiter::new(store, QUEUE, policy);

    let start = Instant::now();
    let predictions = waiter.predict(test_payload(1.0)).await.unwrap();

    assert_eq!(predictions, vec![Prediction::new("instant", 0.9)]);
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(inner.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_store_outage_during_wait_is_reported() {
    let store = Arc::new(MemoryStore::new());
    let policy = WaitPolicy {
        notify_timeout: Duration::from_millis(20),
        poll: PollPolicy {
            interval: Duration::from_millis(10),
            max_attempts: 5,
        },
    };
    let waiter = ResultWaiter::new(store.clone(), QUEUE, policy);

    let pending = waiter.submit(test_payload(1.0)).await.unwrap();
    store.set_offline(true);

    let err = waiter.await_result(pending).await.unwrap_err();
    assert!(matches!(err, WaitError::Store(_)));
    assert_eq!(store.active_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_store_read_still_times_out() {
    let inner = Arc::new(MemoryStore::new());
    let store = Arc::new(ScriptedStore {
        inner: inner.clone(),
        stall_reads: true,
        ..ScriptedStore::default()
    });
    let policy = WaitPolicy {
        notify_timeout: Duration::from_secs(2),
        poll: PollPolicy {
            interval: Duration::from_millis(250),
            max_attempts: 4,
        },
    };
    let waiter = ResultWaiter::new(store, QUEUE, policy);

    let start = tokio::time::Instant::now();
    let err = waiter.predict(test_payload(1.0)).await.unwrap_err();

    assert!(matches!(err, WaitError::Timeout(_)));
    assert!(start.elapsed() <= policy.total_budget() + Duration::from_secs(2));
    assert_eq!(inner.active_subscriptions(), 0);
}
