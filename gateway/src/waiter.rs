//! Request-side half of the coordination protocol.
//!
//! A request subscribes to its job key, pushes the job onto the shared queue
//! and then waits for the result: first for a key-change notification, then by
//! polling a bounded number of times in case the notification was lost.
//! Whatever the outcome, the subscription is released and any result that was
//! read is deleted.

use std::sync::Arc;
use std::time::Duration;

use batchq_common::{
    encode_job, CoordinationStore, ImagePayload, Job, Prediction, ResultLifecycle, StoreError,
    StoredResult, Subscription, DEFAULT_RESULT_TTL,
};
use thiserror::Error;

/// Allowance for store round-trips on top of the wait budget.
const STORE_SLACK: Duration = Duration::from_secs(1);

/// Bounded polling used after the notification wait gives up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
            max_attempts: 10,
        }
    }
}

/// How long a request waits for its result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitPolicy {
    /// Upper bound on the notification wait.
    pub notify_timeout: Duration,
    pub poll: PollPolicy,
}

impl WaitPolicy {
    /// Longest a request can wait before timing out.
    pub fn total_budget(&self) -> Duration {
        self.notify_timeout + self.poll.interval * self.poll.max_attempts
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            notify_timeout: Duration::from_secs(30),
            poll: PollPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("no result for job {0} within the wait budget")]
    Timeout(String),

    #[error("job {id} failed: {reason}")]
    JobFailed { id: String, reason: String },

    #[error("result for job {id} is unreadable: {source}")]
    CorruptResult {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode job: {0}")]
    Encode(#[source] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A job that has been queued and is waiting for its result.
///
/// Holds the subscription opened before the push. Dropping it without calling
/// [`ResultWaiter::await_result`] still releases the subscription.
pub struct PendingJob {
    id: String,
    subscription: Box<dyn Subscription>,
}

impl PendingJob {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Debug for PendingJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingJob").field("id", &self.id).finish()
    }
}

pub struct ResultWaiter {
    store: Arc<dyn CoordinationStore>,
    results: ResultLifecycle,
    queue: String,
    policy: WaitPolicy,
}

impl ResultWaiter {
    pub fn new(store: Arc<dyn CoordinationStore>, queue: impl Into<String>, policy: WaitPolicy) -> Self {
        // Only `take` is used on this side, so the TTL never applies.
        let results = ResultLifecycle::new(store.clone(), DEFAULT_RESULT_TTL);
        Self {
            store,
            results,
            queue: queue.into(),
            policy,
        }
    }

    /// Queue an image for inference.
    ///
    /// The subscription is opened before the push so a worker that answers
    /// immediately cannot slip its notification in ahead of us.
    pub async fn submit(&self, payload: ImagePayload) -> Result<PendingJob, WaitError> {
        let job = Job::new(payload);
        let bytes = encode_job(&job).map_err(WaitError::Encode)?;

        let subscription = self.store.subscribe(&job.id).await?;
        if let Err(e) = self.store.push(&self.queue, bytes).await {
            release(subscription, &job.id).await;
            return Err(e.into());
        }

        tracing::debug!(job_id = %job.id, queue = %self.queue, "Job queued");
        Ok(PendingJob {
            id: job.id,
            subscription,
        })
    }

    /// Wait for a queued job's result and consume it.
    pub async fn await_result(&self, pending: PendingJob) -> Result<Vec<Prediction>, WaitError> {
        let PendingJob {
            id,
            mut subscription,
        } = pending;

        let deadline = self.policy.total_budget() + STORE_SLACK;
        let wait = self.wait_for(&id, subscription.as_mut());
        let outcome = match tokio::time::timeout(deadline, wait).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(job_id = %id, "Store did not answer within the wait budget");
                Err(WaitError::Timeout(id.clone()))
            }
        };
        release(subscription, &id).await;
        outcome
    }

    /// Queue an image and wait for its predictions.
    pub async fn predict(&self, payload: ImagePayload) -> Result<Vec<Prediction>, WaitError> {
        let pending = self.submit(payload).await?;
        self.await_result(pending).await
    }

    async fn wait_for(
        &self,
        id: &str,
        subscription: &mut dyn Subscription,
    ) -> Result<Vec<Prediction>, WaitError> {
        match subscription.wait(self.policy.notify_timeout).await {
            Ok(true) => tracing::debug!(job_id = id, "Result notification received"),
            Ok(false) => tracing::debug!(job_id = id, "No notification, falling back to polling"),
            Err(e) => tracing::warn!(job_id = id, "Notification wait failed, polling instead: {}", e),
        }

        if let Some(bytes) = self.results.take(id).await? {
            return parse_result(id, &bytes);
        }

        let max_attempts = self.policy.poll.max_attempts;
        for attempt in 1..=max_attempts {
            tokio::time::sleep(self.policy.poll.interval).await;
            tracing::debug!(job_id = id, attempt, max_attempts, "Polling for result");
            if let Some(bytes) = self.results.take(id).await? {
                return parse_result(id, &bytes);
            }
        }

        tracing::warn!(
            job_id = id,
            budget_ms = self.policy.total_budget().as_millis() as u64,
            "Timed out waiting for result"
        );
        Err(WaitError::Timeout(id.to_string()))
    }
}

fn parse_result(id: &str, bytes: &[u8]) -> Result<Vec<Prediction>, WaitError> {
    match StoredResult::from_bytes(bytes) {
        Ok(StoredResult::Ok { predictions }) => Ok(predictions),
        Ok(StoredResult::Error { error }) => Err(WaitError::JobFailed {
            id: id.to_string(),
            reason: error,
        }),
        Err(source) => Err(WaitError::CorruptResult {
            id: id.to_string(),
            source,
        }),
    }
}

async fn release(subscription: Box<dyn Subscription>, id: &str) {
    match tokio::time::timeout(STORE_SLACK, subscription.unsubscribe()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(job_id = id, "Failed to release subscription: {}", e),
        Err(_) => tracing::warn!(job_id = id, "Timed out releasing subscription"),
    }
}
