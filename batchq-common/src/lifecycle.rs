//! Result lifecycle policy.
//!
//! Results are ephemeral. Every write carries the TTL, so a result nobody
//! collects (gateway crashed, client gave up) is reaped by the store. Every
//! read that finds a value deletes it straight away, so a result is handed to
//! at most one consumer. Going through [`ResultLifecycle`] is the only way the
//! gateway and model server touch result keys.

use std::sync::Arc;
use std::time::Duration;

use crate::result::StoredResult;
use crate::store::{CoordinationStore, StoreError};

/// Default time a result may wait for pickup.
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Clone)]
pub struct ResultLifecycle {
    store: Arc<dyn CoordinationStore>,
    ttl: Duration,
}

impl ResultLifecycle {
    pub fn new(store: Arc<dyn CoordinationStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Write a job's result with the fixed TTL.
    pub async fn publish(&self, job_id: &str, result: &StoredResult) -> Result<(), StoreError> {
        let bytes = result.to_bytes()?;
        self.store.set_with_ttl(job_id, bytes, self.ttl).await
    }

    /// Read a job's result and delete it if present.
    ///
    /// The raw value is returned so callers can still report values they fail
    /// to parse; the key is gone either way.
    pub async fn take(&self, job_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self.store.get(job_id).await?;
        if value.is_some() {
            self.store.delete(job_id).await?;
        }
        Ok(value)
    }
}
