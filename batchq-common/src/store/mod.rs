//! Shared coordination store capability.
//!
//! Queue, expiring key/value space and key-change notifications all come from
//! the same backing store. Components receive an `Arc<dyn CoordinationStore>`
//! at construction and never reach for a global connection.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors talking to the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection or command failure. Callers propagate this rather than retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode stored value: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Primitives the coordination protocol is built on.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Append an item to the tail of a queue.
    async fn push(&self, queue: &str, item: Vec<u8>) -> Result<(), StoreError>;

    /// Atomically remove and return the head of a queue.
    ///
    /// Concurrent callers never receive the same item.
    async fn pop(&self, queue: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Number of items waiting in a queue.
    async fn queue_len(&self, queue: &str) -> Result<usize, StoreError>;

    /// Write a value that expires after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration)
        -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Subscribe to change events on a single key.
    async fn subscribe(&self, key: &str) -> Result<Box<dyn Subscription>, StoreError>;
}

/// A live subscription to change events on one key.
///
/// Delivery is best-effort: an event may never arrive even though the key was
/// written. Dropping a subscription releases it; `unsubscribe` does the same
/// but reports failures.
#[async_trait]
pub trait Subscription: Send {
    /// Wait up to `timeout` for the next change event.
    ///
    /// Returns `Ok(true)` when an event arrived and `Ok(false)` on timeout.
    async fn wait(&mut self, timeout: Duration) -> Result<bool, StoreError>;

    async fn unsubscribe(self: Box<Self>) -> Result<(), StoreError>;
}
