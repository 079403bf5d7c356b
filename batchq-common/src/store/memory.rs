//! In-process coordination store.
//!
//! Behaves like the Redis store for a single process: FIFO queues with
//! atomic pop, values with expiry, and change events per key. Expiry uses the
//! tokio clock, so tests can advance time with a paused runtime.
//!
//! A few knobs exist purely for exercising failure paths: dropping every
//! notification, going offline, and counting pops and live subscriptions.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;

use super::{CoordinationStore, StoreError, Subscription};

const EVENT_CAPACITY: usize = 1024;

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    values: HashMap<String, Entry>,
}

/// Single-process store with the same semantics as [`RedisStore`](super::RedisStore).
pub struct MemoryStore {
    inner: Mutex<Inner>,
    events: broadcast::Sender<String>,
    drop_notifications: AtomicBool,
    offline: AtomicBool,
    pops: AtomicUsize,
    active_subscriptions: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
            drop_notifications: AtomicBool::new(false),
            offline: AtomicBool::new(false),
            pops: AtomicUsize::new(0),
            active_subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Silently discard every change event from now on.
    pub fn drop_notifications(&self, drop: bool) {
        self.drop_notifications.store(drop, Ordering::SeqCst);
    }

    /// Make every operation fail with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of pop calls made so far, including empty ones.
    pub fn pop_calls(&self) -> usize {
        self.pops.load(Ordering::SeqCst)
    }

    /// Subscriptions that have been opened and not yet released.
    pub fn active_subscriptions(&self) -> usize {
        self.active_subscriptions.load(Ordering::SeqCst)
    }

    /// Whether a key currently holds an unexpired value.
    pub async fn contains_key(&self, key: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .values
            .get(key)
            .is_some_and(|entry| entry.expires_at > Instant::now())
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    fn notify(&self, key: &str) {
        if self.drop_notifications.load(Ordering::SeqCst) {
            return;
        }
        // No receivers is fine; nobody is waiting on this key.
        let _ = self.events.send(key.to_string());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn push(&self, queue: &str, item: Vec<u8>) -> Result<(), StoreError> {
        self.check_online()?;
        let mut inner = self.inner.lock().await;
        inner
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(item);
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_online()?;
        self.pops.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        Ok(inner.queues.get_mut(queue).and_then(|q| q.pop_front()))
    }

    async fn queue_len(&self, queue: &str) -> Result<usize, StoreError> {
        self.check_online()?;
        let inner = self.inner.lock().await;
        Ok(inner.queues.get(queue).map(|q| q.len()).unwrap_or(0))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.check_online()?;
        {
            let mut inner = self.inner.lock().await;
            inner.values.insert(
                key.to_string(),
                Entry {
                    value,
                    expires_at: Instant::now() + ttl,
                },
            );
        }
        self.notify(key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_online()?;
        let expired = {
            let mut inner = self.inner.lock().await;
            let expired = match inner.values.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => true,
                None => false,
            };
            if expired {
                inner.values.remove(key);
            }
            expired
        };
        if expired {
            self.notify(key);
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_online()?;
        let removed = self.inner.lock().await.values.remove(key).is_some();
        if removed {
            self.notify(key);
        }
        Ok(())
    }

    async fn subscribe(&self, key: &str) -> Result<Box<dyn Subscription>, StoreError> {
        self.check_online()?;
        self.active_subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySubscription {
            key: key.to_string(),
            events: self.events.subscribe(),
            active: self.active_subscriptions.clone(),
        }))
    }
}

struct MemorySubscription {
    key: String,
    events: broadcast::Receiver<String>,
    active: Arc<AtomicUsize>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn wait(&mut self, timeout: Duration) -> Result<bool, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Err(_) => return Ok(false),
                Ok(Ok(key)) if key == self.key => return Ok(true),
                Ok(Ok(_)) => continue,
                // Missed events may include ours; report it as a hint.
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => return Ok(true),
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(StoreError::Unavailable("event channel closed".to_string()))
                }
            }
        }
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), StoreError> {
        // Release happens in Drop.
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
