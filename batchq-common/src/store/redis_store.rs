//! Redis-backed coordination store.
//!
//! - queue: `RPUSH` / `LPOP` on a list key
//! - results: `PSETEX` / `GET` / `DEL`
//! - notifications: keyspace events on `__keyspace@{db}__:{key}`
//!
//! Keyspace events only fire when the server has `notify-keyspace-events`
//! configured; see [`RedisStore::enable_keyspace_events`].

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::{AsyncCommands, Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};

use super::{CoordinationStore, StoreError, Subscription};
use crate::config::StoreConfig;

/// Store handle reused for the life of the process.
///
/// Commands share one multiplexed connection; each subscription opens its own
/// pub/sub connection because Redis dedicates a connection to subscribers.
pub struct RedisStore {
    client: Client,
    conn: MultiplexedConnection,
    db: i64,
}

impl RedisStore {
    /// Connect using the given settings.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = Client::open(connection_info(config))?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        tracing::info!(
            host = %config.host,
            port = config.port,
            db = config.db,
            "Connected to Redis"
        );
        Ok(Self {
            client,
            conn,
            db: config.db,
        })
    }

    /// Ask the server to publish keyspace events for every key change.
    pub async fn enable_keyspace_events(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg("KEA")
            .query_async::<_, ()>(&mut conn)
            .await?;
        tracing::info!("Enabled Redis keyspace notifications");
        Ok(())
    }

    fn keyspace_channel(&self, key: &str) -> String {
        keyspace_channel(self.db, key)
    }
}

fn connection_info(config: &StoreConfig) -> ConnectionInfo {
    ConnectionInfo {
        addr: ConnectionAddr::Tcp(config.host.clone(), config.port),
        redis: RedisConnectionInfo {
            db: config.db,
            username: Some(config.username.clone()).filter(|u| !u.is_empty()),
            password: Some(config.password.clone()).filter(|p| !p.is_empty()),
            ..Default::default()
        },
    }
}

/// PSETEX wants a positive millisecond count.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn keyspace_channel(db: i64, key: &str) -> String {
    format!("__keyspace@{}__:{}", db, key)
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn push(&self, queue: &str, item: Vec<u8>) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(queue, item).await?;
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        let item: Option<Vec<u8>> = conn.lpop(queue, None).await?;
        Ok(item)
    }

    async fn queue_len(&self, queue: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(queue).await?;
        Ok(len)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let millis = ttl_millis(ttl);
        let mut conn = self.conn.clone();
        redis::cmd("PSETEX")
            .arg(key)
            .arg(millis)
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn subscribe(&self, key: &str) -> Result<Box<dyn Subscription>, StoreError> {
        let channel = self.keyspace_channel(key);
        let mut pubsub = self.client.get_async_connection().await?.into_pubsub();
        pubsub.psubscribe(&channel).await?;
        tracing::debug!(%channel, "Subscribed to keyspace events");
        Ok(Box::new(RedisSubscription { pubsub, channel }))
    }
}

/// Keyspace subscription on a dedicated pub/sub connection.
struct RedisSubscription {
    pubsub: PubSub,
    channel: String,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn wait(&mut self, timeout: Duration) -> Result<bool, StoreError> {
        let mut messages = std::pin::pin!(self.pubsub.on_message());
        match tokio::time::timeout(timeout, messages.next()).await {
            Ok(Some(msg)) => {
                tracing::debug!(
                    channel = msg.get_channel_name(),
                    "Received keyspace event"
                );
                Ok(true)
            }
            Ok(None) => Err(StoreError::Unavailable(
                "pub/sub connection closed".to_string(),
            )),
            Err(_) => Ok(false),
        }
    }

    async fn unsubscribe(mut self: Box<Self>) -> Result<(), StoreError> {
        self.pubsub.punsubscribe(&self.channel).await?;
        tracing::debug!(channel = %self.channel, "Unsubscribed from keyspace events");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyspace_channel_format() {
        assert_eq!(keyspace_channel(0, "abc"), "__keyspace@0__:abc");
        assert_eq!(keyspace_channel(3, "job-1"), "__keyspace@3__:job-1");
    }

    #[test]
    fn test_ttl_millis_is_clamped() {
        assert_eq!(ttl_millis(Duration::from_secs(3600)), 3_600_000);
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_connection_info_skips_empty_credentials() {
        let config = StoreConfig {
            username: String::new(),
            ..StoreConfig::default()
        };
        let info = connection_info(&config);
        assert!(info.redis.username.is_none());
        assert!(info.redis.password.is_none());
        assert_eq!(info.redis.db, 0);
    }

    #[test]
    fn test_connection_info_carries_credentials() {
        let config = StoreConfig {
            password: "secret".to_string(),
            db: 4,
            ..StoreConfig::default()
        };
        let info = connection_info(&config);
        assert_eq!(info.redis.username.as_deref(), Some("default"));
        assert_eq!(info.redis.password.as_deref(), Some("secret"));
        assert_eq!(info.redis.db, 4);
    }
}
