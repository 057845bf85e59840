use redis::AsyncCommands;
use redis::Client;
use std::fmt::Display;
use tokio::sync::mpsc;

use crate::db::cache::RecommendationCache;
use crate::error::AppError;
use crate::error::AppResult;
use crate::models::RecommendationCacheEntry;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Serialized entry for one (user, strategy) pair
    Recommendations { user_id: String, strategy: String },
    /// Invalidation counter of a user
    Generation(String),
    /// Set of entry keys written for a user
    UserIndex(String),
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::Recommendations { user_id, strategy } => {
                write!(f, "recs:{}:{}", user_id, strategy.to_lowercase())
            }
            CacheKey::Generation(user_id) => write!(f, "recs:gen:{}", user_id),
            CacheKey::UserIndex(user_id) => write!(f, "recs:idx:{}", user_id),
        }
    }
}

/// Creates a Redis client for caching
///
/// Establishes a connection to Redis for fast data caching.
/// Uses connection pooling via the connection-manager feature.
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Message for asynchronous cache writes
struct CacheWriteMessage {
    user_id: String,
    key: String,
    value: String,
    ttl: u64,
}

/// Recommendation cache stored in Redis
///
/// Reads and invalidations go straight to Redis. Writes are queued to a
/// background task so a cache fill never delays the response; a write that
/// lands after an invalidation carries an old generation and is ignored on read.
#[derive(Clone)]
pub struct RedisRecommendationCache {
    redis_client: Client,
    write_tx: mpsc::UnboundedSender<CacheWriteMessage>,
}

/// Handle for gracefully shutting down the cache writer
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl CacheWriterHandle {
    /// Initiates a graceful shutdown of the cache writer
    ///
    /// Sends a shutdown signal to the writer task and waits for it to flush
    /// all pending writes to Redis.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");
    }
}

impl RedisRecommendationCache {
    /// Creates a new cache instance with an async write background task
    pub async fn new(redis_client: Client) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let client = redis_client.clone();
        tokio::spawn(async move {
            Self::cache_writer_task(client, write_rx, shutdown_rx).await;
        });

        let cache = Self {
            redis_client,
            write_tx,
        };

        let handle = CacheWriterHandle { shutdown_tx };

        (cache, handle)
    }

    /// Background task that processes cache write messages
    ///
    /// On shutdown signal, flushes all remaining messages before exiting.
    async fn cache_writer_task(
        client: Client,
        mut write_rx: mpsc::UnboundedReceiver<CacheWriteMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer task started");

        loop {
            tokio::select! {
                Some(msg) = write_rx.recv() => {
                    if let Err(e) = Self::write_to_redis(&client, msg).await {
                        tracing::error!(error = %e, "Failed to write to Redis cache");
                    }
                }
                _ = shutdown_rx.recv() => {
                    write_rx.close();
                    let mut flushed = 0usize;
                    while let Some(msg) = write_rx.recv().await {
                        if let Err(e) = Self::write_to_redis(&client, msg).await {
                            tracing::error!(error = %e, "Failed to flush cache write during shutdown");
                        } else {
                            flushed += 1;
                        }
                    }

                    tracing::info!(flushed, "Cache writer task stopped");
                    break;
                }
            }
        }
    }

    /// Writes the entry and indexes its key under the user
    async fn write_to_redis(client: &Client, msg: CacheWriteMessage) -> AppResult<()> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let index = CacheKey::UserIndex(msg.user_id).to_string();
        let _: () = redis::pipe()
            .atomic()
            .set_ex(&msg.key, msg.value, msg.ttl)
            .ignore()
            .sadd(&index, &msg.key)
            .ignore()
            .expire(&index, msg.ttl as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecommendationCache for RedisRecommendationCache {
    async fn generation(&self, user_id: &str) -> AppResult<u64> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let generation: Option<u64> = conn
            .get(CacheKey::Generation(user_id.to_string()).to_string())
            .await?;
        Ok(generation.unwrap_or(0))
    }

    async fn get(
        &self,
        user_id: &str,
        strategy: &str,
    ) -> AppResult<Option<RecommendationCacheEntry>> {
        let entry_key = CacheKey::Recommendations {
            user_id: user_id.to_string(),
            strategy: strategy.to_string(),
        };
        let generation_key = CacheKey::Generation(user_id.to_string());

        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let (cached, generation): (Option<String>, Option<u64>) = redis::pipe()
            .get(entry_key.to_string())
            .get(generation_key.to_string())
            .query_async(&mut conn)
            .await?;

        let Some(json) = cached else {
            return Ok(None);
        };

        let entry: RecommendationCacheEntry = serde_json::from_str(&json)
            .map_err(|e| AppError::Internal(format!("Cache deserialization error: {}", e)))?;

        if entry.is_expired(chrono::Utc::now()) || entry.generation != generation.unwrap_or(0) {
            return Ok(None);
        }

        Ok(Some(entry))
    }

    /// Queues the write without waiting for Redis
    async fn put(&self, entry: RecommendationCacheEntry) -> AppResult<()> {
        let ttl = (entry.expires_at - entry.created_at).num_seconds().max(1) as u64;
        let key = CacheKey::Recommendations {
            user_id: entry.user_id.clone(),
            strategy: entry.strategy.clone(),
        }
        .to_string();
        let value = serde_json::to_string(&entry)
            .map_err(|e| AppError::Internal(format!("Cache serialization error: {}", e)))?;

        let msg = CacheWriteMessage {
            user_id: entry.user_id,
            key,
            value,
            ttl,
        };

        self.write_tx
            .send(msg)
            .map_err(|e| AppError::Internal(format!("Cache writer unavailable: {}", e)))
    }

    async fn invalidate_user(&self, user_id: &str) -> AppResult<()> {
        let generation_key = CacheKey::Generation(user_id.to_string()).to_string();
        let index = CacheKey::UserIndex(user_id.to_string()).to_string();

        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let _: u64 = conn.incr(&generation_key, 1u64).await?;

        let keys: Vec<String> = conn.smembers(&index).await?;
        if !keys.is_empty() {
            let _: () = redis::pipe()
                .del(keys)
                .ignore()
                .del(&index)
                .ignore()
                .query_async(&mut conn)
                .await?;
        }
        Ok(())
    }

    async fn purge_expired(&self) -> AppResult<usize> {
        // Entries carry a Redis TTL, so there is nothing to sweep here
        Ok(0)
    }
}
