use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::{error::AppResult, models::RecommendationCacheEntry};

/// Per-user, per-strategy memo of the last generated recommendation list
///
/// Every user has a generation counter. `invalidate_user` bumps it, and an
/// entry is only served while its generation matches the current one, so a
/// list computed before an invalidation can never be read after it, even if
/// its write lands late.
#[async_trait::async_trait]
pub trait RecommendationCache: Send + Sync {
    /// Current generation for the user; read before computing a list to cache
    async fn generation(&self, user_id: &str) -> AppResult<u64>;

    /// Live entry for (user, strategy); never returns expired or stale entries
    async fn get(
        &self,
        user_id: &str,
        strategy: &str,
    ) -> AppResult<Option<RecommendationCacheEntry>>;

    /// Stores the entry, replacing any previous one for the same pair
    async fn put(&self, entry: RecommendationCacheEntry) -> AppResult<()>;

    /// Drops every entry of the user across strategies; completes before returning
    async fn invalidate_user(&self, user_id: &str) -> AppResult<()>;

    /// Best-effort removal of globally expired entries, returns how many were dropped
    async fn purge_expired(&self) -> AppResult<usize>;
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<(String, String), RecommendationCacheEntry>,
    generations: HashMap<String, u64>,
}

/// Process-local cache used when no Redis URL is configured
#[derive(Clone, Default)]
pub struct MemoryRecommendationCache {
    inner: Arc<RwLock<CacheState>>,
}

impl MemoryRecommendationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }
}

#[async_trait::async_trait]
impl RecommendationCache for MemoryRecommendationCache {
    async fn generation(&self, user_id: &str) -> AppResult<u64> {
        let state = self.inner.read().await;
        Ok(state.generations.get(user_id).copied().unwrap_or(0))
    }

    async fn get(
        &self,
        user_id: &str,
        strategy: &str,
    ) -> AppResult<Option<RecommendationCacheEntry>> {
        let state = self.inner.read().await;
        let generation = state.generations.get(user_id).copied().unwrap_or(0);
        let now = Utc::now();

        Ok(state
            .entries
            .get(&(user_id.to_string(), strategy.to_string()))
            .filter(|entry| !entry.is_expired(now) && entry.generation == generation)
            .cloned())
    }

    async fn put(&self, entry: RecommendationCacheEntry) -> AppResult<()> {
        let mut state = self.inner.write().await;
        let generation = state
            .generations
            .get(&entry.user_id)
            .copied()
            .unwrap_or(0);

        if entry.generation != generation {
            tracing::debug!(
                user_id = %entry.user_id,
                entry_generation = entry.generation,
                current_generation = generation,
                "Discarding stale cache write"
            );
            return Ok(());
        }

        state
            .entries
            .insert((entry.user_id.clone(), entry.strategy.clone()), entry);
        Ok(())
    }

    async fn invalidate_user(&self, user_id: &str) -> AppResult<()> {
        let mut state = self.inner.write().await;
        *state.generations.entry(user_id.to_string()).or_insert(0) += 1;
        state.entries.retain(|(user, _), _| user != user_id);
        Ok(())
    }

    async fn purge_expired(&self) -> AppResult<usize> {
        let mut state = self.inner.write().await;
        let now = Utc::now();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before - state.entries.len())
    }
}

/// Periodically purges expired entries until the token is cancelled
pub fn spawn_cache_janitor(
    cache: Arc<dyn RecommendationCache>,
    interval: std::time::Duration,
    shutdown: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match cache.purge_expired().await {
                        Ok(0) => {}
                        Ok(purged) => tracing::debug!(purged, "Purged expired cache entries"),
                        Err(e) => tracing::warn!(error = %e, "Cache cleanup failed"),
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Cache janitor stopped");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(user: &str, strategy: &str, generation: u64, ttl: Duration) -> RecommendationCacheEntry {
        RecommendationCacheEntry::new(user, strategy, vec![], generation, ttl)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = MemoryRecommendationCache::new();
        cache
            .put(entry("u1", "hybrid", 0, Duration::from_secs(60)))
            .await
            .unwrap();

        assert!(cache.get("u1", "hybrid").await.unwrap().is_some());
        assert!(cache.get("u1", "content").await.unwrap().is_none());
        assert!(cache.get("u2", "hybrid").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_never_returns_expired_entry() {
        let cache = MemoryRecommendationCache::new();
        let mut expired = entry("u1", "hybrid", 0, Duration::from_secs(60));
        expired.expires_at = Utc::now() - chrono::Duration::seconds(1);
        cache.put(expired).await.unwrap();

        assert!(cache.get("u1", "hybrid").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_user_drops_all_strategies() {
        let cache = MemoryRecommendationCache::new();
        for strategy in ["hybrid", "content"] {
            cache
                .put(entry("u1", strategy, 0, Duration::from_secs(60)))
                .await
                .unwrap();
        }
        cache
            .put(entry("u2", "hybrid", 0, Duration::from_secs(60)))
            .await
            .unwrap();

        cache.invalidate_user("u1").await.unwrap();

        assert!(cache.get("u1", "hybrid").await.unwrap().is_none());
        assert!(cache.get("u1", "content").await.unwrap().is_none());
        assert!(cache.get("u2", "hybrid").await.unwrap().is_some());
        assert_eq!(cache.generation("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stale_write_after_invalidation_is_discarded() {
        let cache = MemoryRecommendationCache::new();
        let observed = cache.generation("u1").await.unwrap();

        cache.invalidate_user("u1").await.unwrap();
        cache
            .put(entry("u1", "hybrid", observed, Duration::from_secs(60)))
            .await
            .unwrap();

        assert!(cache.get("u1", "hybrid").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let cache = MemoryRecommendationCache::new();
        let mut expired = entry("u1", "hybrid", 0, Duration::from_secs(60));
        expired.expires_at = Utc::now() - chrono::Duration::seconds(1);
        cache.put(expired).await.unwrap();
        cache
            .put(entry("u2", "hybrid", 0, Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.len().await, 1);
    }
}
