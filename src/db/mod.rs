pub mod cache;
pub mod postgres;
pub mod redis;

pub use self::cache::{spawn_cache_janitor, MemoryRecommendationCache, RecommendationCache};
pub use self::postgres::{create_pool, PgStore};
pub use self::redis::{create_redis_client, CacheWriterHandle, RedisRecommendationCache};
