use serde::Deserialize;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// PostgreSQL connection URL; the in-memory store is used when unset
    #[serde(default)]
    pub database_url: Option<String>,

    /// Redis connection URL; the in-memory cache is used when unset
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Lifetime of a cached recommendation list
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// How often expired cache entries are purged
    #[serde(default = "default_cache_cleanup_interval_secs")]
    pub cache_cleanup_interval_secs: u64,

    /// Candidate pool size as a multiple of the requested count
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// Number of recent interactions scanned when building a profile
    #[serde(default = "default_profile_window")]
    pub profile_window: usize,

    /// Reading speed used to turn word counts into minutes
    #[serde(default = "default_words_per_minute")]
    pub words_per_minute: f64,

    /// Upper bound on the time-of-day engagement boost (fraction of score)
    #[serde(default = "default_temporal_boost_cap")]
    pub temporal_boost_cap: f64,

    /// Confidence level for significance tests and intervals
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,

    /// Deadline applied to every store call made on behalf of a request
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Background worker count
    #[serde(default = "default_task_workers")]
    pub task_workers: usize,

    /// Bounded queue in front of the background workers
    #[serde(default = "default_task_queue_capacity")]
    pub task_queue_capacity: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_cache_cleanup_interval_secs() -> u64 {
    300
}

fn default_candidate_multiplier() -> usize {
    3
}

fn default_profile_window() -> usize {
    100
}

fn default_words_per_minute() -> f64 {
    200.0
}

fn default_temporal_boost_cap() -> f64 {
    0.10
}

fn default_confidence_level() -> f64 {
    0.95
}

fn default_store_timeout_ms() -> u64 {
    2000
}

fn default_task_workers() -> usize {
    4
}

fn default_task_queue_capacity() -> usize {
    1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            host: default_host(),
            port: default_port(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_cleanup_interval_secs: default_cache_cleanup_interval_secs(),
            candidate_multiplier: default_candidate_multiplier(),
            profile_window: default_profile_window(),
            words_per_minute: default_words_per_minute(),
            temporal_boost_cap: default_temporal_boost_cap(),
            confidence_level: default_confidence_level(),
            store_timeout_ms: default_store_timeout_ms(),
            task_workers: default_task_workers(),
            task_queue_capacity: default_task_queue_capacity(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !(0.5..1.0).contains(&self.confidence_level) {
            anyhow::bail!(
                "CONFIDENCE_LEVEL must be in [0.5, 1.0), got {}",
                self.confidence_level
            );
        }
        if self.words_per_minute <= 0.0 {
            anyhow::bail!("WORDS_PER_MINUTE must be positive");
        }
        if self.candidate_multiplier == 0 || self.task_workers == 0 {
            anyhow::bail!("CANDIDATE_MULTIPLIER and TASK_WORKERS must be at least 1");
        }
        Ok(())
    }

    /// Tunables handed to the engine services
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            candidate_multiplier: self.candidate_multiplier,
            profile_window: self.profile_window,
            words_per_minute: self.words_per_minute,
            temporal_boost_cap: self.temporal_boost_cap.clamp(0.0, 0.10),
            confidence_level: self.confidence_level,
            store_timeout: Duration::from_millis(self.store_timeout_ms),
        }
    }
}

/// Engine tunables, decoupled from how they were loaded
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub cache_ttl: Duration,
    pub candidate_multiplier: usize,
    pub profile_window: usize,
    pub words_per_minute: f64,
    pub temporal_boost_cap: f64,
    pub confidence_level: f64,
    pub store_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Config::default().engine_settings()
    }
}
