//! Pipeline configuration.
//!
//! Every field has a default, so a partial JSON document is enough to
//! override individual settings. Durations are stored as milliseconds.

use crate::model::QualityTier;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Request scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of sentences ahead of the current one kept pre-generated.
    pub lookahead_window: u64,
    /// Maximum concurrent generation calls.
    pub max_concurrency: usize,
    /// Sentences this close to the current one are dispatched first.
    pub urgent_horizon: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lookahead_window: 15,
            max_concurrency: 3,
            urgent_horizon: 1,
        }
    }
}

/// Cache store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum total payload bytes.
    pub byte_budget: usize,
    /// Weight of recency in the eviction score (`w1`).
    pub recency_weight: f64,
    /// Weight of narrative priority in the eviction score (`w2`).
    pub priority_weight: f64,
    /// Age at which the recency term halves.
    pub recency_half_life_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            byte_budget: 256 * 1024 * 1024,
            recency_weight: 0.7,
            priority_weight: 0.3,
            recency_half_life_ms: 30_000,
        }
    }
}

impl CacheConfig {
    pub fn recency_half_life(&self) -> Duration {
        Duration::from_millis(self.recency_half_life_ms)
    }
}

/// Retry/backoff settings for generation calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Random jitter as a fraction of the computed delay.
    pub jitter: f64,
    /// Timeout for a single remote attempt.
    pub attempt_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 4_000,
            multiplier: 2.0,
            jitter: 0.2,
            attempt_timeout_ms: 20_000,
        }
    }
}

impl RetryConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays open before allowing a trial call.
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 10_000,
        }
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Quality tier selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Tier requested when conditions are normal.
    pub default_tier: QualityTier,
    /// Smoothed latency above which the tier is lowered.
    pub latency_threshold_ms: u64,
    /// EWMA smoothing factor for observed latency, in `(0, 1]`.
    pub latency_smoothing: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            default_tier: QualityTier::High,
            latency_threshold_ms: 6_000,
            latency_smoothing: 0.3,
        }
    }
}

/// Narrative context settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
    /// Minimum attribute similarity for two mentions to be the same element.
    pub similarity_threshold: f64,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.5,
        }
    }
}

/// Sync coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Duration of the fade shown on a cache miss.
    pub fade_ms: u32,
    /// Duration of the dissolve shown when a skip lands on a missing scene.
    pub dissolve_ms: u32,
    /// Number of recent drift samples kept for the windowed average.
    pub drift_window: usize,
    /// Capacity of the session event channel.
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fade_ms: 400,
            dissolve_ms: 600,
            drift_window: 32,
            event_capacity: 256,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub quality: QualityConfig,
    pub narrative: NarrativeConfig,
    pub sync: SyncConfig,
}

impl PipelineConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file and validate it.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).await?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the lookahead window size.
    pub fn with_lookahead_window(mut self, window: u64) -> Self {
        self.scheduler.lookahead_window = window;
        self
    }

    /// Set the generation concurrency cap.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.scheduler.max_concurrency = max;
        self
    }

    /// Set the urgent horizon.
    pub fn with_urgent_horizon(mut self, horizon: u64) -> Self {
        self.scheduler.urgent_horizon = horizon;
        self
    }

    /// Set the cache byte budget.
    pub fn with_cache_budget(mut self, bytes: usize) -> Self {
        self.cache.byte_budget = bytes;
        self
    }

    /// Set retry attempts and base delay.
    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.retry.max_attempts = max_attempts;
        self.retry.base_delay_ms = base_delay.as_millis() as u64;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.retry.attempt_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set circuit breaker threshold and cooldown.
    pub fn with_breaker(mut self, failure_threshold: u32, cooldown: Duration) -> Self {
        self.breaker.failure_threshold = failure_threshold;
        self.breaker.cooldown_ms = cooldown.as_millis() as u64;
        self
    }

    /// Set the default quality tier.
    pub fn with_default_tier(mut self, tier: QualityTier) -> Self {
        self.quality.default_tier = tier;
        self
    }

    /// Set the disambiguation threshold.
    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.narrative.similarity_threshold = threshold;
        self
    }

    /// Check settings for values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.lookahead_window == 0 {
            return Err(ConfigError::Invalid("lookahead_window must be at least 1".into()));
        }
        if self.scheduler.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be at least 1".into()));
        }
        if self.cache.byte_budget == 0 {
            return Err(ConfigError::Invalid("cache byte_budget must be positive".into()));
        }
        if self.cache.recency_weight < 0.0 || self.cache.priority_weight < 0.0 {
            return Err(ConfigError::Invalid("eviction weights must be non-negative".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid("failure_threshold must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.narrative.similarity_threshold) {
            return Err(ConfigError::Invalid("similarity_threshold must be within [0, 1]".into()));
        }
        if !(self.quality.latency_smoothing > 0.0 && self.quality.latency_smoothing <= 1.0) {
            return Err(ConfigError::Invalid("latency_smoothing must be within (0, 1]".into()));
        }
        if self.sync.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be positive".into()));
        }
        Ok(())
    }
}
