//! Configuration for the store and its clients

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the key/value store and the clients that talk to it
///
/// Defaults favour fail-open behaviour: short operation timeouts, a small
/// retry budget with capped exponential backoff, and no TTL jitter so that
/// resource TTLs are exact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of entries held by the in-process backend
    pub max_entries: usize,

    /// Maximum total size of stored data in bytes
    pub max_size_bytes: usize,

    /// TTL jitter factor (0.0 - 1.0)
    /// Adds random variation to spread out expirations of hot keys
    pub ttl_jitter: f64,

    /// Timeout applied to every individual store operation
    pub op_timeout: Duration,

    /// Retries after the first attempt for transient failures
    pub max_retries: u32,

    /// Backoff before the first retry; doubled on each further retry
    pub retry_base_delay: Duration,

    /// Upper bound for any single backoff delay
    pub retry_max_delay: Duration,

    /// Response time above which a health check reports `Degraded`
    pub degraded_threshold_ms: u64,

    /// Enable automatic sweeping of expired entries
    pub enable_auto_cleanup: bool,

    /// Interval for automatic cleanup sweeps
    pub cleanup_interval: Duration,

    /// Enable LRU eviction policy
    pub enable_lru_eviction: bool,

    /// Buffered messages per pub/sub topic before slow subscribers lag
    pub channel_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            // 64 MB
            max_size_bytes: 64 * 1024 * 1024,
            ttl_jitter: 0.0,
            op_timeout: Duration::from_millis(250),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(50),
            retry_max_delay: Duration::from_secs(2),
            degraded_threshold_ms: 100,
            enable_auto_cleanup: true,
            cleanup_interval: Duration::from_secs(60),
            enable_lru_eviction: true,
            channel_capacity: 1024,
        }
    }
}

impl StoreConfig {
    /// Create a new builder for store configuration
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("max_entries must be greater than 0".to_string());
        }

        if self.max_size_bytes == 0 {
            return Err("max_size_bytes must be greater than 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err("ttl_jitter must be between 0.0 and 1.0".to_string());
        }

        if self.op_timeout.is_zero() {
            return Err("op_timeout must be greater than 0".to_string());
        }

        if self.retry_base_delay > self.retry_max_delay {
            return Err("retry_base_delay must not exceed retry_max_delay".to_string());
        }

        if self.channel_capacity == 0 {
            return Err("channel_capacity must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Apply the configured jitter to a resource TTL
    pub fn ttl_with_jitter(&self, ttl: Duration) -> Duration {
        if self.ttl_jitter == 0.0 {
            return ttl;
        }

        let base_secs = ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(1.0);

        Duration::from_secs_f64(final_secs)
    }

    /// Backoff before retry number `attempt` (1-based), capped at `retry_max_delay`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_base_delay
            .saturating_mul(factor)
            .min(self.retry_max_delay)
    }
}

/// Builder for store configuration
#[derive(Debug, Default)]
pub struct StoreConfigBuilder {
    max_entries: Option<usize>,
    max_size_bytes: Option<usize>,
    ttl_jitter: Option<f64>,
    op_timeout: Option<Duration>,
    max_retries: Option<u32>,
    retry_base_delay: Option<Duration>,
    retry_max_delay: Option<Duration>,
    degraded_threshold_ms: Option<u64>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
    enable_lru_eviction: Option<bool>,
    channel_capacity: Option<usize>,
}

impl StoreConfigBuilder {
    /// Set maximum number of entries
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Set maximum store size in bytes
    pub fn max_size_bytes(mut self, size: usize) -> Self {
        self.max_size_bytes = Some(size);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Set the per-operation timeout
    pub fn op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = Some(timeout);
        self
    }

    /// Set the retry budget for transient failures
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Set the first backoff delay
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = Some(delay);
        self
    }

    /// Set the backoff cap
    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.retry_max_delay = Some(delay);
        self
    }

    /// Set the degraded response-time threshold for health checks
    pub fn degraded_threshold_ms(mut self, threshold: u64) -> Self {
        self.degraded_threshold_ms = Some(threshold);
        self
    }

    /// Enable or disable automatic cleanup
    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Enable or disable LRU eviction
    pub fn enable_lru_eviction(mut self, enable: bool) -> Self {
        self.enable_lru_eviction = Some(enable);
        self
    }

    /// Set per-topic channel capacity
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = Some(capacity);
        self
    }

    /// Build the store configuration
    pub fn build(self) -> StoreConfig {
        let defaults = StoreConfig::default();

        StoreConfig {
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            max_size_bytes: self.max_size_bytes.unwrap_or(defaults.max_size_bytes),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            op_timeout: self.op_timeout.unwrap_or(defaults.op_timeout),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            retry_base_delay: self.retry_base_delay.unwrap_or(defaults.retry_base_delay),
            retry_max_delay: self.retry_max_delay.unwrap_or(defaults.retry_max_delay),
            degraded_threshold_ms: self
                .degraded_threshold_ms
                .unwrap_or(defaults.degraded_threshold_ms),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            enable_lru_eviction: self
                .enable_lru_eviction
                .unwrap_or(defaults.enable_lru_eviction),
            channel_capacity: self.channel_capacity.unwrap_or(defaults.channel_capacity),
        }
    }
}

/// Preset configurations
impl StoreConfig {
    /// Small footprint, no retries; used by tests and the one-shot CLI
    pub fn small() -> Self {
        Self {
            max_entries: 1_000,
            max_size_bytes: 8 * 1024 * 1024,
            max_retries: 0,
            enable_auto_cleanup: false,
            ..Default::default()
        }
    }
}

/// Time-to-live for each cached resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTtls {
    /// `patient:{id}` cards
    pub patient: Duration,
    /// `vitals:{id}:latest` snapshots
    pub vitals: Duration,
    /// `search:{hash}` result sets
    pub search: Duration,
    /// `handoff:{hash}` shift reports
    pub handoff: Duration,
    /// `alerts:unread` lists
    pub alerts: Duration,
    /// `session:{id}` records
    pub session: Duration,
}

impl Default for ResourceTtls {
    fn default() -> Self {
        Self {
            patient: Duration::from_secs(300),
            vitals: Duration::from_secs(60),
            search: Duration::from_secs(120),
            handoff: Duration::from_secs(300),
            alerts: Duration::from_secs(30),
            session: Duration::from_secs(86_400),
        }
    }
}
