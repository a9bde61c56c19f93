//! Store client and health checks
//!
//! `StoreClient` wraps a `KeyValueStore` with a per-operation timeout and
//! retry with exponential backoff for transient failures. `StorePool` owns a
//! shared backend and hands out independent command, publish/subscribe and
//! session handles over it.

use crate::cache::{
    config::StoreConfig,
    invalidation::{InvalidationEvent, InvalidationPlan},
    store::{spawn_auto_cleanup, KeyValueStore, MemoryStore, PubSub},
    types::{CacheKey, CacheStats, CacheValue},
};
use crate::error::{Result, StoreError};
use crate::pubsub::EventBus;
use crate::session::SessionStore;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Health status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Store is healthy and responsive
    Healthy,
    /// Store is responsive but slow (above degraded threshold)
    Degraded,
    /// Store is not responsive or erroring
    Unhealthy,
}

impl HealthStatus {
    /// Convert to HTTP status code equivalent
    pub fn to_http_status_code(&self) -> u16 {
        match self {
            HealthStatus::Healthy => 200,
            HealthStatus::Degraded => 200,
            HealthStatus::Unhealthy => 503,
        }
    }

    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Overall health status
    pub status: HealthStatus,
    /// Response time in milliseconds
    pub response_time_ms: u64,
    /// Timestamp of the health check
    pub timestamp: DateTime<Utc>,
    /// Error message (if unhealthy)
    pub error: Option<String>,
    /// Number of retry attempts made
    pub retry_count: u32,
}

impl HealthCheckResult {
    fn healthy(response_time: Duration, degraded_threshold_ms: u64) -> Self {
        let response_time_ms = response_time.as_millis() as u64;
        let status = if response_time_ms > degraded_threshold_ms {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            response_time_ms,
            timestamp: Utc::now(),
            error: None,
            retry_count: 0,
        }
    }

    fn unhealthy(response_time: Duration, error: &str) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: response_time.as_millis() as u64,
            timestamp: Utc::now(),
            error: Some(error.to_string()),
            retry_count: 0,
        }
    }
}

/// Command handle to a key/value store
#[derive(Clone)]
pub struct StoreClient {
    store: Arc<dyn KeyValueStore>,
    config: StoreConfig,
}

impl StoreClient {
    /// Wrap a store backend
    pub fn new(store: Arc<dyn KeyValueStore>, config: StoreConfig) -> Self {
        Self { store, config }
    }

    /// Client configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Run one store command with timeout and bounded retries
    async fn run<T, F, Fut>(&self, op: &str, command: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(self.config.op_timeout, command()).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::TimeoutError {
                    timeout_ms: self.config.op_timeout.as_millis() as u64,
                    context: op.to_string(),
                }),
            };

            match outcome {
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.backoff_delay(attempt);
                    warn!(
                        "Store {} failed (attempt {}/{}), retrying after {:?}: {}",
                        op,
                        attempt,
                        self.config.max_retries + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Read a raw value
    pub async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        self.run("GET", || self.store.get(key)).await
    }

    /// Write a raw value
    pub async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
        self.run("SET", || self.store.set(key, value.clone(), ttl)).await
    }

    /// Delete keys, returning how many existed
    pub async fn del(&self, keys: &[CacheKey]) -> Result<usize> {
        self.run("DEL", || self.store.del(keys)).await
    }

    /// Increment a counter
    pub async fn incr(&self, key: &str) -> Result<i64> {
        self.run("INCR", || self.store.incr(key)).await
    }

    /// Read and decode a JSON value
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Encode and write a JSON value
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, raw, ttl).await
    }

    /// Delete every key named by the plan
    pub async fn invalidate(&self, plan: InvalidationPlan) -> Result<InvalidationEvent> {
        let removed = self.del(&plan.keys).await?;
        debug!(
            reason = %plan.reason,
            removed = removed,
            "Invalidated {} keys",
            plan.keys.len()
        );
        Ok(InvalidationEvent::new(plan.reason, plan.keys, removed))
    }

    /// Ping the store, retrying with backoff while it stays unreachable
    pub async fn health_check(&self) -> HealthCheckResult {
        let mut retry_count = 0;

        loop {
            let start = Instant::now();

            let result =
                match tokio::time::timeout(self.config.op_timeout, self.store.ping()).await {
                    Ok(Ok(())) => HealthCheckResult::healthy(
                        start.elapsed(),
                        self.config.degraded_threshold_ms,
                    ),
                    Ok(Err(e)) => HealthCheckResult::unhealthy(start.elapsed(), &e.to_string()),
                    Err(_) => HealthCheckResult::unhealthy(
                        start.elapsed(),
                        &format!(
                            "ping timed out after {}ms",
                            self.config.op_timeout.as_millis()
                        ),
                    ),
                };

            if result.status.is_operational() || retry_count >= self.config.max_retries {
                return HealthCheckResult {
                    retry_count,
                    ..result
                };
            }

            retry_count += 1;
            let delay = self.config.backoff_delay(retry_count);
            warn!(
                "Store health check failed (attempt {}/{}), retrying after {:?}",
                retry_count,
                self.config.max_retries + 1,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Shared store backend plus the handles built over it
pub struct StorePool {
    backend: Arc<MemoryStore>,
    config: StoreConfig,
    cleanup: Option<JoinHandle<()>>,
}

impl StorePool {
    /// Create an in-process backend
    ///
    /// Must be called inside a tokio runtime when auto cleanup is enabled.
    pub fn in_memory(config: StoreConfig) -> Result<Self> {
        config.validate().map_err(StoreError::ConfigError)?;

        let backend = Arc::new(MemoryStore::new(config.clone()));
        let cleanup = if config.enable_auto_cleanup {
            Some(spawn_auto_cleanup(backend.clone()))
        } else {
            None
        };

        info!("Store pool ready");
        Ok(Self {
            backend,
            config,
            cleanup,
        })
    }

    /// Command handle
    pub fn client(&self) -> StoreClient {
        StoreClient::new(self.backend.clone(), self.config.clone())
    }

    /// Publish/subscribe handle
    pub fn event_bus(&self) -> EventBus {
        let pubsub: Arc<dyn PubSub> = self.backend.clone();
        EventBus::new(pubsub, self.config.op_timeout)
    }

    /// Session store whose records live for `ttl`
    pub fn sessions(&self, ttl: Duration) -> SessionStore {
        SessionStore::new(self.client(), ttl)
    }

    /// The underlying backend
    pub fn backend(&self) -> &Arc<MemoryStore> {
        &self.backend
    }

    /// Backend statistics
    pub async fn stats(&self) -> CacheStats {
        self.backend.stats().await
    }

    /// Stop background maintenance
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.cleanup.take() {
            handle.abort();
            info!("Store cleanup task stopped");
        }
    }
}

impl Drop for StorePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` commands with a connection error
    struct FlakyStore {
        inner: MemoryStore,
        failures: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryStore::new(StoreConfig::small()),
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }

        fn trip(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::ConnectionError("reset by peer".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl KeyValueStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
            self.trip()?;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
            self.trip()?;
            self.inner.set(key, value, ttl).await
        }

        async fn del(&self, keys: &[CacheKey]) -> Result<usize> {
            self.trip()?;
            self.inner.del(keys).await
        }

        async fn incr(&self, key: &str) -> Result<i64> {
            self.trip()?;
            self.inner.incr(key).await
        }

        async fn ping(&self) -> Result<()> {
            self.trip()
        }
    }

    fn retrying_config(max_retries: u32) -> StoreConfig {
        StoreConfig::builder()
            .max_retries(max_retries)
            .retry_base_delay(Duration::from_millis(10))
            .build()
    }

    #[test]
    fn test_health_status_http_codes() {
        assert_eq!(HealthStatus::Healthy.to_http_status_code(), 200);
        assert_eq!(HealthStatus::Degraded.to_http_status_code(), 200);
        assert_eq!(HealthStatus::Unhealthy.to_http_status_code(), 503);
    }

    #[test]
    fn test_health_status_operational() {
        assert!(HealthStatus::Healthy.is_operational());
        assert!(HealthStatus::Degraded.is_operational());
        assert!(!HealthStatus::Unhealthy.is_operational());
    }

    #[test]
    fn test_degraded_threshold() {
        let fast = HealthCheckResult::healthy(Duration::from_millis(5), 100);
        assert_eq!(fast.status, HealthStatus::Healthy);

        let slow = HealthCheckResult::healthy(Duration::from_millis(150), 100);
        assert_eq!(slow.status, HealthStatus::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let store = Arc::new(FlakyStore::new(2));
        let client = StoreClient::new(store.clone(), retrying_config(2));

        client.set("k", "v".to_string(), None).await.unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert_eq!(client.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let store = Arc::new(FlakyStore::new(10));
        let client = StoreClient::new(store.clone(), retrying_config(1));

        let result = client.get("k").await;
        assert!(matches!(result, Err(StoreError::ConnectionError(_))));
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let pool = StorePool::in_memory(StoreConfig::small()).unwrap();
        let client = pool.client();

        let card = serde_json::json!({"id": "p1", "room": "101"});
        client
            .set_json("patient:p1", &card, Some(Duration::from_secs(300)))
            .await
            .unwrap();

        let back: Option<serde_json::Value> = client.get_json("patient:p1").await.unwrap();
        assert_eq!(back, Some(card));

        client.set("patient:p2", "not json".to_string(), None).await.unwrap();
        let bad: Result<Option<serde_json::Value>> = client.get_json("patient:p2").await;
        assert!(matches!(bad, Err(StoreError::SerializationError(_))));
    }

    #[tokio::test]
    async fn test_invalidate_plan() {
        let pool = StorePool::in_memory(StoreConfig::small()).unwrap();
        let client = pool.client();

        client.set("patient:p1", "{}".to_string(), None).await.unwrap();
        client.set("vitals:p1:latest", "{}".to_string(), None).await.unwrap();
        client.set("patient:p2", "{}".to_string(), None).await.unwrap();

        let event = client.invalidate(InvalidationPlan::for_patient("p1")).await.unwrap();
        assert_eq!(event.removed, 2);
        assert!(client.get("patient:p2").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_reports_unreachable_store() {
        let pool = StorePool::in_memory(retrying_config(2)).unwrap();
        let client = pool.client();

        let healthy = client.health_check().await;
        assert!(healthy.status.is_operational());
        assert_eq!(healthy.retry_count, 0);

        pool.backend().set_reachable(false);
        let unhealthy = client.health_check().await;
        assert_eq!(unhealthy.status, HealthStatus::Unhealthy);
        assert_eq!(unhealthy.retry_count, 2);
        assert!(unhealthy.error.is_some());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = StoreConfig::builder().max_entries(0).build();
        assert!(matches!(
            StorePool::in_memory(config),
            Err(StoreError::ConfigError(_))
        ));
    }
}
