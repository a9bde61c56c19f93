//! # Wardline Key/Value Layer (wardline-kv)
//!
//! The shared store that Wardline processes use for cached reads, sessions,
//! counters and event fan-out.
//!
//! ## Features
//!
//! - TTL key/value commands (`get`, `set`, `del`, `incr`) behind an async trait
//! - Per-operation timeouts with bounded exponential-backoff retries
//! - Health checks with a degraded threshold
//! - Session records with a fixed lifetime
//! - Typed publish/subscribe where each subscriber sees every event
//!
//! ## Quick Start
//!
//! ```no_run
//! use wardline_kv::{SessionRecord, StoreConfig, StorePool};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> wardline_kv::Result<()> {
//!     let pool = StorePool::in_memory(StoreConfig::default())?;
//!
//!     let sessions = pool.sessions(Duration::from_secs(86_400));
//!     let record = SessionRecord::new("1", "alice@hospital.com", "nurse");
//!     sessions.store(&record).await?;
//!
//!     let health = pool.client().health_check().await;
//!     println!("Store status: {:?} ({}ms)", health.status, health.response_time_ms);
//!     Ok(())
//! }
//! ```
//!
//! ## Events
//!
//! ```no_run
//! use wardline_kv::{StoreConfig, StorePool};
//!
//! #[tokio::main]
//! async fn main() -> wardline_kv::Result<()> {
//!     let pool = StorePool::in_memory(StoreConfig::default())?;
//!     let bus = pool.event_bus();
//!
//!     let _sub = bus
//!         .subscribe("alerts", |alert: serde_json::Value| println!("alert: {}", alert))
//!         .await?;
//!     bus.publish("alerts", &serde_json::json!({"severity": "critical"})).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod connection;
pub mod error;
pub mod pubsub;
pub mod session;

// Re-export main types for convenience
pub use cache::{
    keys, CacheEntry, CacheKey, CacheKeyBuilder, CacheMetadata, CacheStats, CacheValue,
    InvalidationEvent, InvalidationPlan, InvalidationReason, KeyValueStore, MemoryStore,
    Namespace, PubSub, ResourceTtls, StoreConfig, StoreConfigBuilder,
};
pub use connection::{HealthCheckResult, HealthStatus, StoreClient, StorePool};
pub use error::{Result, StoreError};
pub use pubsub::{EventBus, Subscription};
pub use session::{new_session_id, SessionRecord, SessionStore};
