//! # Shared Key/Value Store
//!
//! Storage primitives behind the cache-aside repository and session store.
//!
//! ## Features
//!
//! - **TTL-Based Expiration**: entries stop being readable at their deadline
//! - **Deterministic Keys**: fixed namespaces plus digests of canonicalized parameters
//! - **Exact-Key Invalidation**: mutations name the keys they make stale
//! - **LRU Eviction**: bounded memory with least-recently-used eviction
//! - **Pub/Sub Channels**: every subscriber on a topic receives every message
//!
//! ## Example
//!
//! ```rust
//! use wardline_kv::cache::{keys, KeyValueStore, MemoryStore, StoreConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> wardline_kv::Result<()> {
//! let store = MemoryStore::new(StoreConfig::small());
//!
//! let key = keys::vitals_latest("p1");
//! store.set(&key, "{\"heartRate\":78}".to_string(), Some(Duration::from_secs(60))).await?;
//!
//! if let Some(value) = store.get(&key).await? {
//!     println!("Store hit: {}", value);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod invalidation;
pub mod keys;
pub mod store;
pub mod types;

pub use config::{ResourceTtls, StoreConfig, StoreConfigBuilder};
pub use entry::{CacheEntry, CacheMetadata};
pub use invalidation::{InvalidationEvent, InvalidationPlan, InvalidationReason};
pub use keys::{CacheKeyBuilder, Namespace};
pub use store::{spawn_auto_cleanup, KeyValueStore, MemoryStore, PubSub};
pub use types::{CacheKey, CacheStats, CacheValue};
