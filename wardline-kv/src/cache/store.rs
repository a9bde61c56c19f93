//! Store traits and the in-process backend
//!
//! `KeyValueStore` is the command path (get/set/del/incr) and `PubSub` is the
//! publish/subscribe path. They are separate traits so that callers hold
//! independent handles for each, even when one backend serves both.

use crate::cache::{
    config::StoreConfig,
    entry::CacheEntry,
    invalidation::{InvalidationEvent, InvalidationReason},
    types::{CacheKey, CacheStats, CacheValue},
};
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Command interface of a shared TTL-capable key/value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value; expired entries read as absent
    async fn get(&self, key: &str) -> Result<Option<CacheValue>>;

    /// Create or overwrite a value, expiring after `ttl` when given
    async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()>;

    /// Delete the given keys, returning how many existed
    async fn del(&self, keys: &[CacheKey]) -> Result<usize>;

    /// Increment an integer counter, creating it at 1
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Round-trip to the backend
    async fn ping(&self) -> Result<()>;
}

/// Publish/subscribe interface of the store
///
/// Delivery is fire-and-forget: a message reaches the subscribers that exist
/// at publish time and is not retained for later subscribers.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish a payload, returning the number of subscribers reached
    async fn publish(&self, topic: &str, payload: CacheValue) -> Result<usize>;

    /// Open an independent subscription to a topic
    async fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<CacheValue>>;
}

/// In-process store backend
///
/// This implementation provides:
/// - Thread-safe async access via RwLock
/// - TTL expiry checked on read and by a background sweeper
/// - LRU eviction when size limits are reached
/// - Topic channels where every subscriber receives every message
/// - A reachability switch for exercising degraded paths
pub struct MemoryStore {
    /// Store configuration
    config: StoreConfig,

    /// Key/value storage
    state: RwLock<StoreState>,

    /// Topic -> broadcast sender
    channels: Mutex<HashMap<String, broadcast::Sender<CacheValue>>>,

    /// When false every operation fails with a connection error
    reachable: AtomicBool,
}

/// Internal storage
struct StoreState {
    /// Main storage: key -> entry
    entries: HashMap<CacheKey, CacheEntry>,

    /// LRU tracking: maintains access order
    lru_queue: VecDeque<CacheKey>,

    /// Current statistics
    stats: CacheStats,

    /// Total size of stored data in bytes
    current_size_bytes: usize,
}

impl MemoryStore {
    /// Create a new store with the given configuration
    pub fn new(config: StoreConfig) -> Self {
        info!(
            max_entries = config.max_entries,
            max_size_bytes = config.max_size_bytes,
            "Initializing in-process store"
        );

        let state = StoreState {
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            stats: CacheStats::default(),
            current_size_bytes: 0,
        };

        Self {
            config,
            state: RwLock::new(state),
            channels: Mutex::new(HashMap::new()),
            reachable: AtomicBool::new(true),
        }
    }

    /// Store configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Simulate the backend going away (or coming back)
    pub fn set_reachable(&self, reachable: bool) {
        if reachable {
            info!("Store marked reachable");
        } else {
            warn!("Store marked unreachable");
        }
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::ConnectionError("store unreachable".to_string()))
        }
    }

    /// Remove all expired entries
    pub async fn cleanup_expired(&self) -> Option<InvalidationEvent> {
        let mut state = self.state.write().await;

        let expired_keys: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        if expired_keys.is_empty() {
            return None;
        }

        for key in &expired_keys {
            Self::remove_entry(&mut state, key);
        }
        state.stats.expired += expired_keys.len() as u64;

        debug!("Cleaned up {} expired entries", expired_keys.len());
        let removed = expired_keys.len();
        Some(
            InvalidationEvent::new(InvalidationReason::Expired, expired_keys, removed)
                .with_context(format!("Cleaned up {} expired entries", removed)),
        )
    }

    /// Clear all entries
    pub async fn clear(&self) {
        let mut state = self.state.write().await;

        let count = state.entries.len();
        state.entries.clear();
        state.lru_queue.clear();
        state.current_size_bytes = 0;
        state.stats.entries = 0;
        state.stats.deleted += count as u64;

        info!("Cleared {} entries from store", count);
    }

    /// Get store statistics
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        let mut stats = state.stats.clone();
        stats.entries = state.entries.len();
        stats.size_bytes = state.current_size_bytes;
        stats
    }

    /// Number of entries, including ones expired but not yet swept
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// Number of live subscriptions on a topic
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.channels
            .lock()
            .await
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    fn remove_entry(state: &mut StoreState, key: &str) -> bool {
        if let Some(entry) = state.entries.remove(key) {
            state.lru_queue.retain(|k| k != key);
            state.current_size_bytes = state
                .current_size_bytes
                .saturating_sub(entry.metadata.size_bytes);
            true
        } else {
            false
        }
    }

    fn touch(&self, state: &mut StoreState, key: &str) {
        if self.config.enable_lru_eviction {
            state.lru_queue.retain(|k| k != key);
            state.lru_queue.push_back(key.to_string());
        }
    }

    /// Evict entries if needed to make room for a new entry
    fn evict_if_needed(&self, state: &mut StoreState, needed_size: usize) -> Result<()> {
        while state.entries.len() >= self.config.max_entries {
            match state.lru_queue.pop_front() {
                Some(key) => {
                    debug!("Evicting entry due to max_entries limit: {}", key);
                    Self::remove_entry(state, &key);
                    state.stats.evicted += 1;
                }
                None => break,
            }
        }

        while state.current_size_bytes + needed_size > self.config.max_size_bytes {
            match state.lru_queue.pop_front() {
                Some(key) => {
                    debug!("Evicting entry due to size limit: {}", key);
                    Self::remove_entry(state, &key);
                    state.stats.evicted += 1;
                }
                None => {
                    warn!("Cannot evict more entries, store size limit exceeded");
                    return Err(StoreError::CapacityError {
                        limit_bytes: self.config.max_size_bytes,
                    });
                }
            }
        }

        Ok(())
    }

    fn insert_entry(&self, state: &mut StoreState, entry: CacheEntry) -> Result<()> {
        let key = entry.key.clone();
        Self::remove_entry(state, &key);
        self.evict_if_needed(state, entry.metadata.size_bytes)?;

        state.current_size_bytes += entry.metadata.size_bytes;
        state.entries.insert(key.clone(), entry);
        state.lru_queue.push_back(key);
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        self.ensure_reachable()?;
        let mut state = self.state.write().await;

        let expired = match state.entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => {
                debug!("Store miss: {}", key);
                state.stats.misses += 1;
                return Ok(None);
            }
        };

        if expired {
            debug!("Store entry expired: {}", key);
            Self::remove_entry(&mut state, key);
            state.stats.misses += 1;
            state.stats.expired += 1;
            return Ok(None);
        }

        let value = match state.entries.get_mut(key) {
            Some(entry) => {
                entry.mark_read();
                entry.value.clone()
            }
            None => return Ok(None),
        };
        state.stats.hits += 1;
        self.touch(&mut state, key);

        debug!("Store hit: {}", key);
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
        self.ensure_reachable()?;

        let ttl = ttl.map(|ttl| self.config.ttl_with_jitter(ttl));
        let entry = CacheEntry::new(key.to_string(), value, ttl);

        let mut state = self.state.write().await;
        self.insert_entry(&mut state, entry)?;
        debug!(key = key, ttl = ?ttl, "Stored entry");
        Ok(())
    }

    async fn del(&self, keys: &[CacheKey]) -> Result<usize> {
        self.ensure_reachable()?;
        let mut state = self.state.write().await;

        let mut removed = 0;
        for key in keys {
            if Self::remove_entry(&mut state, key) {
                removed += 1;
            }
        }
        state.stats.deleted += removed as u64;

        debug!("Deleted {}/{} keys", removed, keys.len());
        Ok(removed)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.ensure_reachable()?;
        let mut state = self.state.write().await;

        let live = state
            .entries
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false);

        if live {
            let next = match state.entries.get(key) {
                Some(entry) => entry.value.parse::<i64>().map_err(|_| StoreError::WrongType {
                    key: key.to_string(),
                    expected: "integer",
                })? + 1,
                None => 1,
            };

            let old_size = state.entries.get(key).map(|e| e.metadata.size_bytes).unwrap_or(0);
            if let Some(entry) = state.entries.get_mut(key) {
                entry.update_value(next.to_string());
                let new_size = entry.metadata.size_bytes;
                state.current_size_bytes = state.current_size_bytes - old_size + new_size;
            }
            self.touch(&mut state, key);
            Ok(next)
        } else {
            self.insert_entry(
                &mut state,
                CacheEntry::new(key.to_string(), "1".to_string(), None),
            )?;
            Ok(1)
        }
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_reachable()
    }
}

#[async_trait]
impl PubSub for MemoryStore {
    async fn publish(&self, topic: &str, payload: CacheValue) -> Result<usize> {
        self.ensure_reachable()?;

        let delivered = {
            let mut channels = self.channels.lock().await;
            match channels.get(topic) {
                Some(tx) => match tx.send(payload) {
                    Ok(receivers) => receivers,
                    Err(_) => {
                        // Every subscriber went away; drop the idle channel
                        channels.remove(topic);
                        0
                    }
                },
                None => 0,
            }
        };

        self.state.write().await.stats.published += 1;
        debug!(topic = topic, receivers = delivered, "Published message");
        Ok(delivered)
    }

    async fn subscribe(&self, topic: &str) -> Result<broadcast::Receiver<CacheValue>> {
        self.ensure_reachable()?;

        let mut channels = self.channels.lock().await;
        let capacity = self.config.channel_capacity;
        let tx = channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(capacity).0);

        debug!(topic = topic, "Opened subscription");
        Ok(tx.subscribe())
    }
}

/// Background task sweeping expired entries at the configured interval
pub fn spawn_auto_cleanup(store: Arc<MemoryStore>) -> JoinHandle<()> {
    let interval = store.config.cleanup_interval;

    info!("Starting automatic store cleanup task (interval: {:?})", interval);

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            if let Some(event) = store.cleanup_expired().await {
                debug!("Auto cleanup removed {} entries", event.removed);
            }
        }
    })
}
