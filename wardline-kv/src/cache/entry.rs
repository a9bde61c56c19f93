//! Stored entries and their deadlines

use crate::cache::types::{CacheKey, CacheValue};
use std::time::Duration;
use tokio::time::Instant;

/// Bytes charged per entry on top of key and value
const ENTRY_OVERHEAD: usize = 64;

/// A value with an optional deadline
///
/// Deadlines are `tokio::time::Instant`s, so a paused test clock drives
/// expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: CacheValue,
    /// `None` for entries that never expire, such as counters
    pub deadline: Option<Instant>,
    pub metadata: CacheMetadata,
}

/// Bookkeeping used by eviction and the size limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetadata {
    pub written_at: Instant,
    pub reads: u64,
    pub size_bytes: usize,
}

impl CacheEntry {
    pub fn new(key: CacheKey, value: CacheValue, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        let size_bytes = charge(&key, &value);
        Self {
            deadline: ttl.map(|ttl| now + ttl),
            metadata: CacheMetadata {
                written_at: now,
                reads: 0,
                size_bytes,
            },
            key,
            value,
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }

    /// Time left before the deadline; `None` once expired or without one
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.deadline?
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero())
    }

    pub fn mark_read(&mut self) {
        self.metadata.reads += 1;
    }

    /// Swap the value, keeping the deadline (`INCR` semantics)
    pub fn update_value(&mut self, value: CacheValue) {
        self.metadata.size_bytes = charge(&self.key, &value);
        self.value = value;
    }
}

fn charge(key: &str, value: &str) -> usize {
    key.len() + value.len() + ENTRY_OVERHEAD
}
