//! Key, value and counter types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespaced key such as `vitals:p1:latest`
pub type CacheKey = String;

/// Serialized payload, stored verbatim
pub type CacheValue = String;

/// Backend counters, reported by `/health`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Live entries at snapshot time
    pub entries: usize,
    pub size_bytes: usize,
    /// Entries pushed out by the size or count limit
    pub evicted: u64,
    /// Entries dropped at their deadline, on read or by the sweeper
    pub expired: u64,
    /// Entries removed by `del` or `clear`
    pub deleted: u64,
    /// Messages published on any topic
    pub published: u64,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of lookups served from the store, 0.0 when there were none
    pub fn hit_ratio(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            n => self.hits as f64 / n as f64,
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries ({} bytes), {}/{} hits, {} evicted, {} expired",
            self.entries,
            self.size_bytes,
            self.hits,
            self.lookups(),
            self.evicted,
            self.expired
        )
    }
}
