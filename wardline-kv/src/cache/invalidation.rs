//! Cache invalidation
//!
//! Invalidation is exact-key only: a mutation names the keys it makes stale
//! and those keys are deleted. There are no wildcard or pattern scans, so the
//! cost of an invalidation is bounded by the number of keys in its plan.

use crate::cache::keys;
use crate::cache::types::CacheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reason for removing an entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Swept after its deadline
    Expired,

    /// The underlying entity changed in the system of record
    EntityMutated { entity: String },

    /// Session revoked at logout
    Revoked,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expired => f.write_str("TTL expired"),
            Self::EntityMutated { entity } => write!(f, "{} changed", entity),
            Self::Revoked => f.write_str("session revoked"),
        }
    }
}

/// The exact keys a mutation makes stale
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationPlan {
    pub reason: InvalidationReason,
    pub keys: Vec<CacheKey>,
}

impl InvalidationPlan {
    /// Keys derived from a patient: `patient:{id}` and `vitals:{id}:latest`
    pub fn for_patient(patient_id: &str) -> Self {
        Self {
            reason: InvalidationReason::EntityMutated {
                entity: format!("patient:{}", patient_id),
            },
            keys: vec![keys::patient(patient_id), keys::vitals_latest(patient_id)],
        }
    }

    /// The unread alert list
    pub fn for_alerts() -> Self {
        Self {
            reason: InvalidationReason::EntityMutated {
                entity: "alerts".to_string(),
            },
            keys: vec![keys::alerts_unread()],
        }
    }
}

/// Record of an executed invalidation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Why the keys were removed
    pub reason: InvalidationReason,

    /// Keys targeted
    pub keys: Vec<CacheKey>,

    /// How many of them were present
    pub removed: usize,

    /// When the invalidation ran
    pub timestamp: DateTime<Utc>,

    /// Additional context
    pub context: Option<String>,
}

impl InvalidationEvent {
    /// Create a new invalidation event
    pub fn new(reason: InvalidationReason, keys: Vec<CacheKey>, removed: usize) -> Self {
        Self {
            reason,
            keys,
            removed,
            timestamp: Utc::now(),
            context: None,
        }
    }

    /// Add context to the event
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}
