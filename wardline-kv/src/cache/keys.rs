//! Cache key construction
//!
//! Keys are a pure function of a resource namespace and its identifying
//! parameters. Structured parameters are canonicalized (object keys sorted at
//! every depth) and digested, so two semantically equal queries always map to
//! the same key regardless of field order.
//!
//! Namespaces are fixed so that keys stay interoperable with existing store
//! contents: `patient:{id}`, `vitals:{id}:latest`, `search:{hash}`,
//! `session:{id}`, `counter:{name}`.

use crate::cache::types::CacheKey;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Resource namespace of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Patient cards
    Patient,
    /// Latest vitals snapshots
    Vitals,
    /// Patient search result sets
    Search,
    /// Shift handoff aggregates
    Handoff,
    /// Unread alert lists
    Alerts,
    /// Session records
    Session,
    /// Monotonic counters
    Counter,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Namespace::Patient => "patient",
            Namespace::Vitals => "vitals",
            Namespace::Search => "search",
            Namespace::Handoff => "handoff",
            Namespace::Alerts => "alerts",
            Namespace::Session => "session",
            Namespace::Counter => "counter",
        };
        f.write_str(name)
    }
}

/// Builder for namespaced keys
pub struct CacheKeyBuilder {
    namespace: Namespace,
    segments: Vec<String>,
}

impl CacheKeyBuilder {
    /// Create a new key builder
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            segments: Vec::new(),
        }
    }

    /// Append a literal segment
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Append the digest of structured parameters
    pub fn digest_of<P: Serialize + ?Sized>(self, params: &P) -> Result<Self> {
        let value = serde_json::to_value(params)?;
        Ok(self.segment(digest(&stable_serialize(&value))))
    }

    /// Build the key
    pub fn build(self) -> CacheKey {
        let mut key = self.namespace.to_string();
        for segment in self.segments {
            key.push(':');
            key.push_str(&segment);
        }
        key
    }
}

/// `patient:{id}`
pub fn patient(id: &str) -> CacheKey {
    CacheKeyBuilder::new(Namespace::Patient).segment(id).build()
}

/// `vitals:{id}:latest`
pub fn vitals_latest(patient_id: &str) -> CacheKey {
    CacheKeyBuilder::new(Namespace::Vitals)
        .segment(patient_id)
        .segment("latest")
        .build()
}

/// `search:{hash-of-criteria}`
pub fn search<P: Serialize + ?Sized>(criteria: &P) -> Result<CacheKey> {
    Ok(CacheKeyBuilder::new(Namespace::Search)
        .digest_of(criteria)?
        .build())
}

/// `handoff:{hash-of-criteria}`
pub fn handoff<P: Serialize + ?Sized>(criteria: &P) -> Result<CacheKey> {
    Ok(CacheKeyBuilder::new(Namespace::Handoff)
        .digest_of(criteria)?
        .build())
}

/// `alerts:unread`
pub fn alerts_unread() -> CacheKey {
    CacheKeyBuilder::new(Namespace::Alerts)
        .segment("unread")
        .build()
}

/// `session:{sessionId}`
pub fn session(session_id: &str) -> CacheKey {
    CacheKeyBuilder::new(Namespace::Session)
        .segment(session_id)
        .build()
}

/// `counter:{name}`
pub fn counter(name: &str) -> CacheKey {
    CacheKeyBuilder::new(Namespace::Counter).segment(name).build()
}

/// Serialize a JSON value with object keys sorted at every depth
///
/// Array order is significant and preserved.
pub fn stable_serialize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (name, field)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Serializing a plain string cannot fail
                out.push_str(&Value::String(name.clone()).to_string());
                out.push(':');
                write_canonical(field, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hex digest (128 bits of SHA-256) of a canonical string
fn digest(canonical: &str) -> String {
    let hash = Sha256::digest(canonical.as_bytes());
    hex::encode(&hash[..16])
}
