//! Pass-scoped value types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hardware descriptor for one instance type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceMeta {
    pub instance_type: String,
    pub vcpus: i32,
    pub memory_mib: i64,
    pub gpu_count: i32,
    pub gpu_memory_mib: i64,
}

/// Identity of a quote: one instance type in one zone.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QuoteKey {
    pub instance_type: String,
    pub zone: String,
}

impl QuoteKey {
    pub fn new(instance_type: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            instance_type: instance_type.into(),
            zone: zone.into(),
        }
    }
}

impl std::fmt::Display for QuoteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.instance_type, self.zone)
    }
}

/// One spot price observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotQuote {
    pub instance_type: String,
    pub zone: String,
    pub price_usd: f64,
    pub timestamp: DateTime<Utc>,
}

impl SpotQuote {
    pub fn key(&self) -> QuoteKey {
        QuoteKey::new(self.instance_type.clone(), self.zone.clone())
    }
}

/// Latest quote per (instance type, zone). Iteration order is the key order,
/// which makes every downstream scan deterministic.
pub type QuoteMap = BTreeMap<QuoteKey, SpotQuote>;
