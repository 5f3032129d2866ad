//! Object metadata and status conditions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minimal object metadata shared by stored resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    /// Bumped by the store whenever the spec changes.
    #[serde(default)]
    pub generation: i64,

    /// Opaque version used for optimistic concurrency on writes.
    #[serde(default)]
    pub resource_version: u64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Condition truth value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named status entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub observed_generation: i64,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Build a condition stamped with the current time as its transition time.
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        observed_generation: i64,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            observed_generation,
            last_transition_time: Utc::now(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Find the condition with the given type.
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Insert or replace the condition of the same type.
///
/// The existing `last_transition_time` is preserved unless the status flips,
/// so re-asserting an unchanged condition does not produce a status diff.
pub fn set_condition(conditions: &mut Vec<Condition>, new: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        Some(existing) => {
            let transition_time = if existing.status == new.status {
                existing.last_transition_time
            } else {
                new.last_transition_time
            };
            *existing = Condition {
                last_transition_time: transition_time,
                ..new
            };
        }
        None => conditions.push(new),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn ready(status: ConditionStatus, reason: &str) -> Condition {
        Condition::new("Ready", status, reason, "msg", 1)
    }

    #[test]
    fn test_set_condition_replaces_not_appends() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, ready(ConditionStatus::False, "NoQuotes"));
        set_condition(&mut conditions, ready(ConditionStatus::True, "Reconciled"));

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].reason, "Reconciled");
        assert!(conditions[0].is_true());
    }

    #[test]
    fn test_set_condition_keeps_transition_time_when_status_unchanged() {
        let then = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut first = ready(ConditionStatus::False, "NoQuotes");
        first.last_transition_time = then;
        let mut conditions = vec![first];

        set_condition(&mut conditions, ready(ConditionStatus::False, "SpotPriceError"));
        assert_eq!(conditions[0].last_transition_time, then);
        assert_eq!(conditions[0].reason, "SpotPriceError");

        set_condition(&mut conditions, ready(ConditionStatus::True, "Reconciled"));
        assert_ne!(conditions[0].last_transition_time, then);
    }

    #[test]
    fn test_set_condition_keeps_other_types() {
        let mut conditions = vec![Condition::new("Degraded", ConditionStatus::False, "Ok", "", 1)];
        set_condition(&mut conditions, ready(ConditionStatus::True, "Reconciled"));

        assert_eq!(conditions.len(), 2);
        assert!(find_condition(&conditions, "Degraded").is_some());
        assert!(find_condition(&conditions, "Ready").is_some());
    }
}
