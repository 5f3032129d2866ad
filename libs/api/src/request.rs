//! The `LeftoverNodePool` request resource.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::{Condition, ObjectMeta};

pub const GROUP: &str = "gpu.devplatforms.io";
pub const VERSION: &str = "v1alpha1";
pub const KIND: &str = "LeftoverNodePool";

/// Longest steady-state interval a request can ask for (one week).
pub const MAX_REQUEUE_MINUTES: i64 = 7 * 24 * 60;

/// The only condition type the controller writes.
pub const CONDITION_READY: &str = "Ready";

/// Capacity purchase model requested for provisioned nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapacityType {
    #[default]
    #[serde(rename = "spot")]
    Spot,
    #[serde(rename = "on-demand")]
    OnDemand,
}

impl CapacityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::OnDemand => "on-demand",
        }
    }
}

impl std::fmt::Display for CapacityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reasons carried by the `Ready` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyReason {
    InvalidSpec,
    ClientError,
    ListTypesError,
    SpotPriceError,
    ScorerError,
    SelectionError,
    NoQuotes,
    ApplyNodePoolError,
    Reconciled,
}

impl ReadyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidSpec => "InvalidSpec",
            Self::ClientError => "AWSClientError",
            Self::ListTypesError => "ListTypesError",
            Self::SpotPriceError => "SpotPriceError",
            Self::ScorerError => "ScorerError",
            Self::SelectionError => "SelectionError",
            Self::NoQuotes => "NoQuotes",
            Self::ApplyNodePoolError => "ApplyNodePoolError",
            Self::Reconciled => "Reconciled",
        }
    }
}

impl std::fmt::Display for ReadyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request for leftover GPU capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeftoverNodePool {
    pub metadata: ObjectMeta,
    pub spec: LeftoverNodePoolSpec,
    #[serde(default)]
    pub status: LeftoverNodePoolStatus,
}

impl LeftoverNodePool {
    pub fn new(name: impl Into<String>, spec: LeftoverNodePoolSpec) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            spec,
            status: LeftoverNodePoolStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn generation(&self) -> i64 {
        self.metadata.generation
    }

    /// Deterministic name of the downstream NodePool owned by this request.
    pub fn node_pool_name(&self) -> String {
        format!("leftover-{}", self.metadata.name)
    }
}

/// Desired state of a `LeftoverNodePool`.
///
/// Defaults mirror the admission layer so that sparse documents deserialize
/// to the same values the webhook would have filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeftoverNodePoolSpec {
    /// Cloud region, e.g. `us-east-1`.
    pub region: String,

    /// Instance family prefixes (`g5`, `p4d`). Empty matches every family.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub families: Vec<String>,

    /// Exact node class name. Exclusive with `node_class_selector`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_class_name: Option<String>,

    /// Label selector that must match exactly one node class.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_class_selector: BTreeMap<String, String>,

    #[serde(default = "default_min_gpus", rename = "minGPUs")]
    pub min_gpus: i32,

    /// Instance count used when asking for placement scores.
    #[serde(default = "default_target_count")]
    pub target_count: i32,

    /// Minimum acceptable placement score (0..=10).
    #[serde(default = "default_min_spot_score")]
    pub min_spot_score: i32,

    #[serde(default = "default_max_instance_types")]
    pub max_instance_types: i32,

    #[serde(default = "default_max_zones")]
    pub max_zones: i32,

    #[serde(default)]
    pub capacity_type: CapacityType,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub subnet_selector_tags: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub security_group_selector_tags: BTreeMap<String, String>,

    /// Disruption budget as a node percentage, e.g. `10%`.
    #[serde(default = "default_budgets_nodes")]
    pub budgets_nodes: String,

    #[serde(default = "default_consolidate_after")]
    pub consolidate_after: String,

    /// Labels stamped on provisioned nodes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Taints in `key[=value]:Effect` form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<String>,

    #[serde(default = "default_requeue_minutes")]
    pub requeue_minutes: i64,

    /// Switch to on-demand capacity when no spot option clears the threshold.
    #[serde(default = "default_on_demand_fallback")]
    pub on_demand_fallback: bool,
}

fn default_min_gpus() -> i32 {
    1
}

fn default_target_count() -> i32 {
    2
}

fn default_min_spot_score() -> i32 {
    5
}

fn default_max_instance_types() -> i32 {
    5
}

fn default_max_zones() -> i32 {
    2
}

fn default_budgets_nodes() -> String {
    "10%".to_string()
}

fn default_consolidate_after() -> String {
    "2m".to_string()
}

fn default_requeue_minutes() -> i64 {
    7
}

fn default_on_demand_fallback() -> bool {
    true
}

/// How a request points at its node class template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateRef<'a> {
    Named(&'a str),
    Selector(&'a BTreeMap<String, String>),
}

impl LeftoverNodePoolSpec {
    /// A spec for `region` with every other field at its default.
    pub fn for_region(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            families: Vec::new(),
            node_class_name: None,
            node_class_selector: BTreeMap::new(),
            min_gpus: default_min_gpus(),
            target_count: default_target_count(),
            min_spot_score: default_min_spot_score(),
            max_instance_types: default_max_instance_types(),
            max_zones: default_max_zones(),
            capacity_type: CapacityType::default(),
            subnet_selector_tags: BTreeMap::new(),
            security_group_selector_tags: BTreeMap::new(),
            budgets_nodes: default_budgets_nodes(),
            consolidate_after: default_consolidate_after(),
            labels: BTreeMap::new(),
            taints: Vec::new(),
            requeue_minutes: default_requeue_minutes(),
            on_demand_fallback: default_on_demand_fallback(),
        }
    }

    /// The template reference to resolve. An explicit name wins over a selector.
    pub fn template_ref(&self) -> Option<TemplateRef<'_>> {
        match self.node_class_name.as_deref() {
            Some(name) if !name.is_empty() => Some(TemplateRef::Named(name)),
            _ if !self.node_class_selector.is_empty() => {
                Some(TemplateRef::Selector(&self.node_class_selector))
            }
            _ => None,
        }
    }

    /// True when both an explicit name and a non-empty selector are set.
    pub fn has_ambiguous_template_ref(&self) -> bool {
        self.node_class_name.as_deref().is_some_and(|n| !n.is_empty())
            && !self.node_class_selector.is_empty()
    }

    /// Target capacity for scoring, clamped to at least one instance.
    pub fn target_capacity(&self) -> i32 {
        self.target_count.max(1)
    }

    /// Steady-state requeue interval; non-positive values fall back to
    /// `default` and large ones are capped at [`MAX_REQUEUE_MINUTES`].
    pub fn requeue_interval(&self, default: Duration) -> Duration {
        if self.requeue_minutes <= 0 {
            return default;
        }
        let minutes = self.requeue_minutes.min(MAX_REQUEUE_MINUTES) as u64;
        Duration::from_secs(minutes * 60)
    }
}

/// Observed state of a `LeftoverNodePool`. Written only by the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeftoverNodePoolStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selected_instance_types: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selected_zones: Vec<String>,

    /// Price of the applied quote, formatted with four decimals.
    #[serde(default, rename = "lastPriceUSD", skip_serializing_if = "String::is_empty")]
    pub last_price_usd: String,

    #[serde(default)]
    pub last_score: i32,

    /// Capacity type actually applied to the NodePool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_type: Option<CapacityType>,

    /// Time of the last change to the placement decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl LeftoverNodePoolStatus {
    /// Field-by-field comparison deciding whether a status write is needed.
    ///
    /// Conditions are matched by type, so their order is not significant.
    pub fn differs_from(&self, other: &Self) -> bool {
        self.selected_instance_types != other.selected_instance_types
            || self.selected_zones != other.selected_zones
            || self.last_price_usd != other.last_price_usd
            || self.last_score != other.last_score
            || self.capacity_type != other.capacity_type
            || self.last_sync_time != other.last_sync_time
            || !conditions_match(&self.conditions, &other.conditions)
    }
}

fn conditions_match(a: &[Condition], b: &[Condition]) -> bool {
    a.len() == b.len()
        && a.iter().all(|ca| {
            b.iter().any(|cb| {
                ca.type_ == cb.type_
                    && ca.status == cb.status
                    && ca.reason == cb.reason
                    && ca.message == cb.message
                    && ca.observed_generation == cb.observed_generation
                    && ca.last_transition_time == cb.last_transition_time
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ConditionStatus;

    #[test]
    fn test_sparse_document_gets_defaults() {
        let doc = serde_json::json!({
            "metadata": {"name": "gpus"},
            "spec": {"region": "us-east-1", "nodeClassName": "default"}
        });
        let pool: LeftoverNodePool = serde_json::from_value(doc).unwrap();

        assert_eq!(pool.spec.min_gpus, 1);
        assert_eq!(pool.spec.target_count, 2);
        assert_eq!(pool.spec.min_spot_score, 5);
        assert_eq!(pool.spec.capacity_type, CapacityType::Spot);
        assert_eq!(pool.spec.budgets_nodes, "10%");
        assert_eq!(pool.spec.consolidate_after, "2m");
        assert_eq!(pool.spec.requeue_minutes, 7);
        assert!(pool.spec.on_demand_fallback);
        assert_eq!(pool.status, LeftoverNodePoolStatus::default());
    }

    #[test]
    fn test_wire_names() {
        let mut spec = LeftoverNodePoolSpec::for_region("us-west-2");
        spec.capacity_type = CapacityType::OnDemand;
        let value = serde_json::to_value(&spec).unwrap();

        assert_eq!(value["minGPUs"], 1);
        assert_eq!(value["capacityType"], "on-demand");
        assert_eq!(value["onDemandFallback"], true);

        let status = LeftoverNodePoolStatus {
            last_price_usd: "0.1200".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["lastPriceUSD"], "0.1200");
    }

    #[test]
    fn test_template_ref_prefers_explicit_name() {
        let mut spec = LeftoverNodePoolSpec::for_region("us-east-1");
        assert_eq!(spec.template_ref(), None);

        spec.node_class_selector.insert("team".to_string(), "ml".to_string());
        assert!(matches!(spec.template_ref(), Some(TemplateRef::Selector(_))));
        assert!(!spec.has_ambiguous_template_ref());

        spec.node_class_name = Some("gpu".to_string());
        assert_eq!(spec.template_ref(), Some(TemplateRef::Named("gpu")));
        assert!(spec.has_ambiguous_template_ref());
    }

    #[test]
    fn test_requeue_interval_and_target_capacity() {
        let mut spec = LeftoverNodePoolSpec::for_region("us-east-1");
        let fallback = Duration::from_secs(420);
        assert_eq!(spec.requeue_interval(fallback), Duration::from_secs(7 * 60));

        spec.requeue_minutes = 0;
        assert_eq!(spec.requeue_interval(fallback), fallback);

        spec.requeue_minutes = i64::MAX;
        assert_eq!(
            spec.requeue_interval(fallback),
            Duration::from_secs(MAX_REQUEUE_MINUTES as u64 * 60)
        );

        spec.target_count = -3;
        assert_eq!(spec.target_capacity(), 1);
    }

    #[test]
    fn test_status_diff_ignores_condition_order() {
        let ready = Condition::new("Ready", ConditionStatus::True, "Reconciled", "", 2);
        let other = Condition::new("Other", ConditionStatus::False, "X", "", 2);

        let a = LeftoverNodePoolStatus {
            conditions: vec![ready.clone(), other.clone()],
            ..Default::default()
        };
        let b = LeftoverNodePoolStatus {
            conditions: vec![other, ready],
            ..Default::default()
        };
        assert!(!a.differs_from(&b));

        let mut c = b.clone();
        c.last_score = 7;
        assert!(a.differs_from(&c));
    }

    #[test]
    fn test_ready_reason_codes() {
        assert_eq!(ReadyReason::ClientError.as_str(), "AWSClientError");
        assert_eq!(ReadyReason::NoQuotes.to_string(), "NoQuotes");
    }
}
