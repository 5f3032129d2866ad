//! Typed model of the downstream Karpenter `NodePool`.
//!
//! The controller owns a small, fixed subset of the NodePool: the node class
//! reference, four single-valued requirements, node labels and taints, and
//! the disruption block. The struct is converted into the structured document
//! the store expects only at the boundary, via [`NodePool::to_document`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::request::{CapacityType, LeftoverNodePool};

pub const LABEL_ARCH: &str = "kubernetes.io/arch";
pub const LABEL_CAPACITY_TYPE: &str = "karpenter.sh/capacity-type";
pub const LABEL_INSTANCE_TYPE: &str = "node.kubernetes.io/instance-type";
pub const LABEL_ZONE: &str = "topology.kubernetes.io/zone";

pub const ARCH_AMD64: &str = "amd64";

/// Label marking NodePools created by this controller.
pub const MANAGED_BY_LABEL: &str = "managed-by";

/// Field manager used for server-side apply.
pub const FIELD_OWNER: &str = "leftover";

const NODE_CLASS_GROUP: &str = "karpenter.k8s.aws";
const NODE_CLASS_KIND: &str = "EC2NodeClass";
const CONSOLIDATION_POLICY: &str = "WhenEmptyOrUnderutilized";

/// The placement decision for one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub node_class: String,
    pub instance_type: String,
    pub zone: String,
    pub capacity_type: CapacityType,
}

/// An `In` requirement over a node label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub key: String,
    pub values: Vec<String>,
}

impl Requirement {
    pub fn single(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            values: vec![value.into()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

impl TaintEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSchedule => "NoSchedule",
            Self::PreferNoSchedule => "PreferNoSchedule",
            Self::NoExecute => "NoExecute",
        }
    }
}

impl std::str::FromStr for TaintEffect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NoSchedule" => Ok(Self::NoSchedule),
            "PreferNoSchedule" => Ok(Self::PreferNoSchedule),
            "NoExecute" => Ok(Self::NoExecute),
            other => Err(format!(
                "unknown effect {other:?}, expected NoSchedule, PreferNoSchedule or NoExecute"
            )),
        }
    }
}

/// A node taint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    pub value: Option<String>,
    pub effect: TaintEffect,
}

impl Taint {
    /// Parse `key[=value]:Effect`.
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        let invalid = |reason: &str| ApiError::InvalidTaint {
            taint: raw.to_string(),
            reason: reason.to_string(),
        };

        let (kv, effect) = raw
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing ':Effect' suffix"))?;
        let effect = effect.parse::<TaintEffect>().map_err(|e| invalid(&e))?;

        let (key, value) = match kv.split_once('=') {
            Some((k, v)) => (k, Some(v.to_string())),
            None => (kv, None),
        };
        if key.is_empty() {
            return Err(invalid("empty key"));
        }

        Ok(Self {
            key: key.to_string(),
            value,
            effect,
        })
    }
}

/// The node template portion of a NodePool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePoolTemplate {
    pub node_class: String,
    pub labels: BTreeMap<String, String>,
    pub requirements: Vec<Requirement>,
    pub taints: Vec<Taint>,
}

/// A NodePool pinned to a single SKU in a single zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePool {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub template: NodePoolTemplate,
    pub consolidate_after: String,
    pub budgets_nodes: String,
}

impl NodePool {
    /// Build the NodePool that realises `placement` for `request`.
    pub fn for_placement(request: &LeftoverNodePool, placement: &Placement) -> Result<Self, ApiError> {
        let taints = request
            .spec
            .taints
            .iter()
            .map(|t| Taint::parse(t))
            .collect::<Result<Vec<_>, _>>()?;

        let requirements = vec![
            Requirement::single(LABEL_ARCH, ARCH_AMD64),
            Requirement::single(LABEL_CAPACITY_TYPE, placement.capacity_type.as_str()),
            Requirement::single(LABEL_INSTANCE_TYPE, placement.instance_type.clone()),
            Requirement::single(LABEL_ZONE, placement.zone.clone()),
        ];

        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_BY_LABEL.to_string(), FIELD_OWNER.to_string());

        Ok(Self {
            name: request.node_pool_name(),
            labels,
            template: NodePoolTemplate {
                node_class: placement.node_class.clone(),
                labels: request.spec.labels.clone(),
                requirements,
                taints,
            },
            consolidate_after: request.spec.consolidate_after.clone(),
            budgets_nodes: request.spec.budgets_nodes.clone(),
        })
    }

    /// Value of the single-valued requirement on `key`, if present.
    pub fn requirement(&self, key: &str) -> Option<&str> {
        self.template
            .requirements
            .iter()
            .find(|r| r.key == key)
            .and_then(|r| r.values.first())
            .map(String::as_str)
    }

    /// Render as a `karpenter.sh/v1` NodePool document.
    pub fn to_document(&self) -> serde_json::Value {
        let requirements: Vec<serde_json::Value> = self
            .template
            .requirements
            .iter()
            .map(|r| {
                serde_json::json!({
                    "key": r.key,
                    "operator": "In",
                    "values": r.values,
                })
            })
            .collect();

        let mut template_spec = serde_json::json!({
            "nodeClassRef": {
                "group": NODE_CLASS_GROUP,
                "kind": NODE_CLASS_KIND,
                "name": self.template.node_class,
            },
            "requirements": requirements,
        });
        if !self.template.taints.is_empty() {
            let taints: Vec<serde_json::Value> = self
                .template
                .taints
                .iter()
                .map(|t| {
                    let mut taint = serde_json::json!({
                        "key": t.key,
                        "effect": t.effect.as_str(),
                    });
                    if let Some(value) = &t.value {
                        taint["value"] = serde_json::Value::String(value.clone());
                    }
                    taint
                })
                .collect();
            template_spec["taints"] = serde_json::Value::Array(taints);
        }

        let mut template = serde_json::json!({ "spec": template_spec });
        if !self.template.labels.is_empty() {
            template["metadata"] = serde_json::json!({ "labels": self.template.labels });
        }

        serde_json::json!({
            "apiVersion": "karpenter.sh/v1",
            "kind": "NodePool",
            "metadata": {
                "name": self.name,
                "labels": self.labels,
            },
            "spec": {
                "template": template,
                "disruption": {
                    "consolidationPolicy": CONSOLIDATION_POLICY,
                    "consolidateAfter": self.consolidate_after,
                    "budgets": [{ "nodes": self.budgets_nodes }],
                },
            },
        })
    }
}
