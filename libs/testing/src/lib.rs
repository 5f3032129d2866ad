//! Test fixtures shared by the controller's integration tests.
//!
//! - [`RequestBuilder`]: `LeftoverNodePool` requests with sensible defaults
//! - [`SnapshotBuilder`]: capacity snapshots for one region
//! - [`standard_snapshot`]: 3 GPU instance types x 2 zones with known prices
//!   and scores

use std::collections::BTreeMap;

use chrono::{TimeDelta, Utc};
use leftover_api::{CapacityType, LeftoverNodePool, LeftoverNodePoolSpec, NodeClass};
use leftover_capacity::{
    GpuDevice, GpuInfo, InstanceTypeInfo, PlacementScoreRecord, PriceObservation, RegionSnapshot,
    Snapshot, ZoneInfo,
};

pub const REGION: &str = "us-east-1";
pub const ZONE_A: &str = "us-east-1a";
pub const ZONE_B: &str = "us-east-1b";
pub const ZONE_A_ID: &str = "use1-az1";
pub const ZONE_B_ID: &str = "use1-az2";
pub const NODE_CLASS: &str = "gpu";

/// Builder for `LeftoverNodePool` requests.
///
/// Defaults: region [`REGION`], node class [`NODE_CLASS`], every other field
/// at its schema default.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    name: String,
    spec: LeftoverNodePoolSpec,
}

impl RequestBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let mut spec = LeftoverNodePoolSpec::for_region(REGION);
        spec.node_class_name = Some(NODE_CLASS.to_string());
        Self {
            name: name.into(),
            spec,
        }
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.spec.region = region.into();
        self
    }

    pub fn families(mut self, families: &[&str]) -> Self {
        self.spec.families = families.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn min_gpus(mut self, min_gpus: i32) -> Self {
        self.spec.min_gpus = min_gpus;
        self
    }

    pub fn min_spot_score(mut self, score: i32) -> Self {
        self.spec.min_spot_score = score;
        self
    }

    pub fn capacity_type(mut self, capacity_type: CapacityType) -> Self {
        self.spec.capacity_type = capacity_type;
        self
    }

    pub fn on_demand_fallback(mut self, fallback: bool) -> Self {
        self.spec.on_demand_fallback = fallback;
        self
    }

    pub fn requeue_minutes(mut self, minutes: i64) -> Self {
        self.spec.requeue_minutes = minutes;
        self
    }

    pub fn node_class_name(mut self, name: Option<&str>) -> Self {
        self.spec.node_class_name = name.map(str::to_string);
        self
    }

    pub fn selector(mut self, key: &str, value: &str) -> Self {
        self.spec
            .node_class_selector
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn taint(mut self, taint: &str) -> Self {
        self.spec.taints.push(taint.to_string());
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.spec.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> LeftoverNodePool {
        LeftoverNodePool::new(self.name, self.spec)
    }
}

/// Node classes matching the default request: `gpu` and `gpu-spare`, both
/// labelled `pool=gpu`.
pub fn node_classes() -> Vec<NodeClass> {
    vec![
        NodeClass::new(NODE_CLASS).with_label("pool", "gpu"),
        NodeClass::new("gpu-spare")
            .with_label("pool", "gpu")
            .with_label("tier", "spare"),
    ]
}

/// Builder for a single-region [`Snapshot`].
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    region: String,
    data: RegionSnapshot,
}

impl SnapshotBuilder {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            data: RegionSnapshot::default(),
        }
    }

    pub fn gpu_type(mut self, name: &str, gpus: i32) -> Self {
        self.data.instance_types.push(InstanceTypeInfo {
            instance_type: name.to_string(),
            default_vcpus: Some(4 * gpus),
            memory_mib: Some(16_384 * gpus as i64),
            gpu_info: Some(GpuInfo {
                gpus: vec![GpuDevice {
                    name: "A10G".to_string(),
                    count: Some(gpus),
                }],
                total_gpu_memory_mib: Some(24_576 * gpus as i64),
            }),
        });
        self
    }

    pub fn cpu_type(mut self, name: &str) -> Self {
        self.data.instance_types.push(InstanceTypeInfo {
            instance_type: name.to_string(),
            default_vcpus: Some(2),
            memory_mib: Some(8192),
            gpu_info: None,
        });
        self
    }

    pub fn zone(mut self, name: &str, id: &str) -> Self {
        self.data.zones.push(ZoneInfo {
            zone_name: Some(name.to_string()),
            zone_id: Some(id.to_string()),
        });
        self
    }

    /// A price observed `age` ago.
    pub fn price_aged(mut self, instance_type: &str, zone: &str, price: &str, age: TimeDelta) -> Self {
        self.data.spot_prices.push(PriceObservation {
            instance_type: instance_type.to_string(),
            availability_zone: Some(zone.to_string()),
            timestamp: Some(Utc::now() - age),
            spot_price: Some(price.to_string()),
        });
        self
    }

    /// A price observed one minute ago.
    pub fn price(self, instance_type: &str, zone: &str, price: &str) -> Self {
        self.price_aged(instance_type, zone, price, TimeDelta::minutes(1))
    }

    pub fn score(mut self, zone_id: &str, score: i32) -> Self {
        self.data.placement_scores.push(PlacementScoreRecord {
            zone_id: Some(zone_id.to_string()),
            region: Some(self.region.clone()),
            score: Some(score),
        });
        self
    }

    pub fn build(self) -> Snapshot {
        Snapshot {
            regions: BTreeMap::from([(self.region, self.data)]),
        }
    }
}

/// The instance types, zones and prices of [`standard_snapshot`], cheapest
/// first.
pub const STANDARD_QUOTES: [(&str, &str, &str); 6] = [
    ("g5.xlarge", ZONE_A, "0.10"),
    ("g5.xlarge", ZONE_B, "0.12"),
    ("g5.2xlarge", ZONE_A, "0.15"),
    ("g5.2xlarge", ZONE_B, "0.20"),
    ("g6.xlarge", ZONE_A, "0.22"),
    ("g6.xlarge", ZONE_B, "0.30"),
];

/// Standard snapshot builder without scores: 3 GPU instance types x 2 zones
/// plus one CPU type.
pub fn standard_builder() -> SnapshotBuilder {
    let mut builder = SnapshotBuilder::new(REGION)
        .cpu_type("m5.large")
        .gpu_type("g5.xlarge", 1)
        .gpu_type("g5.2xlarge", 1)
        .gpu_type("g6.xlarge", 1)
        .zone(ZONE_A, ZONE_A_ID)
        .zone(ZONE_B, ZONE_B_ID);
    for (instance_type, zone, price) in STANDARD_QUOTES {
        builder = builder.price(instance_type, zone, price);
    }
    builder
}

/// Standard snapshot with zone scores `a` for [`ZONE_A`] and `b` for
/// [`ZONE_B`].
///
/// With `(2, 6)` and a threshold of 5 the cheapest qualifying quote is
/// `g5.xlarge` in [`ZONE_B`] at 0.12.
pub fn standard_snapshot(a: i32, b: i32) -> Snapshot {
    standard_builder().score(ZONE_A_ID, a).score(ZONE_B_ID, b).build()
}
