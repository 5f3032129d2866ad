//! The cloud capacity API boundary.
//!
//! Implementations hand back fully decoded records; paging and wire decoding
//! stay inside the implementation. Optional fields mirror what the cloud may
//! omit so the aggregation and scoring code can decide what to drop.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CapacityApiError;

/// Product filter applied to spot price history queries.
pub const LINUX_PRODUCT_DESCRIPTION: &str = "Linux/UNIX (Amazon VPC)";

/// One accelerator model attached to an instance type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuDevice {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub count: Option<i32>,
}

/// Accelerator block of an instance type. Absent for non-GPU types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuInfo {
    #[serde(default)]
    pub gpus: Vec<GpuDevice>,
    #[serde(default)]
    pub total_gpu_memory_mib: Option<i64>,
}

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceTypeInfo {
    pub instance_type: String,
    #[serde(default)]
    pub default_vcpus: Option<i32>,
    #[serde(default)]
    pub memory_mib: Option<i64>,
    #[serde(default)]
    pub gpu_info: Option<GpuInfo>,
}

/// Raw spot price history entry. The price is the string the API returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceObservation {
    pub instance_type: String,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub spot_price: Option<String>,
}

/// Availability zone name/id pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneInfo {
    #[serde(default)]
    pub zone_name: Option<String>,
    #[serde(default)]
    pub zone_id: Option<String>,
}

/// A placement score. Zone-level requests set `zone_id`; region-level ones
/// only set `region`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementScoreRecord {
    #[serde(default)]
    pub zone_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub score: Option<i32>,
}

/// Spot price history query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceHistoryQuery {
    /// Empty means every instance type.
    pub instance_types: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub product_description: String,
}

/// Placement score query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementScoreQuery {
    pub instance_types: Vec<String>,
    /// Instance count, at least one.
    pub target_capacity: i32,
    pub single_availability_zone: bool,
    pub regions: Vec<String>,
}

/// Region-scoped handle to the cloud capacity APIs.
#[async_trait]
pub trait CapacityApi: Send + Sync {
    /// Region this handle is bound to.
    fn region(&self) -> &str;

    /// The full instance type catalog.
    async fn describe_instance_types(&self) -> Result<Vec<InstanceTypeInfo>, CapacityApiError>;

    /// Spot price observations within the query window.
    async fn spot_price_history(
        &self,
        query: &PriceHistoryQuery,
    ) -> Result<Vec<PriceObservation>, CapacityApiError>;

    /// Available zones in the region.
    async fn availability_zones(&self) -> Result<Vec<ZoneInfo>, CapacityApiError>;

    /// Placement confidence scores.
    async fn placement_scores(
        &self,
        query: &PlacementScoreQuery,
    ) -> Result<Vec<PlacementScoreRecord>, CapacityApiError>;
}

/// Builds region-scoped [`CapacityApi`] handles.
#[async_trait]
pub trait CapacityClientFactory: Send + Sync {
    async fn for_region(&self, region: &str) -> Result<Arc<dyn CapacityApi>, CapacityApiError>;
}
