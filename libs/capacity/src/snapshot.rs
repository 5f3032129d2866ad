//! Recorded capacity data served through [`CapacityApi`].
//!
//! A snapshot holds, per region, the catalog, raw price history, the zone
//! table and placement scores. The controller uses it in dev mode and the
//! integration tests use it in place of a live cloud.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CapacityApiError;
use crate::provider::{
    CapacityApi, CapacityClientFactory, InstanceTypeInfo, PlacementScoreQuery,
    PlacementScoreRecord, PriceHistoryQuery, PriceObservation, ZoneInfo,
};

/// Recorded data for one region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionSnapshot {
    #[serde(default)]
    pub instance_types: Vec<InstanceTypeInfo>,
    #[serde(default)]
    pub spot_prices: Vec<PriceObservation>,
    #[serde(default)]
    pub zones: Vec<ZoneInfo>,
    #[serde(default)]
    pub placement_scores: Vec<PlacementScoreRecord>,
}

/// Recorded data keyed by region name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub regions: BTreeMap<String, RegionSnapshot>,
}

impl Snapshot {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Shift every price timestamp so the newest one lands on `now`.
    ///
    /// Recorded history ages out of the quote window; rebasing keeps it
    /// inside while preserving the relative spacing of observations.
    pub fn rebased_to(mut self, now: DateTime<Utc>) -> Self {
        let newest = self
            .regions
            .values()
            .flat_map(|r| r.spot_prices.iter())
            .filter_map(|p| p.timestamp)
            .max();
        let Some(newest) = newest else {
            return self;
        };

        let shift = now - newest;
        for region in self.regions.values_mut() {
            for price in &mut region.spot_prices {
                if let Some(ts) = price.timestamp.as_mut() {
                    *ts += shift;
                }
            }
        }
        self
    }
}

/// A call that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FaultPoint {
    Catalog,
    Prices,
    Zones,
    Scores,
}

/// A [`CapacityApi`] over one region of a [`Snapshot`].
#[derive(Debug, Clone)]
pub struct SnapshotCapacityApi {
    region: String,
    data: RegionSnapshot,
    faults: BTreeSet<FaultPoint>,
}

impl SnapshotCapacityApi {
    pub fn new(region: impl Into<String>, data: RegionSnapshot) -> Self {
        Self {
            region: region.into(),
            data,
            faults: BTreeSet::new(),
        }
    }

    pub fn with_fault(mut self, point: FaultPoint) -> Self {
        self.faults.insert(point);
        self
    }

    fn check(&self, point: FaultPoint) -> Result<(), CapacityApiError> {
        if self.faults.contains(&point) {
            return Err(CapacityApiError::Transport(format!(
                "injected {point:?} failure in {}",
                self.region
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CapacityApi for SnapshotCapacityApi {
    fn region(&self) -> &str {
        &self.region
    }

    async fn describe_instance_types(&self) -> Result<Vec<InstanceTypeInfo>, CapacityApiError> {
        self.check(FaultPoint::Catalog)?;
        Ok(self.data.instance_types.clone())
    }

    async fn spot_price_history(
        &self,
        query: &PriceHistoryQuery,
    ) -> Result<Vec<PriceObservation>, CapacityApiError> {
        self.check(FaultPoint::Prices)?;
        let observations = self
            .data
            .spot_prices
            .iter()
            .filter(|p| {
                query.instance_types.is_empty() || query.instance_types.contains(&p.instance_type)
            })
            // Undated entries are passed through; the aggregator drops them.
            .filter(|p| match p.timestamp {
                Some(ts) => ts >= query.start && ts <= query.end,
                None => true,
            })
            .cloned()
            .collect();
        Ok(observations)
    }

    async fn availability_zones(&self) -> Result<Vec<ZoneInfo>, CapacityApiError> {
        self.check(FaultPoint::Zones)?;
        Ok(self.data.zones.clone())
    }

    async fn placement_scores(
        &self,
        _query: &PlacementScoreQuery,
    ) -> Result<Vec<PlacementScoreRecord>, CapacityApiError> {
        self.check(FaultPoint::Scores)?;
        Ok(self.data.placement_scores.clone())
    }
}

/// Hands out [`SnapshotCapacityApi`] handles for the regions of a snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotClientFactory {
    snapshot: Arc<Snapshot>,
    faults: BTreeMap<String, BTreeSet<FaultPoint>>,
}

impl SnapshotClientFactory {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Arc::new(snapshot),
            faults: BTreeMap::new(),
        }
    }

    /// Make `point` fail for every handle built for `region`.
    pub fn with_fault(mut self, region: impl Into<String>, point: FaultPoint) -> Self {
        self.faults.entry(region.into()).or_default().insert(point);
        self
    }
}

#[async_trait]
impl CapacityClientFactory for SnapshotClientFactory {
    async fn for_region(&self, region: &str) -> Result<Arc<dyn CapacityApi>, CapacityApiError> {
        let data = self
            .snapshot
            .regions
            .get(region)
            .cloned()
            .ok_or_else(|| CapacityApiError::UnknownRegion(region.to_string()))?;

        let mut api = SnapshotCapacityApi::new(region, data);
        for point in self.faults.get(region).into_iter().flatten() {
            api = api.with_fault(*point);
        }
        Ok(Arc::new(api))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::provider::LINUX_PRODUCT_DESCRIPTION;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
    }

    fn price(instance_type: &str, ts: Option<DateTime<Utc>>) -> PriceObservation {
        PriceObservation {
            instance_type: instance_type.to_string(),
            availability_zone: Some("us-east-1a".to_string()),
            timestamp: ts,
            spot_price: Some("0.5".to_string()),
        }
    }

    fn snapshot() -> Snapshot {
        let region = RegionSnapshot {
            spot_prices: vec![
                price("g5.xlarge", Some(at(0))),
                price("g5.xlarge", Some(at(-3600))),
                price("p4d.24xlarge", Some(at(-60))),
                price("g5.xlarge", None),
            ],
            zones: vec![ZoneInfo {
                zone_name: Some("us-east-1a".to_string()),
                zone_id: Some("use1-az1".to_string()),
            }],
            ..Default::default()
        };
        Snapshot {
            regions: BTreeMap::from([("us-east-1".to_string(), region)]),
        }
    }

    fn query(types: &[&str]) -> PriceHistoryQuery {
        PriceHistoryQuery {
            instance_types: types.iter().map(|t| t.to_string()).collect(),
            start: at(-600),
            end: at(0),
            product_description: LINUX_PRODUCT_DESCRIPTION.to_string(),
        }
    }

    #[tokio::test]
    async fn test_price_history_filters_window_and_types() {
        let factory = SnapshotClientFactory::new(snapshot());
        let api = factory.for_region("us-east-1").await.unwrap();

        let all = api.spot_price_history(&query(&[])).await.unwrap();
        assert_eq!(all.len(), 3);

        let g5 = api.spot_price_history(&query(&["g5.xlarge"])).await.unwrap();
        assert_eq!(g5.len(), 2);
        assert!(g5.iter().any(|p| p.timestamp.is_none()));
    }

    #[tokio::test]
    async fn test_unknown_region() {
        let factory = SnapshotClientFactory::new(snapshot());
        let err = factory.for_region("eu-west-1").await.err().unwrap();
        assert_eq!(err, CapacityApiError::UnknownRegion("eu-west-1".to_string()));
    }

    #[tokio::test]
    async fn test_injected_fault() {
        let factory = SnapshotClientFactory::new(snapshot()).with_fault("us-east-1", FaultPoint::Zones);
        let api = factory.for_region("us-east-1").await.unwrap();

        assert!(api.describe_instance_types().await.is_ok());
        assert!(matches!(
            api.availability_zones().await,
            Err(CapacityApiError::Transport(_))
        ));
    }

    #[test]
    fn test_rebase_moves_newest_to_now() {
        let now = at(86_400);
        let rebased = snapshot().rebased_to(now);
        let prices = &rebased.regions["us-east-1"].spot_prices;

        assert_eq!(prices[0].timestamp, Some(now));
        assert_eq!(prices[1].timestamp, Some(now - TimeDelta::hours(1)));
        assert_eq!(prices[3].timestamp, None);
    }

    #[test]
    fn test_parses_json() {
        let raw = r#"{
            "regions": {
                "us-west-2": {
                    "instanceTypes": [{"instanceType": "g5.xlarge", "gpuInfo": {"gpus": [{"name": "A10G", "count": 1}]}}],
                    "placementScores": [{"zoneId": "usw2-az1", "score": 7}]
                }
            }
        }"#;
        let snap = Snapshot::from_json(raw).unwrap();
        let region = &snap.regions["us-west-2"];
        assert_eq!(region.instance_types[0].instance_type, "g5.xlarge");
        assert_eq!(region.placement_scores[0].score, Some(7));
        assert!(region.spot_prices.is_empty());
    }
}
