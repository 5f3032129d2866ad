//! Zone-level placement confidence scoring.

use std::collections::HashMap;

use tracing::debug;

use crate::error::ScorerInitError;
use crate::provider::{CapacityApi, PlacementScoreQuery};

/// Score lookup used by the selector.
pub trait ScoreLookup {
    /// Confidence (0..=10) that capacity is obtainable in `zone_name`.
    /// Unknown zones and zones without data score 0.
    fn score_for(&self, instance_type: &str, zone_name: &str) -> i32;
}

/// Placement scores for one pass.
///
/// Scores are fetched once, for the whole candidate set, keyed by zone id.
/// The instance type passed to [`ScoreLookup::score_for`] does not change
/// the result: scores are zone-level.
#[derive(Debug, Clone, Default)]
pub struct PlacementScorer {
    zone_ids: HashMap<String, String>,
    scores: HashMap<String, i32>,
}

impl PlacementScorer {
    /// Resolve the zone name table and fetch scores for `instance_types`.
    pub async fn new(
        api: &dyn CapacityApi,
        instance_types: &[String],
        target_capacity: i32,
    ) -> Result<Self, ScorerInitError> {
        let zones = api
            .availability_zones()
            .await
            .map_err(ScorerInitError::ZoneMapping)?;
        let zone_ids: HashMap<String, String> = zones
            .into_iter()
            .filter_map(|z| match (z.zone_name, z.zone_id) {
                (Some(name), Some(id)) if !name.is_empty() && !id.is_empty() => Some((name, id)),
                _ => None,
            })
            .collect();

        let query = PlacementScoreQuery {
            instance_types: instance_types.to_vec(),
            target_capacity: target_capacity.max(1),
            single_availability_zone: true,
            regions: vec![api.region().to_string()],
        };
        let records = api
            .placement_scores(&query)
            .await
            .map_err(ScorerInitError::Scores)?;

        let mut scores = HashMap::new();
        for record in records {
            let Some(score) = record.score else {
                continue;
            };
            let key = match (record.zone_id, record.region) {
                (Some(zone_id), _) if !zone_id.is_empty() => zone_id,
                (_, Some(region)) if !region.is_empty() => region,
                _ => continue,
            };
            scores.insert(key, score);
        }

        debug!(
            region = api.region(),
            zones = zone_ids.len(),
            scored = scores.len(),
            target_capacity = query.target_capacity,
            "Fetched placement scores"
        );

        Ok(Self { zone_ids, scores })
    }

    /// Scores keyed by zone id.
    pub fn zone_scores(&self) -> &HashMap<String, i32> {
        &self.scores
    }

    /// Zone id for a zone name.
    pub fn zone_id(&self, zone_name: &str) -> Option<&str> {
        self.zone_ids.get(zone_name).map(String::as_str)
    }
}

impl ScoreLookup for PlacementScorer {
    fn score_for(&self, _instance_type: &str, zone_name: &str) -> i32 {
        self.zone_id(zone_name)
            .and_then(|id| self.scores.get(id))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::CapacityApiError;
    use crate::provider::{
        InstanceTypeInfo, PlacementScoreRecord, PriceHistoryQuery, PriceObservation, ZoneInfo,
    };

    struct ScoreApi {
        zones_fail: bool,
        last_query: Mutex<Option<PlacementScoreQuery>>,
    }

    impl ScoreApi {
        fn new() -> Self {
            Self {
                zones_fail: false,
                last_query: Mutex::new(None),
            }
        }
    }

    fn zone(name: Option<&str>, id: Option<&str>) -> ZoneInfo {
        ZoneInfo {
            zone_name: name.map(str::to_string),
            zone_id: id.map(str::to_string),
        }
    }

    fn record(zone_id: Option<&str>, region: Option<&str>, score: Option<i32>) -> PlacementScoreRecord {
        PlacementScoreRecord {
            zone_id: zone_id.map(str::to_string),
            region: region.map(str::to_string),
            score,
        }
    }

    #[async_trait]
    impl CapacityApi for ScoreApi {
        fn region(&self) -> &str {
            "us-east-1"
        }

        async fn describe_instance_types(&self) -> Result<Vec<InstanceTypeInfo>, CapacityApiError> {
            Ok(Vec::new())
        }

        async fn spot_price_history(
            &self,
            _query: &PriceHistoryQuery,
        ) -> Result<Vec<PriceObservation>, CapacityApiError> {
            Ok(Vec::new())
        }

        async fn availability_zones(&self) -> Result<Vec<ZoneInfo>, CapacityApiError> {
            if self.zones_fail {
                return Err(CapacityApiError::Unauthorized("expired token".to_string()));
            }
            Ok(vec![
                zone(Some("us-east-1a"), Some("use1-az1")),
                zone(Some("us-east-1b"), Some("use1-az2")),
                zone(Some("us-east-1c"), Some("use1-az3")),
                zone(Some("us-east-1d"), None),
            ])
        }

        async fn placement_scores(
            &self,
            query: &PlacementScoreQuery,
        ) -> Result<Vec<PlacementScoreRecord>, CapacityApiError> {
            *self.last_query.lock().unwrap() = Some(query.clone());
            Ok(vec![
                record(Some("use1-az1"), Some("us-east-1"), Some(9)),
                record(Some("use1-az2"), None, Some(3)),
                record(Some("use1-az3"), None, None),
                record(None, Some("us-east-1"), Some(6)),
                record(None, None, Some(10)),
            ])
        }
    }

    #[tokio::test]
    async fn test_scores_by_zone_name() {
        let api = ScoreApi::new();
        let types = vec!["g5.xlarge".to_string()];
        let scorer = PlacementScorer::new(&api, &types, 2).await.unwrap();

        assert_eq!(scorer.score_for("g5.xlarge", "us-east-1a"), 9);
        assert_eq!(scorer.score_for("g5.xlarge", "us-east-1b"), 3);
        // Known zone without a recorded score.
        assert_eq!(scorer.score_for("g5.xlarge", "us-east-1c"), 0);
        // Zone without an id, and a zone we have never heard of.
        assert_eq!(scorer.score_for("g5.xlarge", "us-east-1d"), 0);
        assert_eq!(scorer.score_for("g5.xlarge", "eu-west-1a"), 0);
    }

    #[tokio::test]
    async fn test_score_ignores_instance_type() {
        let api = ScoreApi::new();
        let scorer = PlacementScorer::new(&api, &[], 1).await.unwrap();

        assert_eq!(
            scorer.score_for("g5.xlarge", "us-east-1a"),
            scorer.score_for("p4d.24xlarge", "us-east-1a")
        );
    }

    #[tokio::test]
    async fn test_region_level_record_falls_back_to_region_key() {
        let api = ScoreApi::new();
        let scorer = PlacementScorer::new(&api, &[], 1).await.unwrap();
        assert_eq!(scorer.zone_scores().get("us-east-1"), Some(&6));
    }

    #[tokio::test]
    async fn test_target_capacity_clamped() {
        let api = ScoreApi::new();
        PlacementScorer::new(&api, &[], 0).await.unwrap();

        let query = api.last_query.lock().unwrap().clone().unwrap();
        assert_eq!(query.target_capacity, 1);
        assert!(query.single_availability_zone);
        assert_eq!(query.regions, vec!["us-east-1".to_string()]);
    }

    #[tokio::test]
    async fn test_zone_mapping_failure() {
        let api = ScoreApi {
            zones_fail: true,
            ..ScoreApi::new()
        };
        let err = PlacementScorer::new(&api, &[], 1).await.unwrap_err();
        assert!(matches!(err, ScorerInitError::ZoneMapping(_)));
    }
}
