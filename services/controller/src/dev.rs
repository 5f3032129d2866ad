//! Dev harness inputs: a capacity snapshot and a store seed.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use leftover_api::{validate_spec, LeftoverNodePool, NodeClass};
use leftover_capacity::Snapshot;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::InMemoryStore;

/// Node classes and requests to load into an empty store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seed {
    #[serde(default)]
    pub node_classes: Vec<NodeClass>,
    #[serde(default)]
    pub requests: Vec<LeftoverNodePool>,
}

impl Seed {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("parsing seed document")
    }

    /// Reject the seed if any request fails validation.
    pub fn validate(&self) -> Result<()> {
        for request in &self.requests {
            validate_spec(&request.spec)
                .with_context(|| format!("seed request {} is invalid", request.name()))?;
        }
        Ok(())
    }
}

/// Validate `seed` and load it into `store`. Returns the number of requests.
pub async fn load_seed(store: &InMemoryStore, seed: Seed) -> Result<usize> {
    seed.validate()?;

    for class in seed.node_classes {
        store.insert_node_class(class).await;
    }
    let count = seed.requests.len();
    for request in seed.requests {
        store.upsert_request(request).await;
    }
    Ok(count)
}

pub async fn load_seed_file(store: &InMemoryStore, path: &Path) -> Result<usize> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading seed file {}", path.display()))?;
    let count = load_seed(store, Seed::from_json(&raw)?).await?;
    info!(path = %path.display(), requests = count, "Seed loaded");
    Ok(count)
}

/// Read a capacity snapshot and rebase its price history to now.
pub async fn load_snapshot_file(path: &Path) -> Result<Snapshot> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading snapshot file {}", path.display()))?;
    let snapshot = Snapshot::from_json(&raw)
        .with_context(|| format!("parsing snapshot file {}", path.display()))?;
    info!(path = %path.display(), regions = snapshot.regions.len(), "Snapshot loaded");
    Ok(snapshot.rebased_to(Utc::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ResourceStore;

    const SEED: &str = r#"{
        "nodeClasses": [{"metadata": {"name": "gpu", "labels": {"pool": "gpu"}}}],
        "requests": [
            {
                "metadata": {"name": "train"},
                "spec": {"region": "us-east-1", "families": ["g5"], "nodeClassName": "gpu"}
            },
            {
                "metadata": {"name": "infer"},
                "spec": {"region": "us-west-2", "nodeClassSelector": {"pool": "gpu"}, "minSpotScore": 8}
            }
        ]
    }"#;

    #[tokio::test]
    async fn test_load_seed_applies_defaults() {
        let store = InMemoryStore::new();
        let count = load_seed(&store, Seed::from_json(SEED).unwrap()).await.unwrap();
        assert_eq!(count, 2);

        let train = store.get_request("train").await.unwrap().unwrap();
        assert_eq!(train.metadata.generation, 1);
        assert_eq!(train.spec.min_gpus, 1);
        assert_eq!(train.spec.requeue_minutes, 7);
        assert!(train.spec.on_demand_fallback);

        assert_eq!(store.list_node_classes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_request_rejects_whole_seed() {
        let raw = SEED.replace("\"minSpotScore\": 8", "\"minSpotScore\": 11");
        let store = InMemoryStore::new();

        let err = load_seed(&store, Seed::from_json(&raw).unwrap()).await.unwrap_err();
        assert!(format!("{err:#}").contains("infer"));
        assert!(store.list_requests().await.unwrap().is_empty());
    }
}
