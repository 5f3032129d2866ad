//! In-memory resource store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use leftover_api::{LeftoverNodePool, LeftoverNodePoolStatus, NodeClass, NodePool};
use leftover_reconcile::ContentHash;
use tokio::sync::RwLock;
use tracing::debug;

use super::{ApplyOutcome, ResourceStore, StoreError};

#[derive(Debug, Clone)]
struct StoredNodePool {
    /// The live document, including fields other writers set.
    document: serde_json::Value,
    /// What the field owner last applied.
    applied: serde_json::Value,
    hash: ContentHash,
    generation: i64,
    field_owner: String,
}

/// Merge `applied` into `live`. Objects merge key by key; anything else is
/// replaced. Keys the owner applied last time but no longer sets are removed,
/// keys it never set are left alone.
fn merge_applied(live: &mut serde_json::Value, last: Option<&serde_json::Value>, applied: &serde_json::Value) {
    use serde_json::Value;

    match (live, applied) {
        (Value::Object(live), Value::Object(applied)) => {
            if let Some(Value::Object(last)) = last {
                for key in last.keys() {
                    if !applied.contains_key(key) {
                        live.remove(key);
                    }
                }
            }
            for (key, value) in applied {
                let last_value = last.and_then(|l| l.get(key));
                match live.get_mut(key) {
                    Some(existing) => merge_applied(existing, last_value, value),
                    None => {
                        live.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (live, applied) => *live = applied.clone(),
    }
}

#[derive(Debug, Default)]
struct Inner {
    requests: BTreeMap<String, LeftoverNodePool>,
    node_classes: BTreeMap<String, NodeClass>,
    node_pools: BTreeMap<String, StoredNodePool>,
    last_resource_version: u64,
}

impl Inner {
    fn next_resource_version(&mut self) -> u64 {
        self.last_resource_version += 1;
        self.last_resource_version
    }
}

/// A [`ResourceStore`] held in memory.
///
/// Generations and resource versions behave like an API server's: the
/// generation moves only when a spec changes, the resource version on every
/// write.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    apply_calls: AtomicUsize,
    status_writes: AtomicUsize,
    fail_applies: AtomicBool,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a request or replace its spec. Status is kept on update.
    pub async fn upsert_request(&self, mut request: LeftoverNodePool) -> LeftoverNodePool {
        let mut inner = self.inner.write().await;
        let resource_version = inner.next_resource_version();
        let name = request.name().to_string();

        match inner.requests.get_mut(&name) {
            Some(existing) => {
                if existing.spec != request.spec {
                    existing.spec = request.spec;
                    existing.metadata.generation += 1;
                }
                existing.metadata.labels = request.metadata.labels;
                existing.metadata.resource_version = resource_version;
                existing.clone()
            }
            None => {
                request.metadata.generation = 1;
                request.metadata.resource_version = resource_version;
                inner.requests.insert(name, request.clone());
                request
            }
        }
    }

    /// Overwrite a request's status without a version check.
    pub async fn set_status(&self, name: &str, status: LeftoverNodePoolStatus) -> bool {
        let mut inner = self.inner.write().await;
        let resource_version = inner.next_resource_version();
        match inner.requests.get_mut(name) {
            Some(request) => {
                request.status = status;
                request.metadata.resource_version = resource_version;
                true
            }
            None => false,
        }
    }

    pub async fn delete_request(&self, name: &str) -> bool {
        self.inner.write().await.requests.remove(name).is_some()
    }

    pub async fn insert_node_class(&self, class: NodeClass) {
        let mut inner = self.inner.write().await;
        inner.node_classes.insert(class.name().to_string(), class);
    }

    /// Stored NodePool document.
    pub async fn node_pool(&self, name: &str) -> Option<serde_json::Value> {
        let inner = self.inner.read().await;
        inner.node_pools.get(name).map(|p| p.document.clone())
    }

    /// Generation of a stored NodePool; it moves only when the content does.
    pub async fn node_pool_generation(&self, name: &str) -> Option<i64> {
        let inner = self.inner.read().await;
        inner.node_pools.get(name).map(|p| p.generation)
    }

    /// Write `patch` into a stored NodePool as another field owner would.
    /// Returns false when the NodePool does not exist.
    pub async fn patch_node_pool(&self, name: &str, patch: serde_json::Value) -> bool {
        let mut inner = self.inner.write().await;
        let Some(stored) = inner.node_pools.get_mut(name) else {
            return false;
        };
        merge_applied(&mut stored.document, None, &patch);
        stored.hash = ContentHash::of(&stored.document);
        stored.generation += 1;
        true
    }

    pub async fn node_pool_owner(&self, name: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner.node_pools.get(name).map(|p| p.field_owner.clone())
    }

    /// Number of `apply_node_pool` calls, including failed ones.
    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    /// Number of successful `update_status` calls.
    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Make every NodePool apply fail.
    pub fn fail_applies(&self, fail: bool) {
        self.fail_applies.store(fail, Ordering::SeqCst);
    }

    /// Make node class reads fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn list_requests(&self) -> Result<Vec<LeftoverNodePool>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.requests.values().cloned().collect())
    }

    async fn get_request(&self, name: &str) -> Result<Option<LeftoverNodePool>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.requests.get(name).cloned())
    }

    async fn update_status(
        &self,
        name: &str,
        resource_version: u64,
        status: &LeftoverNodePoolStatus,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let actual = match inner.requests.get(name) {
            Some(request) => request.metadata.resource_version,
            None => {
                return Err(StoreError::NotFound {
                    kind: "LeftoverNodePool",
                    name: name.to_string(),
                })
            }
        };
        if actual != resource_version {
            return Err(StoreError::Conflict {
                name: name.to_string(),
                expected: resource_version,
                actual,
            });
        }

        let next = inner.next_resource_version();
        if let Some(request) = inner.requests.get_mut(name) {
            request.status = status.clone();
            request.metadata.resource_version = next;
        }
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(next)
    }

    async fn get_node_class(&self, name: &str) -> Result<Option<NodeClass>, StoreError> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner.node_classes.get(name).cloned())
    }

    async fn list_node_classes(&self) -> Result<Vec<NodeClass>, StoreError> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner.node_classes.values().cloned().collect())
    }

    async fn apply_node_pool(
        &self,
        pool: &NodePool,
        field_owner: &str,
    ) -> Result<ApplyOutcome, StoreError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_applies.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected(format!(
                "admission denied NodePool {}",
                pool.name
            )));
        }

        let applied = pool.to_document();
        let mut inner = self.inner.write().await;

        let outcome = match inner.node_pools.get_mut(&pool.name) {
            Some(stored) => {
                let mut merged = stored.document.clone();
                merge_applied(&mut merged, Some(&stored.applied), &applied);
                let hash = ContentHash::of(&merged);
                stored.applied = applied;
                stored.field_owner = field_owner.to_string();
                if hash == stored.hash {
                    ApplyOutcome::Unchanged
                } else {
                    stored.document = merged;
                    stored.hash = hash;
                    stored.generation += 1;
                    ApplyOutcome::Updated
                }
            }
            None => {
                inner.node_pools.insert(
                    pool.name.clone(),
                    StoredNodePool {
                        hash: ContentHash::of(&applied),
                        document: applied.clone(),
                        applied,
                        generation: 1,
                        field_owner: field_owner.to_string(),
                    },
                );
                ApplyOutcome::Created
            }
        };

        debug!(node_pool = %pool.name, outcome = outcome.as_str(), "Applied NodePool");
        Ok(outcome)
    }
}
