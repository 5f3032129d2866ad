//! The declarative resource store boundary.
//!
//! The controller reads requests and node classes, writes request status
//! under optimistic concurrency, and applies NodePools with a field owner.
//! [`InMemoryStore`] backs the dev harness and the tests.

mod memory;

use async_trait::async_trait;
use leftover_api::{LeftoverNodePool, LeftoverNodePoolStatus, NodeClass, NodePool};
use thiserror::Error;

pub use memory::InMemoryStore;

/// Store errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// The object changed since it was read.
    #[error("conflict writing {name}: expected resource version {expected}, found {actual}")]
    Conflict {
        name: String,
        expected: u64,
        actual: u64,
    },

    /// The store refused the write.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result of applying a NodePool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    /// The stored document already matched.
    Unchanged,
}

impl ApplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        }
    }
}

/// Access to requests, node classes and NodePools.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn list_requests(&self) -> Result<Vec<LeftoverNodePool>, StoreError>;

    async fn get_request(&self, name: &str) -> Result<Option<LeftoverNodePool>, StoreError>;

    /// Replace the status of `name` if its resource version still equals
    /// `resource_version`. Returns the new resource version.
    async fn update_status(
        &self,
        name: &str,
        resource_version: u64,
        status: &LeftoverNodePoolStatus,
    ) -> Result<u64, StoreError>;

    async fn get_node_class(&self, name: &str) -> Result<Option<NodeClass>, StoreError>;

    async fn list_node_classes(&self) -> Result<Vec<NodeClass>, StoreError>;

    /// Create or update `pool`, forcing ownership of its fields for
    /// `field_owner`. The write is all-or-nothing.
    async fn apply_node_pool(
        &self,
        pool: &NodePool,
        field_owner: &str,
    ) -> Result<ApplyOutcome, StoreError>;
}
