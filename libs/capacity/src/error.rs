//! Error types for capacity discovery and selection.

use thiserror::Error;

/// Failures talking to the cloud capacity API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapacityApiError {
    /// Network or service failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Credentials missing, expired or rejected.
    #[error("authorization failed: {0}")]
    Unauthorized(String),

    /// No client can be built for the region.
    #[error("unknown region: {0}")]
    UnknownRegion(String),
}

/// The instance catalog could not be fetched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("listing instance types in {region}")]
pub struct DiscoveryError {
    pub region: String,
    #[source]
    pub source: CapacityApiError,
}

/// Spot price history could not be fetched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("fetching spot price history in {region}")]
pub struct QuoteFetchError {
    pub region: String,
    #[source]
    pub source: CapacityApiError,
}

/// The placement scorer could not be initialised.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScorerInitError {
    #[error("resolving availability zone ids")]
    ZoneMapping(#[source] CapacityApiError),

    #[error("fetching placement scores")]
    Scores(#[source] CapacityApiError),
}

/// Internal invariant violations during selection.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SelectionError {
    /// A quote carried a price that cannot be ordered.
    #[error("quote {instance_type}/{zone} has non-finite price {price}")]
    UnorderedPrice {
        instance_type: String,
        zone: String,
        price: f64,
    },
}
