//! Error types for the resource model.

use thiserror::Error;

/// Errors raised while translating resources into downstream documents.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// A taint string could not be parsed.
    #[error("invalid taint {taint:?}: {reason}")]
    InvalidTaint { taint: String, reason: String },
}

/// Admission-style validation failures for a `LeftoverNodePool` spec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("spec.region must be set")]
    MissingRegion,

    #[error("spec.{field} must be >= {min}")]
    BelowMinimum { field: &'static str, min: i64 },

    #[error("spec.minSpotScore must be within 0..=10, got {0}")]
    ScoreOutOfRange(i32),

    #[error("spec.families contains invalid value {0:?}; expected like g5, g6, p5, p4d")]
    InvalidFamily(String),

    #[error("spec.budgetsNodes must be a percentage like \"10%\", got {0:?}")]
    InvalidBudget(String),

    #[error("spec.consolidateAfter must be a valid duration (e.g. \"2m\", \"30s\"), got {0:?}")]
    InvalidDuration(String),

    #[error("one of nodeClassName or nodeClassSelector must be set")]
    MissingTemplateRef,

    #[error("only one of nodeClassName or nodeClassSelector may be set")]
    AmbiguousTemplateRef,

    #[error("spec.onDemandFallback cannot be true when spec.capacityType is \"on-demand\"")]
    FallbackWithOnDemand,

    #[error(transparent)]
    Taint(#[from] ApiError),
}
