//! # leftover-api
//!
//! Declarative resource model for the leftover GPU capacity controller.
//!
//! ## Resources
//!
//! - `LeftoverNodePool` (`gpu.devplatforms.io/v1alpha1`): user intent (region,
//!   families, GPU floor, score threshold, capacity-type preference) plus the
//!   status the controller derives from it.
//! - `NodePool` (`karpenter.sh/v1`): the downstream provisioning resource the
//!   controller applies. Modelled as a typed struct and only turned into a
//!   structured document at the store boundary.
//!
//! - `NodeClass`: the provisioning template a request points at, by name or
//!   by label selector.
//!
//! ## Conditions
//!
//! Status carries at most one condition per type. Writers replace, never
//! append (see [`set_condition`]).

mod error;
mod meta;
mod nodeclass;
mod nodepool;
mod request;
mod validation;

pub use error::{ApiError, ValidationError};
pub use meta::{find_condition, set_condition, Condition, ConditionStatus, ObjectMeta};
pub use nodeclass::NodeClass;
pub use nodepool::{
    NodePool, NodePoolTemplate, Placement, Requirement, Taint, TaintEffect, ARCH_AMD64,
    FIELD_OWNER, LABEL_ARCH, LABEL_CAPACITY_TYPE, LABEL_INSTANCE_TYPE, LABEL_ZONE,
    MANAGED_BY_LABEL,
};
pub use request::{
    CapacityType, LeftoverNodePool, LeftoverNodePoolSpec, LeftoverNodePoolStatus, ReadyReason,
    TemplateRef, CONDITION_READY, GROUP, KIND, MAX_REQUEUE_MINUTES, VERSION,
};
pub use validation::{parse_duration, validate_spec};
