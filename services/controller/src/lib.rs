//! leftover controller
//!
//! Converges `LeftoverNodePool` requests onto the cheapest GPU placement that
//! clears their placement score threshold, and keeps a matching NodePool
//! applied.
//!
//! ## Architecture
//!
//! - **Worker**: lists requests on a resync tick and runs due passes
//! - **Reconciler**: one pass per request, Resolving through Reporting
//! - **Store**: requests, node classes and NodePools behind [`store::ResourceStore`]
//! - **Capacity**: cloud catalog, prices and scores behind
//!   [`leftover_capacity::CapacityClientFactory`]

pub mod config;
pub mod dev;
pub mod reconciler;
pub mod store;
pub mod template;
pub mod worker;

pub use config::Config;
pub use reconciler::{PassError, PassReport, Reconciler, ReconcilerSettings};
pub use store::{ApplyOutcome, InMemoryStore, ResourceStore, StoreError};
pub use worker::{Worker, WorkerConfig};
