//! # leftover-capacity
//!
//! Turns a region, a family filter and a GPU floor into one priced placement.
//!
//! ```text
//! discover ──► latest_quotes ──► PlacementScorer::new ──► pick_cheapest
//! (catalog)    (price history)    (zone scores, cached)    (tiered scan)
//! ```
//!
//! All state is scoped to one reconciliation pass. Nothing here caches across
//! calls, so a scorer or quote map built for one pass is simply dropped.
//!
//! The cloud itself sits behind [`CapacityApi`]; [`SnapshotCapacityApi`]
//! serves a recorded snapshot through the same trait.

mod discovery;
mod error;
mod provider;
mod quotes;
mod scorer;
mod selector;
mod snapshot;
mod types;

pub use discovery::{discover, filter_catalog, matches_family, Candidates};
pub use error::{CapacityApiError, DiscoveryError, QuoteFetchError, ScorerInitError, SelectionError};
pub use provider::{
    CapacityApi, CapacityClientFactory, GpuDevice, GpuInfo, InstanceTypeInfo,
    PlacementScoreQuery, PlacementScoreRecord, PriceHistoryQuery, PriceObservation, ZoneInfo,
    LINUX_PRODUCT_DESCRIPTION,
};
pub use quotes::{collapse_observations, latest_quotes, DEFAULT_QUOTE_WINDOW};
pub use scorer::{PlacementScorer, ScoreLookup};
pub use selector::{pick_cheapest, rank_by_price, Selection, DEFAULT_BATCH_SIZE};
pub use snapshot::{FaultPoint, RegionSnapshot, Snapshot, SnapshotCapacityApi, SnapshotClientFactory};
pub use types::{InstanceMeta, QuoteKey, QuoteMap, SpotQuote};
