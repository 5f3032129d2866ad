//! Reconciliation of one `LeftoverNodePool` request.
//!
//! A pass walks the stages below in order. Any stage may short-circuit to
//! Reporting with a failure reason; Reporting always replaces the `Ready`
//! condition and writes status only when it differs from what was read.
//!
//! ```text
//! Resolving ─► Discovering ─► Aggregating ─► Scoring ─► Selecting ─► Applying ─► Reporting
//!     │             │              │            │           │            │           ▲
//!     └─────────────┴──────────────┴────────────┴───────────┴────────────┴───────────┘
//!                                  (failure reason)
//! ```
//!
//! All state built during a pass (candidates, quotes, scores) is dropped when
//! the pass ends.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use leftover_api::{
    set_condition, CapacityType, Condition, ConditionStatus, LeftoverNodePool,
    LeftoverNodePoolSpec, LeftoverNodePoolStatus, NodePool, Placement, ReadyReason, Taint,
    CONDITION_READY, FIELD_OWNER,
};
use leftover_capacity::{
    discover, latest_quotes, pick_cheapest, rank_by_price, CapacityApi, CapacityApiError,
    CapacityClientFactory, DiscoveryError, PlacementScorer, QuoteFetchError, QuoteMap,
    ScoreLookup, ScorerInitError, Selection, SelectionError, DEFAULT_BATCH_SIZE,
};
use leftover_reconcile::{PassOutcome, DEFAULT_REQUEUE};
use thiserror::Error;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::store::{ApplyOutcome, ResourceStore, StoreError};
use crate::template::{resolve_node_class, TemplateError};

/// Quotes listed in the per-pass ranking log.
const RANKING_LOG_LIMIT: usize = 5;

/// Failures reaching the capacity APIs or the store.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("building capacity client for {region}")]
    Construction {
        region: String,
        #[source]
        source: CapacityApiError,
    },

    #[error("pass exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a pass stopped short of `Ready=True`.
#[derive(Debug, Error)]
pub enum PassError {
    /// The request cannot be acted on as written.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Catalog(#[from] DiscoveryError),

    #[error(transparent)]
    QuoteFetch(#[from] QuoteFetchError),

    #[error("initialising placement scorer")]
    ScorerInit(#[from] ScorerInitError),

    #[error("selecting a quote")]
    Selection(#[from] SelectionError),

    /// Nothing to choose from. Not a threshold miss.
    #[error("no spot quotes available in {region} ({candidates} candidate instance types)")]
    NoViableQuotes { region: String, candidates: usize },

    #[error("applying NodePool {name}")]
    Apply {
        name: String,
        #[source]
        source: StoreError,
    },
}

impl PassError {
    /// Reason code recorded on the `Ready` condition.
    pub fn reason(&self) -> ReadyReason {
        match self {
            Self::Validation(_) => ReadyReason::InvalidSpec,
            Self::Client(_) => ReadyReason::ClientError,
            Self::Catalog(_) => ReadyReason::ListTypesError,
            Self::QuoteFetch(_) => ReadyReason::SpotPriceError,
            Self::ScorerInit(_) => ReadyReason::ScorerError,
            Self::Selection(_) => ReadyReason::SelectionError,
            Self::NoViableQuotes { .. } => ReadyReason::NoQuotes,
            Self::Apply { .. } => ReadyReason::ApplyNodePoolError,
        }
    }

    /// How the worker should treat the failure when scheduling a retry.
    pub fn outcome(&self) -> PassOutcome {
        match self {
            Self::Validation(_) => PassOutcome::Rejected,
            _ => PassOutcome::Failed,
        }
    }
}

impl From<TemplateError> for PassError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::Store(source) => Self::Client(ClientError::Store(source)),
            other => Self::Validation(other.to_string()),
        }
    }
}

/// Pass stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    Discovering,
    Aggregating,
    Scoring,
    Selecting,
    Applying,
    Reporting,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolving => "resolving",
            Self::Discovering => "discovering",
            Self::Aggregating => "aggregating",
            Self::Scoring => "scoring",
            Self::Selecting => "selecting",
            Self::Applying => "applying",
            Self::Reporting => "reporting",
        }
    }
}

/// Tunables for a [`Reconciler`].
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub quote_window: TimeDelta,
    pub batch_size: usize,
    pub default_requeue: Duration,
    pub pass_timeout: Duration,
    pub field_owner: String,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            quote_window: TimeDelta::minutes(10),
            batch_size: DEFAULT_BATCH_SIZE,
            default_requeue: DEFAULT_REQUEUE,
            pass_timeout: Duration::from_secs(120),
            field_owner: FIELD_OWNER.to_string(),
        }
    }
}

impl From<&Config> for ReconcilerSettings {
    fn from(config: &Config) -> Self {
        Self {
            quote_window: config.quote_window,
            batch_size: config.selection_batch_size,
            default_requeue: config.default_requeue,
            pass_timeout: config.pass_timeout,
            field_owner: config.field_owner.clone(),
        }
    }
}

/// What one pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub request: String,
    pub generation: i64,
    pub reason: ReadyReason,
    pub outcome: PassOutcome,
    /// The request's steady-state interval.
    pub interval: Duration,
    pub applied: Option<ApplyOutcome>,
    pub status_written: bool,
}

/// The decision a successful pass applied.
#[derive(Debug, Clone)]
struct Decision {
    placement: Placement,
    selection: Selection,
    applied: ApplyOutcome,
}

/// Handles for the stages of one pass.
struct PassContext<'a> {
    request: &'a LeftoverNodePool,
    api: Arc<dyn CapacityApi>,
}

impl PassContext<'_> {
    fn spec(&self) -> &LeftoverNodePoolSpec {
        &self.request.spec
    }
}

/// Drives requests toward their cheapest viable placement.
pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
    clients: Arc<dyn CapacityClientFactory>,
    settings: ReconcilerSettings,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        clients: Arc<dyn CapacityClientFactory>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            store,
            clients,
            settings,
        }
    }

    /// Run one pass for `request` as read from the store.
    #[instrument(
        skip_all,
        fields(request = %request.name(), region = %request.spec.region, generation = request.generation())
    )]
    pub async fn reconcile(&self, request: &LeftoverNodePool) -> PassReport {
        let deadline = Instant::now() + self.settings.pass_timeout;
        let result = match timeout_at(deadline, self.run_stages(request)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::DeadlineExceeded(self.settings.pass_timeout).into()),
        };

        debug!(stage = Stage::Reporting.as_str(), "Entering stage");
        let mut status = request.status.clone();
        let (reason, mut outcome, applied) = match &result {
            Ok(decision) => {
                let changed = record_selection(&mut status, decision, Utc::now());
                set_condition(
                    &mut status.conditions,
                    Condition::new(
                        CONDITION_READY,
                        ConditionStatus::True,
                        ReadyReason::Reconciled.as_str(),
                        ready_message(&decision.placement),
                        request.generation(),
                    ),
                );
                info!(
                    instance_type = %decision.placement.instance_type,
                    zone = %decision.placement.zone,
                    capacity_type = %decision.placement.capacity_type,
                    price_usd = decision.selection.quote.price_usd,
                    score = decision.selection.score,
                    selection_changed = changed,
                    node_pool = decision.applied.as_str(),
                    "Reconciled"
                );
                (ReadyReason::Reconciled, PassOutcome::Succeeded, Some(decision.applied))
            }
            Err(err) => {
                let reason = err.reason();
                let message = error_chain(err);
                set_condition(
                    &mut status.conditions,
                    Condition::new(
                        CONDITION_READY,
                        ConditionStatus::False,
                        reason.as_str(),
                        message.clone(),
                        request.generation(),
                    ),
                );
                warn!(reason = reason.as_str(), error = %message, "Pass failed");
                (reason, err.outcome(), None)
            }
        };

        // Reporting gets its own budget: after a stage timeout the pass
        // deadline has already passed and the failure must still be recorded.
        let write = timeout(self.settings.pass_timeout, self.write_status(request, &status));
        let status_written = match write.await {
            Ok(Ok(written)) => written,
            Ok(Err(err)) => {
                warn!(error = %error_chain(&err), "Status update failed");
                outcome = PassOutcome::Failed;
                false
            }
            Err(_) => {
                warn!("Status update timed out");
                outcome = PassOutcome::Failed;
                false
            }
        };

        PassReport {
            request: request.name().to_string(),
            generation: request.generation(),
            reason,
            outcome,
            interval: request.spec.requeue_interval(self.settings.default_requeue),
            applied,
            status_written,
        }
    }

    async fn run_stages(&self, request: &LeftoverNodePool) -> Result<Decision, PassError> {
        let spec = &request.spec;

        debug!(stage = Stage::Resolving.as_str(), "Entering stage");
        for taint in &spec.taints {
            Taint::parse(taint).map_err(|e| PassError::Validation(e.to_string()))?;
        }
        let node_class = resolve_node_class(self.store.as_ref(), spec).await?;

        let api = self
            .clients
            .for_region(&spec.region)
            .await
            .map_err(|source| ClientError::Construction {
                region: spec.region.clone(),
                source,
            })?;
        let ctx = PassContext { request, api };

        let (quotes, scorer) = self.gather(&ctx).await?;

        debug!(stage = Stage::Selecting.as_str(), "Entering stage");
        let selection = pick_cheapest(
            &quotes,
            &scorer,
            self.settings.batch_size,
            ctx.spec().min_spot_score,
        )?
        .ok_or_else(|| PassError::NoViableQuotes {
            region: ctx.spec().region.clone(),
            candidates: quotes.len(),
        })?;
        log_ranking(&quotes, &scorer);

        let capacity_type = applied_capacity_type(ctx.spec(), selection.met_threshold);
        if selection.met_threshold {
            info!(
                instance_type = %selection.quote.instance_type,
                zone = %selection.quote.zone,
                price_usd = selection.quote.price_usd,
                score = selection.score,
                "Selected quote"
            );
        } else {
            info!(
                threshold = ctx.spec().min_spot_score,
                instance_type = %selection.quote.instance_type,
                zone = %selection.quote.zone,
                price_usd = selection.quote.price_usd,
                score = selection.score,
                capacity_type = %capacity_type,
                "No quote met score threshold; using cheapest"
            );
        }

        debug!(stage = Stage::Applying.as_str(), "Entering stage");
        let placement = Placement {
            node_class,
            instance_type: selection.quote.instance_type.clone(),
            zone: selection.quote.zone.clone(),
            capacity_type,
        };
        let pool = NodePool::for_placement(request, &placement)
            .map_err(|e| PassError::Validation(e.to_string()))?;
        let applied = self
            .store
            .apply_node_pool(&pool, &self.settings.field_owner)
            .await
            .map_err(|source| PassError::Apply {
                name: pool.name.clone(),
                source,
            })?;

        Ok(Decision {
            placement,
            selection,
            applied,
        })
    }

    /// Discovering, Aggregating and Scoring.
    async fn gather(&self, ctx: &PassContext<'_>) -> Result<(QuoteMap, PlacementScorer), PassError> {
        let spec = ctx.spec();

        debug!(stage = Stage::Discovering.as_str(), "Entering stage");
        let candidates = discover(ctx.api.as_ref(), &spec.families, spec.min_gpus).await?;
        info!(count = candidates.len(), "Candidate instance types");
        if candidates.is_empty() {
            // An empty type filter would ask for every price in the region.
            return Err(PassError::NoViableQuotes {
                region: spec.region.clone(),
                candidates: 0,
            });
        }

        debug!(stage = Stage::Aggregating.as_str(), "Entering stage");
        let quotes = latest_quotes(
            ctx.api.as_ref(),
            &candidates.instance_types,
            self.settings.quote_window,
        )
        .await?;
        info!(count = quotes.len(), "Collected latest spot quotes");
        if quotes.is_empty() {
            return Err(PassError::NoViableQuotes {
                region: spec.region.clone(),
                candidates: candidates.len(),
            });
        }

        debug!(stage = Stage::Scoring.as_str(), "Entering stage");
        let scorer = PlacementScorer::new(
            ctx.api.as_ref(),
            &candidates.instance_types,
            spec.target_capacity(),
        )
        .await?;

        Ok((quotes, scorer))
    }

    /// Write `status` if it differs from what was read. Returns whether a
    /// write happened.
    async fn write_status(
        &self,
        request: &LeftoverNodePool,
        status: &LeftoverNodePoolStatus,
    ) -> Result<bool, StoreError> {
        if !status.differs_from(&request.status) {
            debug!("Status unchanged; skipping write");
            return Ok(false);
        }
        self.store
            .update_status(request.name(), request.metadata.resource_version, status)
            .await?;
        Ok(true)
    }
}

/// Capacity type to apply for a selection.
///
/// A spot request that allows fallback switches to on-demand when no quote
/// met the score threshold. Every other case applies the requested type.
pub fn applied_capacity_type(spec: &LeftoverNodePoolSpec, met_threshold: bool) -> CapacityType {
    if !met_threshold && spec.capacity_type == CapacityType::Spot && spec.on_demand_fallback {
        CapacityType::OnDemand
    } else {
        spec.capacity_type
    }
}

/// Record the applied decision in `status`, advancing `last_sync_time` only
/// when the decision differs from the one already recorded. Returns whether
/// it did.
fn record_selection(status: &mut LeftoverNodePoolStatus, decision: &Decision, now: DateTime<Utc>) -> bool {
    let quote = &decision.selection.quote;
    let instance_types = vec![quote.instance_type.clone()];
    let zones = vec![quote.zone.clone()];
    let price = format!("{:.4}", quote.price_usd);
    let capacity_type = Some(decision.placement.capacity_type);

    let changed = status.selected_instance_types != instance_types
        || status.selected_zones != zones
        || status.last_price_usd != price
        || status.last_score != decision.selection.score
        || status.capacity_type != capacity_type;

    status.selected_instance_types = instance_types;
    status.selected_zones = zones;
    status.last_price_usd = price;
    status.last_score = decision.selection.score;
    status.capacity_type = capacity_type;
    if changed {
        status.last_sync_time = Some(now);
    }
    changed
}

/// `err` followed by each of its sources, joined with `: `.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    std::iter::successors(Some(err), |e| e.source())
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}

fn ready_message(placement: &Placement) -> String {
    format!(
        "NodePool targets {} in {} ({})",
        placement.instance_type, placement.zone, placement.capacity_type
    )
}

fn log_ranking(quotes: &QuoteMap, scorer: &impl ScoreLookup) {
    let Ok(ranked) = rank_by_price(quotes) else {
        return;
    };
    debug!(count = ranked.len().min(RANKING_LOG_LIMIT), "Cheapest spot quotes");
    for (rank, quote) in ranked.into_iter().take(RANKING_LOG_LIMIT).enumerate() {
        debug!(
            rank = rank + 1,
            instance_type = %quote.instance_type,
            zone = %quote.zone,
            price_usd = quote.price_usd,
            score = scorer.score_for(&quote.instance_type, &quote.zone),
            timestamp = %quote.timestamp.to_rfc3339(),
            "Quote"
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use leftover_capacity::SpotQuote;
    use rstest::rstest;

    use super::*;

    fn decision(instance_type: &str, zone: &str, price: f64, score: i32, capacity_type: CapacityType) -> Decision {
        Decision {
            placement: Placement {
                node_class: "gpu".to_string(),
                instance_type: instance_type.to_string(),
                zone: zone.to_string(),
                capacity_type,
            },
            selection: Selection {
                quote: SpotQuote {
                    instance_type: instance_type.to_string(),
                    zone: zone.to_string(),
                    price_usd: price,
                    timestamp: Utc.timestamp_opt(1_750_000_000, 0).unwrap(),
                },
                score,
                met_threshold: true,
            },
            applied: ApplyOutcome::Unchanged,
        }
    }

    #[rstest]
    #[case(CapacityType::Spot, true, false, CapacityType::OnDemand)]
    #[case(CapacityType::Spot, true, true, CapacityType::Spot)]
    #[case(CapacityType::Spot, false, false, CapacityType::Spot)]
    #[case(CapacityType::OnDemand, false, false, CapacityType::OnDemand)]
    #[case(CapacityType::OnDemand, false, true, CapacityType::OnDemand)]
    fn test_applied_capacity_type(
        #[case] requested: CapacityType,
        #[case] fallback: bool,
        #[case] met_threshold: bool,
        #[case] expected: CapacityType,
    ) {
        let mut spec = LeftoverNodePoolSpec::for_region("us-east-1");
        spec.capacity_type = requested;
        spec.on_demand_fallback = fallback;
        assert_eq!(applied_capacity_type(&spec, met_threshold), expected);
    }

    #[test]
    fn test_record_selection_bumps_sync_time_only_on_change() {
        let t0 = Utc.timestamp_opt(1_760_000_000, 0).unwrap();
        let t1 = t0 + TimeDelta::minutes(7);
        let mut status = LeftoverNodePoolStatus::default();

        let first = decision("g5.xlarge", "us-east-1a", 0.41234, 7, CapacityType::Spot);
        assert!(record_selection(&mut status, &first, t0));
        assert_eq!(status.last_price_usd, "0.4123");
        assert_eq!(status.last_sync_time, Some(t0));

        // Same decision; sub-precision price noise does not count.
        let again = decision("g5.xlarge", "us-east-1a", 0.41231, 7, CapacityType::Spot);
        assert!(!record_selection(&mut status, &again, t1));
        assert_eq!(status.last_sync_time, Some(t0));

        // A price tick on the same SKU and zone does.
        let tick = decision("g5.xlarge", "us-east-1a", 0.45, 7, CapacityType::Spot);
        assert!(record_selection(&mut status, &tick, t1));
        assert_eq!(status.last_sync_time, Some(t1));
    }

    #[test]
    fn test_record_selection_tracks_capacity_type() {
        let t0 = Utc.timestamp_opt(1_760_000_000, 0).unwrap();
        let mut status = LeftoverNodePoolStatus::default();
        record_selection(&mut status, &decision("g5.xlarge", "a", 0.4, 2, CapacityType::Spot), t0);

        let t1 = t0 + TimeDelta::minutes(1);
        let fallback = decision("g5.xlarge", "a", 0.4, 2, CapacityType::OnDemand);
        assert!(record_selection(&mut status, &fallback, t1));
        assert_eq!(status.capacity_type, Some(CapacityType::OnDemand));
    }

    #[test]
    fn test_reason_mapping() {
        let no_quotes = PassError::NoViableQuotes {
            region: "us-east-1".to_string(),
            candidates: 3,
        };
        assert_eq!(no_quotes.reason(), ReadyReason::NoQuotes);
        assert_eq!(no_quotes.outcome(), PassOutcome::Failed);

        let invalid: PassError = TemplateError::Missing.into();
        assert_eq!(invalid.reason(), ReadyReason::InvalidSpec);
        assert_eq!(invalid.outcome(), PassOutcome::Rejected);

        let store: PassError = TemplateError::Store(StoreError::Unavailable("down".to_string())).into();
        assert_eq!(store.reason(), ReadyReason::ClientError);

        let deadline: PassError = ClientError::DeadlineExceeded(Duration::from_secs(1)).into();
        assert_eq!(deadline.reason().as_str(), "AWSClientError");
    }

    #[test]
    fn test_error_chain_names_each_cause_once() {
        let err: PassError = ScorerInitError::Scores(CapacityApiError::Unauthorized(
            "expired token".to_string(),
        ))
        .into();

        assert_eq!(
            error_chain(&err),
            "initialising placement scorer: fetching placement scores: \
             authorization failed: expired token"
        );

        let err = PassError::Apply {
            name: "leftover-train".to_string(),
            source: StoreError::Rejected("admission denied".to_string()),
        };
        let message = error_chain(&err);
        assert_eq!(message.matches("admission denied").count(), 1);
        assert!(message.starts_with("applying NodePool leftover-train: "));
    }
}
