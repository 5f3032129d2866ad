//! Periodic reconciliation worker.
//!
//! On every resync tick the worker lists requests and starts a pass for each
//! one that is due. Passes of different requests run concurrently, up to a
//! limit; a request never has two passes in flight.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use leftover_reconcile::{
    PassOutcome, RequeuePolicy, RetryTracker, Schedule, DEFAULT_FAILURE_BACKOFF, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_WINDOW,
};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::reconciler::{PassReport, Reconciler};
use crate::store::ResourceStore;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub resync_interval: Duration,
    pub max_concurrent_passes: usize,
    pub failure_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(5),
            max_concurrent_passes: 4,
            failure_backoff: DEFAULT_FAILURE_BACKOFF,
        }
    }
}

impl From<&Config> for WorkerConfig {
    fn from(config: &Config) -> Self {
        Self {
            resync_interval: config.resync_interval,
            max_concurrent_passes: config.max_concurrent_passes,
            failure_backoff: config.failure_backoff,
        }
    }
}

/// Names of requests with a pass in flight.
#[derive(Debug, Clone, Default)]
struct InFlight(Arc<Mutex<HashSet<String>>>);

impl InFlight {
    fn try_claim(&self, name: &str) -> Option<InFlightGuard> {
        let mut names = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if !names.insert(name.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: self.clone(),
            name: name.to_string(),
        })
    }

    fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Releases the claim when dropped. A finished pass hands its guard back with
/// the report so the claim outlives the requeue bookkeeping.
struct InFlightGuard {
    set: InFlight,
    name: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.name);
    }
}

/// Worker that keeps every request reconciled.
pub struct Worker {
    store: Arc<dyn ResourceStore>,
    reconciler: Arc<Reconciler>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(store: Arc<dyn ResourceStore>, reconciler: Arc<Reconciler>, config: WorkerConfig) -> Self {
        Self {
            store,
            reconciler,
            config,
        }
    }

    /// Run until shutdown is signaled. In-flight passes are aborted.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            resync_interval_ms = self.config.resync_interval.as_millis() as u64,
            max_concurrent_passes = self.config.max_concurrent_passes,
            "Starting reconciliation worker"
        );

        let mut schedule = Schedule::new();
        let mut policy = RequeuePolicy::new(
            self.config.failure_backoff,
            RetryTracker::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_WINDOW),
        );
        let in_flight = InFlight::default();
        let mut passes: JoinSet<(PassReport, InFlightGuard)> = JoinSet::new();

        let mut interval = tokio::time::interval(self.config.resync_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.resync(&mut schedule, &mut policy, &in_flight, &mut passes).await;
                }
                Some(joined) = passes.join_next() => {
                    match joined {
                        Ok((report, _claim)) => finish_pass(&mut schedule, &mut policy, &report),
                        Err(e) if e.is_panic() => error!(error = %e, "Reconciliation pass panicked"),
                        Err(e) => debug!(error = %e, "Reconciliation pass cancelled"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(in_flight = passes.len(), "Reconciliation worker shutting down");
                        passes.abort_all();
                        break;
                    }
                }
            }
        }

        while passes.join_next().await.is_some() {}
    }

    /// List requests and start passes for the due ones.
    async fn resync(
        &self,
        schedule: &mut Schedule,
        policy: &mut RequeuePolicy,
        in_flight: &InFlight,
        passes: &mut JoinSet<(PassReport, InFlightGuard)>,
    ) {
        let requests = match self.store.list_requests().await {
            Ok(requests) => requests,
            Err(e) => {
                warn!(error = %e, "Failed to list requests");
                return;
            }
        };

        let now = Instant::now().into_std();
        for name in schedule.retain_live(requests.iter().map(|r| r.name())) {
            debug!(request = %name, "Request deleted; forgetting");
            policy.forget(&name);
        }
        policy.prune(now);

        for request in requests {
            if in_flight.len() >= self.config.max_concurrent_passes {
                debug!("Concurrent pass limit reached; deferring to next tick");
                break;
            }
            if !schedule.is_due(request.name(), request.generation(), now) {
                continue;
            }
            let Some(guard) = in_flight.try_claim(request.name()) else {
                continue;
            };

            let reconciler = Arc::clone(&self.reconciler);
            passes.spawn(async move {
                let report = reconciler.reconcile(&request).await;
                (report, guard)
            });
        }
    }
}

fn finish_pass(schedule: &mut Schedule, policy: &mut RequeuePolicy, report: &PassReport) {
    let now = Instant::now().into_std();
    let delay = policy.next_delay(&report.request, report.outcome, report.interval, now);
    schedule.record(&report.request, report.generation, delay, now);
    if report.outcome == PassOutcome::Failed && policy.is_exhausted(&report.request, now) {
        warn!(
            request = %report.request,
            reason = report.reason.as_str(),
            failures = policy.failures(&report.request),
            "Request keeps failing; retrying on the failure backoff"
        );
    }
    debug!(
        request = %report.request,
        reason = report.reason.as_str(),
        failures = policy.failures(&report.request),
        requeue_after_secs = delay.as_secs(),
        "Requeue scheduled"
    );
}
