//! Reconciliation loop primitives.
//!
//! Helpers shared by the controller's periodic worker:
//!
//! - **Requeue policy**: when a request's next pass is due, given how its last
//!   pass ended.
//! - **Retry tracking**: consecutive failures per request inside a window.
//! - **Schedule**: which requests are due on a resync tick.
//! - **Content hashing**: canonical document hashes for idempotent applies.
//!
//! # Invariants
//!
//! - Decisions are deterministic given the same inputs and clock readings
//! - A request is never due twice for the same generation and deadline

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

/// Steady-state interval used when a request does not set one.
pub const DEFAULT_REQUEUE: Duration = Duration::from_secs(7 * 60);

/// Retry delay after a failed pass.
pub const DEFAULT_FAILURE_BACKOFF: Duration = Duration::from_secs(60);

/// Consecutive failures tolerated before a request is reported as stuck.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Window over which consecutive failures are counted.
pub const DEFAULT_RETRY_WINDOW: Duration = Duration::from_secs(10 * 60); // 10 minutes

/// A content hash for deterministic comparison of structured documents.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash the canonical form of `json` (object keys sorted).
    pub fn of(json: &serde_json::Value) -> Self {
        let mut hasher = Sha256::new();
        write_canonical(json, &mut hasher);
        let digest = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&digest[..16])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn write_canonical(value: &serde_json::Value, hasher: &mut Sha256) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    hasher.update(b",");
                }
                // serde_json's Display escapes strings consistently.
                hasher.update(serde_json::Value::String(key.clone()).to_string().as_bytes());
                hasher.update(b":");
                write_canonical(&map[key], hasher);
            }
            hasher.update(b"}");
        }
        serde_json::Value::Array(items) => {
            hasher.update(b"[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    hasher.update(b",");
                }
                write_canonical(item, hasher);
            }
            hasher.update(b"]");
        }
        scalar => hasher.update(scalar.to_string().as_bytes()),
    }
}

/// Consecutive failure tracker keyed by request name.
#[derive(Debug, Clone)]
pub struct RetryTracker {
    max_retries: u32,
    window: Duration,
    /// key -> (count, first failure in the current window)
    failures: BTreeMap<String, (u32, Instant)>,
}

impl RetryTracker {
    pub fn new(max_retries: u32, window: Duration) -> Self {
        Self {
            max_retries,
            window,
            failures: BTreeMap::new(),
        }
    }

    /// Record a failure at `now`. Returns true if retries are exhausted.
    pub fn record_failure(&mut self, key: &str, now: Instant) -> bool {
        let (count, first) = self.failures.entry(key.to_string()).or_insert((0, now));

        if now.saturating_duration_since(*first) > self.window {
            *count = 0;
            *first = now;
        }

        *count += 1;
        *count > self.max_retries
    }

    pub fn is_exhausted(&self, key: &str, now: Instant) -> bool {
        match self.failures.get(key) {
            Some((count, first)) => {
                now.saturating_duration_since(*first) <= self.window && *count > self.max_retries
            }
            None => false,
        }
    }

    /// Consecutive failures currently counted for `key`.
    pub fn failures(&self, key: &str) -> u32 {
        self.failures.get(key).map_or(0, |(count, _)| *count)
    }

    pub fn clear(&mut self, key: &str) {
        self.failures.remove(key);
    }

    /// Drop entries whose window has passed.
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.failures
            .retain(|_, (_, first)| now.saturating_duration_since(*first) <= window);
    }
}

impl Default for RetryTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_WINDOW)
    }
}

/// How a pass ended, as far as scheduling is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// The pass completed.
    Succeeded,
    /// The request itself is wrong; retrying faster will not help.
    Rejected,
    /// A transient failure worth retrying soon.
    Failed,
}

/// Decides the delay before a request's next pass.
#[derive(Debug, Clone)]
pub struct RequeuePolicy {
    failure_backoff: Duration,
    tracker: RetryTracker,
}

impl RequeuePolicy {
    pub fn new(failure_backoff: Duration, tracker: RetryTracker) -> Self {
        Self {
            failure_backoff,
            tracker,
        }
    }

    /// Delay before the next pass of `key`.
    ///
    /// `steady` is the request's own interval. Transient failures always
    /// retry at the failure backoff, held to at most half of `steady` so a
    /// retry is never on the steady schedule.
    pub fn next_delay(&mut self, key: &str, outcome: PassOutcome, steady: Duration, now: Instant) -> Duration {
        match outcome {
            PassOutcome::Succeeded => {
                self.tracker.clear(key);
                steady
            }
            PassOutcome::Rejected => steady,
            PassOutcome::Failed => {
                self.tracker.record_failure(key, now);
                self.failure_backoff.min(steady / 2)
            }
        }
    }

    pub fn failures(&self, key: &str) -> u32 {
        self.tracker.failures(key)
    }

    /// True when `key` has failed more times than tolerated in the window.
    pub fn is_exhausted(&self, key: &str, now: Instant) -> bool {
        self.tracker.is_exhausted(key, now)
    }

    pub fn forget(&mut self, key: &str) {
        self.tracker.clear(key);
    }

    pub fn prune(&mut self, now: Instant) {
        self.tracker.prune(now);
    }
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_BACKOFF, RetryTracker::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    generation: i64,
    /// `None` when the delay runs past what `Instant` can represent.
    due_at: Option<Instant>,
}

/// Tracks, per request, the generation last reconciled and when it is next
/// due.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    entries: BTreeMap<String, Entry>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// A request is due when it was never seen, its generation moved, or its
    /// requeue time has passed.
    pub fn is_due(&self, key: &str, generation: i64, now: Instant) -> bool {
        match self.entries.get(key) {
            None => true,
            Some(entry) => {
                entry.generation != generation || entry.due_at.is_some_and(|due| due <= now)
            }
        }
    }

    /// Record a finished pass for `generation`, due again after `delay`.
    pub fn record(&mut self, key: &str, generation: i64, delay: Duration, now: Instant) {
        self.entries.insert(
            key.to_string(),
            Entry {
                generation,
                due_at: now.checked_add(delay),
            },
        );
    }

    /// Forget every key not in `live`. Returns the forgotten keys.
    pub fn retain_live<'a, I>(&mut self, live: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let live: std::collections::BTreeSet<&str> = live.into_iter().collect();
        let gone: Vec<String> = self
            .entries
            .keys()
            .filter(|k| !live.contains(k.as_str()))
            .cloned()
            .collect();
        for key in &gone {
            self.entries.remove(key);
        }
        gone
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_ignores_key_order() {
        let a = serde_json::json!({"b": 2, "a": {"y": [1, "x"], "x": null}});
        let b = serde_json::json!({"a": {"x": null, "y": [1, "x"]}, "b": 2});

        assert_eq!(ContentHash::of(&a), ContentHash::of(&b));
        assert!(ContentHash::of(&a).as_str().starts_with("sha256:"));
    }

    #[test]
    fn test_content_hash_sees_array_order() {
        let a = serde_json::json!({"values": ["g5.xlarge", "g6.xlarge"]});
        let b = serde_json::json!({"values": ["g6.xlarge", "g5.xlarge"]});
        assert_ne!(ContentHash::of(&a), ContentHash::of(&b));
    }

    #[test]
    fn test_retry_tracker() {
        let now = Instant::now();
        let mut tracker = RetryTracker::new(3, Duration::from_secs(60));

        assert!(!tracker.record_failure("gpu-a", now)); // 1st
        assert!(!tracker.record_failure("gpu-a", now)); // 2nd
        assert!(!tracker.record_failure("gpu-a", now)); // 3rd
        assert!(tracker.record_failure("gpu-a", now)); // 4th - exhausted

        assert!(tracker.is_exhausted("gpu-a", now));
        assert!(!tracker.is_exhausted("gpu-b", now));
        assert_eq!(tracker.failures("gpu-a"), 4);

        tracker.clear("gpu-a");
        assert!(!tracker.is_exhausted("gpu-a", now));
    }

    #[test]
    fn test_retry_tracker_window_resets() {
        let start = Instant::now();
        let mut tracker = RetryTracker::new(1, Duration::from_secs(60));

        tracker.record_failure("gpu-a", start);
        assert!(tracker.record_failure("gpu-a", start + Duration::from_secs(10)));

        let later = start + Duration::from_secs(120);
        assert!(!tracker.is_exhausted("gpu-a", later));
        assert!(!tracker.record_failure("gpu-a", later));

        tracker.prune(later + Duration::from_secs(61));
        assert_eq!(tracker.failures("gpu-a"), 0);
    }

    #[test]
    fn test_requeue_policy() {
        let now = Instant::now();
        let steady = Duration::from_secs(7 * 60);
        let mut policy = RequeuePolicy::default();

        assert_eq!(policy.next_delay("r", PassOutcome::Succeeded, steady, now), steady);
        assert_eq!(policy.next_delay("r", PassOutcome::Rejected, steady, now), steady);

        for _ in 0..=DEFAULT_MAX_RETRIES {
            assert_eq!(
                policy.next_delay("r", PassOutcome::Failed, steady, now),
                DEFAULT_FAILURE_BACKOFF
            );
        }
        // Exhausted requests keep retrying on the backoff.
        assert!(policy.is_exhausted("r", now));
        assert_eq!(
            policy.next_delay("r", PassOutcome::Failed, steady, now),
            DEFAULT_FAILURE_BACKOFF
        );

        // Success clears the count.
        policy.next_delay("r", PassOutcome::Succeeded, steady, now);
        assert_eq!(policy.failures("r"), 0);
        assert_eq!(
            policy.next_delay("r", PassOutcome::Failed, steady, now),
            DEFAULT_FAILURE_BACKOFF
        );
    }

    #[test]
    fn test_failure_backoff_stays_below_steady() {
        let mut policy = RequeuePolicy::default();
        let now = Instant::now();

        // A one-minute interval equals the default backoff.
        let steady = Duration::from_secs(60);
        let delay = policy.next_delay("r", PassOutcome::Failed, steady, now);
        assert_eq!(delay, Duration::from_secs(30));
        assert!(delay < steady);

        let steady = Duration::from_secs(20);
        assert!(policy.next_delay("r", PassOutcome::Failed, steady, now) < steady);
    }

    #[test]
    fn test_schedule_due() {
        let now = Instant::now();
        let mut schedule = Schedule::new();

        assert!(schedule.is_due("a", 1, now));
        schedule.record("a", 1, Duration::from_secs(60), now);

        assert!(!schedule.is_due("a", 1, now + Duration::from_secs(59)));
        assert!(schedule.is_due("a", 1, now + Duration::from_secs(60)));
        // Generation bump makes it due immediately.
        assert!(schedule.is_due("a", 2, now));
    }

    #[test]
    fn test_schedule_survives_huge_delay() {
        let now = Instant::now();
        let mut schedule = Schedule::new();
        schedule.record("a", 1, Duration::MAX, now);

        assert!(!schedule.is_due("a", 1, now + Duration::from_secs(3600)));
        assert!(schedule.is_due("a", 2, now));
    }

    #[test]
    fn test_schedule_forgets_deleted() {
        let now = Instant::now();
        let mut schedule = Schedule::new();
        schedule.record("a", 1, Duration::from_secs(60), now);
        schedule.record("b", 1, Duration::from_secs(60), now);

        let gone = schedule.retain_live(["b"]);
        assert_eq!(gone, vec!["a".to_string()]);
        assert_eq!(schedule.len(), 1);
        assert!(schedule.is_due("a", 1, now));
    }
}
