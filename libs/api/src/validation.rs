//! Admission-style checks for `LeftoverNodePool` specs.
//!
//! The controller never depends on these having run; the dev harness uses
//! them to refuse malformed seed requests before they reach the store.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::error::ValidationError;
use crate::nodepool::Taint;
use crate::request::{CapacityType, LeftoverNodePoolSpec};

static FAMILY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+[a-z0-9-]*$").expect("valid family regex"));

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{1,3}%$").expect("valid percent regex"));

/// Validate a spec the way the admission webhook does.
pub fn validate_spec(spec: &LeftoverNodePoolSpec) -> Result<(), ValidationError> {
    if spec.region.is_empty() {
        return Err(ValidationError::MissingRegion);
    }

    at_least("minGPUs", spec.min_gpus as i64, 1)?;
    at_least("maxInstanceTypes", spec.max_instance_types as i64, 1)?;
    at_least("maxZones", spec.max_zones as i64, 1)?;
    at_least("requeueMinutes", spec.requeue_minutes, 1)?;

    if !(0..=10).contains(&spec.min_spot_score) {
        return Err(ValidationError::ScoreOutOfRange(spec.min_spot_score));
    }

    if let Some(bad) = spec.families.iter().find(|f| !FAMILY_RE.is_match(f)) {
        return Err(ValidationError::InvalidFamily(bad.clone()));
    }

    if !spec.budgets_nodes.is_empty() && !PERCENT_RE.is_match(&spec.budgets_nodes) {
        return Err(ValidationError::InvalidBudget(spec.budgets_nodes.clone()));
    }

    if !spec.consolidate_after.is_empty() && parse_duration(&spec.consolidate_after).is_none() {
        return Err(ValidationError::InvalidDuration(
            spec.consolidate_after.clone(),
        ));
    }

    let has_name = spec.node_class_name.as_deref().is_some_and(|n| !n.is_empty());
    let has_selector = !spec.node_class_selector.is_empty();
    match (has_name, has_selector) {
        (false, false) => return Err(ValidationError::MissingTemplateRef),
        (true, true) => return Err(ValidationError::AmbiguousTemplateRef),
        _ => {}
    }

    if spec.capacity_type == CapacityType::OnDemand && spec.on_demand_fallback {
        return Err(ValidationError::FallbackWithOnDemand);
    }

    for taint in &spec.taints {
        Taint::parse(taint)?;
    }

    Ok(())
}

fn at_least(field: &'static str, value: i64, min: i64) -> Result<(), ValidationError> {
    if value < min {
        return Err(ValidationError::BelowMinimum { field, min });
    }
    Ok(())
}

/// Parse a duration such as `300ms`, `30s`, `2m` or `1h30m`.
///
/// Accepts a sequence of decimal numbers each followed by one of the units
/// `ns`, `us`, `µs`, `ms`, `s`, `m`, `h`. A bare `0` is also accepted.
pub fn parse_duration(input: &str) -> Option<Duration> {
    if input == "0" {
        return Some(Duration::ZERO);
    }

    let mut rest = input;
    let mut total_nanos = 0f64;
    if rest.is_empty() {
        return None;
    }

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let value: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[unit_len..];

        total_nanos += value * nanos_per_unit;
    }

    Some(Duration::from_nanos(total_nanos.round() as u64))
}
