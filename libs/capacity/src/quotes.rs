//! Spot quote aggregation.
//!
//! Collapses raw price history into the latest observation per
//! (instance type, zone). Malformed observations are telemetry noise and are
//! dropped without error.

use chrono::{TimeDelta, Utc};
use tracing::debug;

use crate::error::QuoteFetchError;
use crate::provider::{CapacityApi, PriceHistoryQuery, PriceObservation, LINUX_PRODUCT_DESCRIPTION};
use crate::types::{QuoteMap, SpotQuote};

/// Lookback used when the caller passes a non-positive window.
pub const DEFAULT_QUOTE_WINDOW: TimeDelta = TimeDelta::minutes(15);

/// Fetch the last `window` of spot prices for `instance_types` and keep the
/// latest quote per (instance type, zone).
///
/// An empty result is not an error; only transport or auth failures are.
pub async fn latest_quotes(
    api: &dyn CapacityApi,
    instance_types: &[String],
    window: TimeDelta,
) -> Result<QuoteMap, QuoteFetchError> {
    let window = if window <= TimeDelta::zero() {
        DEFAULT_QUOTE_WINDOW
    } else {
        window
    };
    let end = Utc::now();
    let query = PriceHistoryQuery {
        instance_types: instance_types
            .iter()
            .filter(|t| !t.is_empty())
            .cloned()
            .collect(),
        start: end - window,
        end,
        product_description: LINUX_PRODUCT_DESCRIPTION.to_string(),
    };

    let observations = api
        .spot_price_history(&query)
        .await
        .map_err(|source| QuoteFetchError {
            region: api.region().to_string(),
            source,
        })?;

    let quotes = collapse_observations(observations);
    debug!(
        region = api.region(),
        window_secs = window.num_seconds(),
        quotes = quotes.len(),
        "Collapsed spot price history"
    );
    Ok(quotes)
}

/// Keep the latest well-formed observation per (instance type, zone).
///
/// An observation replaces the retained one only if its timestamp is strictly
/// later, so the result does not depend on input order except for exact
/// timestamp ties, where the first one seen wins.
pub fn collapse_observations<I>(observations: I) -> QuoteMap
where
    I: IntoIterator<Item = PriceObservation>,
{
    let mut latest = QuoteMap::new();

    for obs in observations {
        let Some(quote) = to_quote(obs) else {
            continue;
        };
        match latest.get(&quote.key()) {
            Some(prev) if prev.timestamp >= quote.timestamp => {}
            _ => {
                latest.insert(quote.key(), quote);
            }
        }
    }

    latest
}

fn to_quote(obs: PriceObservation) -> Option<SpotQuote> {
    if obs.instance_type.is_empty() {
        return None;
    }
    let zone = obs.availability_zone.filter(|z| !z.is_empty())?;
    let timestamp = obs.timestamp?;
    let price: f64 = obs.spot_price?.trim().parse().ok()?;
    if !price.is_finite() || price < 0.0 {
        return None;
    }

    Some(SpotQuote {
        instance_type: obs.instance_type,
        zone,
        price_usd: price,
        timestamp,
    })
}
