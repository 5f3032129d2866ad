//! Tiered cheapest-first selection.
//!
//! Quotes are ranked by price and scanned in consecutive windows of
//! `batch_size`. Scores are looked up lazily in price order and the scan
//! stops at the first quote whose score clears the threshold. When nothing
//! clears it, the globally cheapest quote is returned with
//! `met_threshold == false`.
//!
//! ```text
//! price ▲
//!       │ window 0: q0 q1 q2 q3 q4   ← scored first, cheapest first
//!       │ window 1: q5 q6 q7 q8 q9
//!       │ ...
//! ```

use crate::error::SelectionError;
use crate::scorer::ScoreLookup;
use crate::types::{QuoteMap, SpotQuote};

/// Window size used when the caller passes zero.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Outcome of a selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub quote: SpotQuote,
    pub score: i32,
    pub met_threshold: bool,
}

/// Quotes sorted by ascending price. Ties keep the map's iteration order.
pub fn rank_by_price(quotes: &QuoteMap) -> Result<Vec<&SpotQuote>, SelectionError> {
    let mut ranked: Vec<&SpotQuote> = quotes.values().collect();
    if let Some(bad) = ranked.iter().find(|q| !q.price_usd.is_finite()) {
        return Err(SelectionError::UnorderedPrice {
            instance_type: bad.instance_type.clone(),
            zone: bad.zone.clone(),
            price: bad.price_usd,
        });
    }
    ranked.sort_by(|a, b| a.price_usd.total_cmp(&b.price_usd));
    Ok(ranked)
}

/// Pick the cheapest quote whose score is at least `threshold`.
///
/// Returns `Ok(None)` only when `quotes` is empty.
pub fn pick_cheapest<S>(
    quotes: &QuoteMap,
    scorer: &S,
    batch_size: usize,
    threshold: i32,
) -> Result<Option<Selection>, SelectionError>
where
    S: ScoreLookup + ?Sized,
{
    let ranked = rank_by_price(quotes)?;
    let Some(cheapest) = ranked.first().copied() else {
        return Ok(None);
    };
    let batch_size = if batch_size == 0 {
        DEFAULT_BATCH_SIZE
    } else {
        batch_size
    };

    let mut cheapest_score = None;
    for window in ranked.chunks(batch_size) {
        for quote in window {
            let score = scorer.score_for(&quote.instance_type, &quote.zone);
            cheapest_score.get_or_insert(score);
            if score >= threshold {
                return Ok(Some(Selection {
                    quote: (*quote).clone(),
                    score,
                    met_threshold: true,
                }));
            }
        }
    }

    let score = match cheapest_score {
        Some(score) => score,
        None => scorer.score_for(&cheapest.instance_type, &cheapest.zone),
    };
    Ok(Some(Selection {
        quote: cheapest.clone(),
        score,
        met_threshold: false,
    }))
}
