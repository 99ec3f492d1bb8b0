//! Consensus pricing over redundant sources and intermediary price checks

use super::quote::{ConsensusPrice, Price, PriceQuote, TradingPair};
use crate::config::EngineConfig;
use crate::error::ValidationError;

use std::collections::BTreeMap;
use tracing::debug;

/// How far into the future a quote timestamp may lie (clock skew)
const MAX_FUTURE_SKEW_SECS: u64 = 30;

const PPM: u128 = 1_000_000;

/// Aggregates quotes from independent sources into one consensus price
#[derive(Debug, Clone)]
pub struct PriceAggregator {
    /// Minimum number of distinct fresh sources
    min_sources: usize,
    /// Oldest acceptable quote age
    max_staleness_secs: u64,
}

impl PriceAggregator {
    pub fn new(min_sources: usize, max_staleness_secs: u64) -> Self {
        Self {
            min_sources,
            max_staleness_secs,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.min_price_sources, config.max_quote_staleness_secs)
    }

    /// Median of the newest fresh quote per source.
    ///
    /// With an even number of sources the two middle prices are averaged.
    /// The result only depends on the quote set, not on its order.
    pub fn consensus_price(
        &self,
        pair: &TradingPair,
        quotes: &[PriceQuote],
        now: u64,
    ) -> Result<ConsensusPrice, ValidationError> {
        let mut newest: BTreeMap<&str, &PriceQuote> = BTreeMap::new();

        for quote in quotes {
            if &quote.pair != pair {
                debug!("Ignoring {} quote from {} for {}", quote.pair, quote.source_id, pair);
                continue;
            }
            if quote.price.is_zero() {
                debug!("Ignoring zero price from {}", quote.source_id);
                continue;
            }
            let stale = now.saturating_sub(quote.timestamp) > self.max_staleness_secs;
            let future = quote.timestamp > now.saturating_add(MAX_FUTURE_SKEW_SECS);
            if stale || future {
                debug!(
                    "Ignoring quote from {} at {} (now {})",
                    quote.source_id, quote.timestamp, now
                );
                continue;
            }

            newest
                .entry(quote.source_id.as_str())
                .and_modify(|current| {
                    if (quote.timestamp, quote.price) > (current.timestamp, current.price) {
                        *current = quote;
                    }
                })
                .or_insert(quote);
        }

        if newest.len() < self.min_sources.max(1) {
            return Err(ValidationError::InsufficientSources {
                required: self.min_sources.max(1),
                available: newest.len(),
            });
        }

        let mut prices: Vec<(Price, &str)> = newest
            .values()
            .map(|q| (q.price, q.source_id.as_str()))
            .collect();
        prices.sort();

        let mid = prices.len() / 2;
        let price = if prices.len() % 2 == 0 {
            Price::midpoint(prices[mid - 1].0, prices[mid].0)
        } else {
            prices[mid].0
        };

        // An outlier far enough out to overflow saturates instead of failing the median
        let mut max_deviation_ppm = 0;
        for (quote_price, _) in &prices {
            let deviation = match deviation_ppm(*quote_price, price) {
                Err(ValidationError::Overflow(_)) => u128::MAX,
                other => other?,
            };
            max_deviation_ppm = max_deviation_ppm.max(deviation);
        }

        Ok(ConsensusPrice {
            pair: pair.clone(),
            price,
            source_count: prices.len(),
            max_deviation_ppm,
        })
    }

    /// Accept `proposed` when `|proposed - consensus| / consensus * 1e6 <= tolerance_ppm`.
    ///
    /// Returns the observed deviation in ppm (rounded down).
    pub fn validate_intermediary_price(
        &self,
        pair: &TradingPair,
        proposed: Price,
        consensus: &ConsensusPrice,
        tolerance_ppm: u64,
    ) -> Result<u128, ValidationError> {
        if pair != &consensus.pair {
            return Err(ValidationError::PairMismatch {
                expected: consensus.pair.to_string(),
                actual: pair.to_string(),
            });
        }
        if proposed.is_zero() {
            return Err(ValidationError::ZeroPrice);
        }
        within_tolerance(proposed, consensus.price, tolerance_ppm)
    }
}

/// Exact integer tolerance check, boundary inclusive
pub fn within_tolerance(
    proposed: Price,
    reference: Price,
    tolerance_ppm: u64,
) -> Result<u128, ValidationError> {
    if reference.is_zero() {
        return Err(ValidationError::ZeroPrice);
    }
    let scaled_diff = proposed
        .raw()
        .abs_diff(reference.raw())
        .checked_mul(PPM)
        .ok_or(ValidationError::Overflow("price deviation"))?;
    let limit = (tolerance_ppm as u128)
        .checked_mul(reference.raw())
        .ok_or(ValidationError::Overflow("price tolerance"))?;

    let deviation_ppm = scaled_diff / reference.raw();
    if scaled_diff > limit {
        return Err(ValidationError::PriceOutOfTolerance {
            deviation_ppm,
            tolerance_ppm,
        });
    }
    Ok(deviation_ppm)
}

/// Distance of `value` from `reference` in ppm, rounded down
pub fn deviation_ppm(value: Price, reference: Price) -> Result<u128, ValidationError> {
    if reference.is_zero() {
        return Err(ValidationError::ZeroPrice);
    }
    value
        .raw()
        .abs_diff(reference.raw())
        .checked_mul(PPM)
        .map(|d| d / reference.raw())
        .ok_or(ValidationError::Overflow("price deviation"))
}
