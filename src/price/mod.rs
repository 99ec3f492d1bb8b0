//! Redundant price oracle aggregation
//!
//! Quotes arrive already parsed from independent sources; this module only
//! decides the consensus and whether an intermediary price is acceptable.

mod aggregator;
mod quote;

pub use aggregator::{deviation_ppm, within_tolerance, PriceAggregator};
pub use quote::{ConsensusPrice, Price, PriceQuote, TradingPair, PRICE_SCALE};
