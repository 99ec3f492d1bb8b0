//! Normalized price quote types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;

/// Fixed-point scale: a `Price` of `PRICE_SCALE` is 1 quote unit per base unit
pub const PRICE_SCALE: u128 = 1_000_000_000_000_000_000;

/// Quote-asset base units per base-asset base unit, fixed point (18 decimals)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Price(u128);

impl Price {
    pub const ZERO: Price = Price(0);

    /// Wrap an already scaled value
    pub const fn from_scaled(raw: u128) -> Self {
        Price(raw)
    }

    /// `numerator / denominator`, `None` on overflow or zero denominator
    pub fn from_ratio(numerator: u128, denominator: u128) -> Option<Self> {
        if denominator == 0 {
            return None;
        }
        numerator
            .checked_mul(PRICE_SCALE)
            .map(|scaled| Price(scaled / denominator))
    }

    pub fn raw(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Mean of two prices, rounded down
    pub fn midpoint(a: Price, b: Price) -> Price {
        // avoids a + b overflowing
        Price(a.0 / 2 + b.0 / 2 + (a.0 % 2 + b.0 % 2) / 2)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / PRICE_SCALE;
        let frac = self.0 % PRICE_SCALE;
        if frac == 0 {
            return write!(f, "{whole}");
        }
        let frac = format!("{frac:018}");
        write!(f, "{whole}.{}", frac.trim_end_matches('0'))
    }
}

impl From<Price> for String {
    fn from(price: Price) -> Self {
        price.0.to_string()
    }
}

impl TryFrom<String> for Price {
    type Error = ParseIntError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse::<u128>().map(Price)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TradingPair {
    pub base: String,
    pub quote: String,
}

impl TradingPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// A single source's price for a pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub pair: TradingPair,
    pub price: Price,
    pub source_id: String,
    /// Unix seconds the source observed the price
    pub timestamp: u64,
}

/// Price agreed by the independent sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusPrice {
    pub pair: TradingPair,
    pub price: Price,
    pub source_count: usize,
    /// Widest distance of an accepted quote from the consensus
    pub max_deviation_ppm: u128,
}
