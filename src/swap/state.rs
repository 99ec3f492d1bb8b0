//! Swap lifecycle states and the transition table

use crate::error::StoreError;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapState {
    /// Record exists locally, nothing committed on-chain yet
    Created,
    /// Escrow holds funds or is ready to accept the Lightning payment
    Committed,
    /// Payment proof obtained, claim not yet confirmed
    PaymentDetected,
    /// Deadline passed without payment, refund pending
    Expired,
    Claimed,
    Refunded,
    Failed,
}

impl SwapState {
    pub const ALL: [SwapState; 7] = [
        SwapState::Created,
        SwapState::Committed,
        SwapState::PaymentDetected,
        SwapState::Expired,
        SwapState::Claimed,
        SwapState::Refunded,
        SwapState::Failed,
    ];

    /// States the recovery sweep has to resume
    pub const IN_FLIGHT: [SwapState; 4] = [
        SwapState::Created,
        SwapState::Committed,
        SwapState::PaymentDetected,
        SwapState::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SwapState::Created => "created",
            SwapState::Committed => "committed",
            SwapState::PaymentDetected => "payment_detected",
            SwapState::Expired => "expired",
            SwapState::Claimed => "claimed",
            SwapState::Refunded => "refunded",
            SwapState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapState::Claimed | SwapState::Refunded | SwapState::Failed
        )
    }

    /// Regular lifecycle edges
    pub fn can_advance_to(&self, next: SwapState) -> bool {
        use SwapState::*;
        matches!(
            (self, next),
            (Created, Committed)
                | (Created, Expired)
                | (Created, Failed)
                | (Committed, PaymentDetected)
                | (Committed, Expired)
                | (Committed, Failed)
                | (PaymentDetected, Claimed)
                | (Expired, Refunded)
        )
    }

    /// Edges only taken when escrow state overrides the local view
    pub fn can_reconcile_to(&self, next: SwapState) -> bool {
        use SwapState::*;
        if self.can_advance_to(next) {
            return true;
        }
        !self.is_terminal() && matches!(next, Claimed | Refunded)
    }
}

impl fmt::Display for SwapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwapState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SwapState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown swap state: {s}")))
    }
}
