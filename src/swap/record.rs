//! The persisted swap record

use super::{SuccessAction, SwapState};
use crate::error::{StoreError, StoreResult};
use crate::payment::PaymentProof;
use crate::price::Price;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Chain asset locked in escrow, intermediary pays a Lightning invoice
    ToLightning,
    /// Lightning payment to the intermediary, chain asset released from escrow
    FromLightning,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ToLightning => "to_lightning",
            Direction::FromLightning => "from_lightning",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction together with the fields only that direction carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "direction", rename_all = "snake_case")]
pub enum SwapKind {
    ToLightning {
        /// BOLT11 invoice the intermediary has to pay
        invoice: String,
        #[serde(default)]
        success_action: Option<SuccessAction>,
    },
    FromLightning,
}

impl SwapKind {
    pub fn direction(&self) -> Direction {
        match self {
            SwapKind::ToLightning { .. } => Direction::ToLightning,
            SwapKind::FromLightning => Direction::FromLightning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub id: String,
    pub kind: SwapKind,
    pub state: SwapState,

    /// Amounts in base units, `input_amount == output_amount + fee`
    pub input_amount: u64,
    pub output_amount: u64,
    pub fee: u64,
    /// Intermediary price accepted at creation
    pub price: Price,

    /// Unix seconds; no claim after this point
    pub expiry_timestamp: u64,

    /// Hex sha256 of the Lightning preimage
    pub payment_hash: String,
    pub escrow_reference: Option<String>,
    pub payment_proof: Option<PaymentProof>,

    /// Last condition surfaced to operators
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SwapRecord {
    pub fn direction(&self) -> Direction {
        self.kind.direction()
    }

    /// Invoice for outgoing swaps, payment hash for incoming ones
    pub fn payment_reference(&self) -> &str {
        match &self.kind {
            SwapKind::ToLightning { invoice, .. } => invoice,
            SwapKind::FromLightning => &self.payment_hash,
        }
    }

    pub fn success_action(&self) -> Option<&SuccessAction> {
        match &self.kind {
            SwapKind::ToLightning { success_action, .. } => success_action.as_ref(),
            SwapKind::FromLightning => None,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expiry_timestamp
    }

    /// Move along a regular lifecycle edge
    pub fn transition(&mut self, next: SwapState) -> StoreResult<()> {
        if !self.state.can_advance_to(next) {
            return Err(self.invalid_transition(next));
        }
        self.state = next;
        Ok(())
    }

    /// Align with escrow-observed state
    pub fn reconcile(&mut self, next: SwapState) -> StoreResult<()> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_reconcile_to(next) {
            return Err(self.invalid_transition(next));
        }
        self.state = next;
        Ok(())
    }

    fn invalid_transition(&self, next: SwapState) -> StoreError {
        StoreError::InvalidTransition {
            swap_id: self.id.clone(),
            from: self.state,
            to: next,
        }
    }

    /// Reject an update that touched fields fixed at creation
    pub fn ensure_unchanged_identity(&self, before: &SwapRecord) -> StoreResult<()> {
        let checks: [(&'static str, bool); 7] = [
            ("id", self.id == before.id),
            ("direction", self.direction() == before.direction()),
            ("input_amount", self.input_amount == before.input_amount),
            ("output_amount", self.output_amount == before.output_amount),
            ("fee", self.fee == before.fee),
            ("expiry_timestamp", self.expiry_timestamp == before.expiry_timestamp),
            ("payment_hash", self.payment_hash == before.payment_hash),
        ];

        match checks.into_iter().find(|(_, same)| !same) {
            Some((field, _)) => Err(StoreError::ImmutableField {
                swap_id: before.id.clone(),
                field,
            }),
            None => Ok(()),
        }
    }
}

/// Swap id: keccak-256 over the payment hash and a local nonce
pub fn derive_swap_id(payment_hash: &[u8], nonce: &[u8]) -> String {
    let mut hasher = Keccak256::new();
    hasher.update(payment_hash);
    hasher.update(nonce);
    hex::encode(hasher.finalize())
}
