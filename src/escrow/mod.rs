//! Escrow client facade
//!
//! The on-chain program and its RPC client live outside this crate. The engine
//! only needs these four operations; implementations report network failures as
//! `ClientError::Transient` and rejected instructions as `ClientError::Permanent`.

use crate::error::ClientResult;
use crate::payment::PaymentProof;
use crate::swap::SwapRecord;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// On-chain view of an escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Pending,
    Funded,
    Claimed,
    Refunded,
    Expired,
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EscrowStatus::Pending => "pending",
            EscrowStatus::Funded => "funded",
            EscrowStatus::Claimed => "claimed",
            EscrowStatus::Refunded => "refunded",
            EscrowStatus::Expired => "expired",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    /// Same proof was already used; treated as success
    AlreadyClaimed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundOutcome {
    Refunded,
    /// Refund already happened; treated as success
    AlreadyRefunded,
}

#[async_trait]
pub trait EscrowClient: Send + Sync {
    /// Lock funds / register the commitment. Must be idempotent per swap id.
    async fn commit(&self, record: &SwapRecord) -> ClientResult<String>;

    async fn get_status(&self, escrow_reference: &str) -> ClientResult<EscrowStatus>;

    async fn claim(&self, escrow_reference: &str, proof: &PaymentProof)
        -> ClientResult<ClaimOutcome>;

    async fn refund(&self, escrow_reference: &str) -> ClientResult<RefundOutcome>;
}
