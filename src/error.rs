//! Error types for the swap engine

use crate::swap::SwapState;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for swap lifecycle operations
#[derive(Error, Debug)]
pub enum SwapError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transient error during {operation}: {message}")]
    TransientInfra { operation: String, message: String },

    #[error("Escrow protocol error for swap {swap_id}: {message}")]
    EscrowProtocol { swap_id: String, message: String },

    #[error("Expiry race on swap {swap_id}: {race}")]
    ExpiryRace { swap_id: String, race: ExpiryRace },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Swap {swap_id} cannot {operation} from state {state}")]
    WrongState {
        swap_id: String,
        operation: &'static str,
        state: SwapState,
    },

    #[error("Wait on swap {swap_id} cancelled")]
    Cancelled { swap_id: String },

    #[error("Engine is not ready: recovery sweep has not completed")]
    NotReady,
}

impl SwapError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            SwapError::TransientInfra { .. } => true,
            SwapError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Check if error needs operator attention
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            SwapError::ExpiryRace { .. } | SwapError::EscrowProtocol { .. }
        )
    }
}

/// Result type for swap operations
pub type SwapResult<T> = Result<T, SwapError>;

/// Input rejected before any state mutation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("amount mismatch: input {input} != output {output} + fee {fee}")]
    AmountMismatch { input: u64, output: u64, fee: u64 },

    #[error("fee {fee} exceeds input amount {input}")]
    FeeExceedsInput { input: u64, fee: u64 },

    #[error("output amount must be greater than zero")]
    ZeroAmount,

    #[error("fee ratio {fee_ppm} ppm exceeds maximum {max_ppm} ppm")]
    FeeOutOfTolerance { fee_ppm: u128, max_ppm: u64 },

    #[error("insufficient price sources: need {required}, have {available}")]
    InsufficientSources { required: usize, available: usize },

    #[error("price deviates {deviation_ppm} ppm from consensus, tolerance is {tolerance_ppm} ppm")]
    PriceOutOfTolerance {
        deviation_ppm: u128,
        tolerance_ppm: u64,
    },

    #[error("pair mismatch: expected {expected}, got {actual}")]
    PairMismatch { expected: String, actual: String },

    #[error("price must be greater than zero")]
    ZeroPrice,

    #[error("arithmetic overflow computing {0}")]
    Overflow(&'static str),

    #[error("invalid payment hash: {0}")]
    InvalidPaymentHash(String),

    #[error("payment reference must not be empty")]
    EmptyPaymentReference,

    #[error("preimage does not match payment hash {payment_hash}")]
    ProofMismatch { payment_hash: String },

    #[error("payment of {received} is below required {required}")]
    InsufficientPayment { required: u64, received: u64 },

    #[error("expiry {expiry} is not in the future (now {now})")]
    ExpiryInPast { expiry: u64, now: u64 },
}

/// Claim/refund/payment ordering conflicts that need manual reconciliation
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryRace {
    #[error("claim attempted after expiry")]
    ClaimAfterExpiry,

    #[error("refund attempted after claim")]
    RefundAfterClaim,

    #[error("payment proof arrived after expiry")]
    PaymentAfterExpiry,
}

impl ExpiryRace {
    /// Label for metrics
    pub fn name(&self) -> &'static str {
        match self {
            ExpiryRace::ClaimAfterExpiry => "claim_after_expiry",
            ExpiryRace::RefundAfterClaim => "refund_after_claim",
            ExpiryRace::PaymentAfterExpiry => "payment_after_expiry",
        }
    }
}

/// Swap store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Swap {0} already exists")]
    DuplicateId(String),

    #[error("Swap {0} not found")]
    NotFound(String),

    #[error("Invalid state transition for swap {swap_id} from {from} to {to}")]
    InvalidTransition {
        swap_id: String,
        from: SwapState,
        to: SwapState,
    },

    #[error("Field {field} of swap {swap_id} is immutable")]
    ImmutableField {
        swap_id: String,
        field: &'static str,
    },

    #[error("Swap {swap_id} is in non-terminal state {state}")]
    NotTerminal { swap_id: String, state: SwapState },

    #[error("Invalid swap id: {0}")]
    InvalidId(String),

    #[error("Field {field} of swap {swap_id} is out of range for the store")]
    OutOfRange {
        swap_id: String,
        field: &'static str,
    },

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Database(_) | StoreError::Io(_))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by external collaborators (escrow client, payment watcher)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Transient(_) => "transient",
            ClientError::Permanent(_) => "permanent",
        }
    }
}

/// Result type for collaborator calls
pub type ClientResult<T> = Result<T, ClientError>;
