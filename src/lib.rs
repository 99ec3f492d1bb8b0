//! Swap Engine - Lightning <-> on-chain escrow atomic swap lifecycle
//!
//! Drives each swap from creation through escrow commitment, payment
//! detection, claim or refund, checks intermediary quotes against a redundant
//! price consensus, and keeps every swap in a durable store so in-flight swaps
//! survive restarts.

pub mod api;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod escrow;
mod locks;
pub mod metrics;
pub mod payment;
pub mod price;
pub mod service;
pub mod store;
pub mod swap;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Settings;
pub use engine::{RecoveryReport, SwapEngine};
pub use error::{ClientError, ExpiryRace, StoreError, SwapError, SwapResult, ValidationError};
pub use escrow::{ClaimOutcome, EscrowClient, EscrowStatus, RefundOutcome};
pub use payment::{PaymentProof, PaymentWatcher};
pub use store::{JsonFileStore, MemoryStore, PostgresStore, SwapStore};
pub use swap::{Direction, SwapKind, SwapRecord, SwapRequest, SwapState};
