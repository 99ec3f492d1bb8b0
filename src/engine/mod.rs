//! Swap lifecycle engine
//!
//! Handles:
//! - Quote validation and swap creation
//! - Commit, payment detection, claim and refund against the escrow
//! - One background driver per in-flight swap
//! - Startup recovery and reconciliation with escrow status

mod driver;
mod lifecycle;
mod recovery;
mod retry;

pub use lifecycle::SwapEngine;
pub use recovery::RecoveryReport;
pub use retry::{with_retry, RetryPolicy};
