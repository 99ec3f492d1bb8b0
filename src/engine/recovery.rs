//! Startup sweep over in-flight swaps

use super::SwapEngine;
use crate::error::SwapResult;
use crate::swap::{SwapRecord, SwapState};

use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Non-terminal records found in the store
    pub scanned: usize,
    /// Records whose state was changed to match the escrow
    pub reconciled: usize,
    /// Drivers re-attached
    pub resumed: usize,
    /// Records the escrow could not be queried for
    pub flagged: usize,
}

impl SwapEngine {
    /// Reconcile every in-flight swap against the escrow and re-attach a driver
    /// for each one still open. The engine accepts new swaps only afterwards.
    pub async fn recover(self: &Arc<Self>) -> SwapResult<RecoveryReport> {
        let mut pending: Vec<SwapRecord> = Vec::new();
        for state in SwapState::IN_FLIGHT {
            pending.extend(self.store.list_by_state(state).await?);
        }

        let mut report = RecoveryReport {
            scanned: pending.len(),
            ..RecoveryReport::default()
        };

        for record in pending {
            let current = match self.reconcile(&record.id).await {
                Ok(current) => {
                    if current.state != record.state {
                        report.reconciled += 1;
                    }
                    current
                }
                Err(e) => {
                    warn!("Swap {} could not be reconciled: {}", record.id, e);
                    report.flagged += 1;
                    record
                }
            };

            if !current.state.is_terminal() && self.spawn_driver(&current.id).is_some() {
                report.resumed += 1;
            }
        }

        self.ready.store(true, Ordering::SeqCst);
        info!(
            "Recovery complete: {} in flight, {} reconciled, {} resumed, {} flagged",
            report.scanned, report.reconciled, report.resumed, report.flagged
        );
        Ok(report)
    }
}
