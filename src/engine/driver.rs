//! Background tasks that drive swaps to a terminal state

use super::SwapEngine;
use crate::error::{SwapError, SwapResult};
use crate::metrics;
use crate::price::PriceQuote;
use crate::swap::{SwapRecord, SwapRequest, SwapState};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const DRAIN_POLL: Duration = Duration::from_millis(10);

impl SwapEngine {
    /// Spawn a driver for `id`. Returns `None` if one is already running.
    pub fn spawn_driver(
        self: &Arc<Self>,
        id: &str,
    ) -> Option<JoinHandle<SwapResult<SwapRecord>>> {
        if self.drivers.insert(id.to_string(), ()).is_some() {
            debug!("Swap {} already has a driver", id);
            return None;
        }

        let engine = Arc::clone(self);
        let id = id.to_string();
        Some(tokio::spawn(async move {
            let result = engine.drive(&id).await;

            engine.wakers.remove(&id);
            engine.drivers.remove(&id);
            result
        }))
    }

    /// Create a swap and hand it to a driver that carries it to a terminal state
    pub async fn create_and_drive(
        self: &Arc<Self>,
        request: SwapRequest,
        quotes: &[PriceQuote],
    ) -> SwapResult<SwapRecord> {
        let record = self.create_swap(request, quotes).await?;
        self.spawn_driver(&record.id);
        Ok(record)
    }

    /// Stop all drivers. Persisted state is left as is.
    pub fn shutdown(&self) {
        info!("Stopping {} swap drivers", self.drivers.len());
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn active_drivers(&self) -> usize {
        self.drivers.len()
    }

    /// Wait for drivers to finish their current step after `shutdown`.
    /// Returns false if some are still running after `timeout`.
    pub async fn wait_for_drivers(&self, timeout: Duration) -> bool {
        let drained = tokio::time::timeout(timeout, async {
            while !self.drivers.is_empty() {
                sleep(DRAIN_POLL).await;
            }
        })
        .await
        .is_ok();
        if !drained {
            warn!("{} swap drivers still running after {:?}", self.drivers.len(), timeout);
        }
        drained
    }

    async fn drive(&self, id: &str) -> SwapResult<SwapRecord> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return Err(cancelled(id));
        }

        let waker = self.wakers.entry(id.to_string()).or_default().clone();
        metrics::record_driver_started();
        let result = self.drive_loop(id, &waker, &mut shutdown).await;
        metrics::record_driver_stopped();
        result
    }

    async fn drive_loop(
        &self,
        id: &str,
        waker: &Notify,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SwapResult<SwapRecord> {
        let mut failures = 0u32;
        let mut last_state: Option<SwapState> = None;

        loop {
            // Permits bound concurrent steps; waiting between steps holds none
            let permit = tokio::select! {
                permit = self.permits.acquire() => permit.map_err(|_| cancelled(id))?,
                _ = shutdown.changed() => return Err(cancelled(id)),
            };
            let outcome = self.step(id).await;
            drop(permit);

            let delay = match outcome {
                Ok(record) if record.state.is_terminal() => {
                    info!("Swap {} finished in state {}", id, record.state);
                    return Ok(record);
                }
                Ok(record) => {
                    failures = 0;
                    let progressed = last_state != Some(record.state);
                    last_state = Some(record.state);
                    if record.state == SwapState::Committed || !progressed {
                        self.config.poll_interval()
                    } else {
                        Duration::ZERO
                    }
                }
                Err(e) if e.is_retryable() => {
                    failures = failures.saturating_add(1);
                    let delay = self.retry.backoff(failures).max(self.config.poll_interval());
                    warn!("Swap {} step failed ({} in a row): {}, retrying in {:?}", id, failures, e, delay);
                    delay
                }
                Err(e) => {
                    if e.should_alert() {
                        error!("Swap {} needs operator attention: {}", id, e);
                    } else {
                        warn!("Driver for swap {} stopped: {}", id, e);
                    }
                    return Err(e);
                }
            };

            tokio::select! {
                _ = sleep(delay) => {}
                _ = waker.notified() => {
                    debug!("Driver for swap {} woken by payment notification", id);
                }
                _ = shutdown.changed() => {
                    info!("Driver for swap {} cancelled", id);
                    return Err(cancelled(id));
                }
            }
        }
    }
}

fn cancelled(id: &str) -> SwapError {
    SwapError::Cancelled {
        swap_id: id.to_string(),
    }
}
