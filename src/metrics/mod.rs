//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Swap creation and terminal outcomes
//! - State transitions
//! - Escrow call latency and errors
//! - Price rejections and expiry races
//! - Recovery reconciliations

use crate::error::{SwapError, SwapResult};
use crate::swap::{Direction, SwapState};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Lifecycle metrics
    pub static ref SWAPS_CREATED: CounterVec = register_counter_vec!(
        "swap_engine_swaps_created_total",
        "Total swaps created by direction",
        &["direction"]
    ).unwrap();

    pub static ref SWAP_TRANSITIONS: CounterVec = register_counter_vec!(
        "swap_engine_transitions_total",
        "State transitions by source and target state",
        &["from", "to"]
    ).unwrap();

    pub static ref SWAPS_FINISHED: CounterVec = register_counter_vec!(
        "swap_engine_swaps_finished_total",
        "Swaps reaching a terminal state",
        &["direction", "state"]
    ).unwrap();

    pub static ref ACTIVE_DRIVERS: Gauge = register_gauge!(
        "swap_engine_active_drivers",
        "Swaps currently driven by a background task"
    ).unwrap();

    // Escrow metrics
    pub static ref ESCROW_LATENCY: HistogramVec = register_histogram_vec!(
        "swap_engine_escrow_latency_seconds",
        "Escrow client call latency",
        &["operation"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    pub static ref ESCROW_ERRORS: CounterVec = register_counter_vec!(
        "swap_engine_escrow_errors_total",
        "Escrow client errors by operation and kind",
        &["operation", "kind"]
    ).unwrap();

    // Safety metrics
    pub static ref PRICE_REJECTIONS: CounterVec = register_counter_vec!(
        "swap_engine_price_rejections_total",
        "Intermediary quotes rejected during validation",
        &["reason"]
    ).unwrap();

    pub static ref EXPIRY_RACES: CounterVec = register_counter_vec!(
        "swap_engine_expiry_races_total",
        "Claim/refund/payment ordering conflicts",
        &["race"]
    ).unwrap();

    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "swap_engine_reconciliations_total",
        "Local states overridden by escrow status",
        &["from", "to"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> SwapResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| SwapError::Config(format!("Cannot bind metrics port {}: {}", self.port, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| SwapError::TransientInfra {
                operation: "metrics_server".to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }
}

pub(crate) async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_swap_created(direction: Direction) {
    SWAPS_CREATED
        .with_label_values(&[direction.as_str()])
        .inc();
}

pub fn record_transition(direction: Direction, from: SwapState, to: SwapState) {
    if from == to {
        return;
    }
    SWAP_TRANSITIONS
        .with_label_values(&[from.as_str(), to.as_str()])
        .inc();
    if to.is_terminal() {
        SWAPS_FINISHED
            .with_label_values(&[direction.as_str(), to.as_str()])
            .inc();
    }
}

pub fn record_driver_started() {
    ACTIVE_DRIVERS.inc();
}

pub fn record_driver_stopped() {
    ACTIVE_DRIVERS.dec();
}

pub fn record_escrow_latency(operation: &str, latency_secs: f64) {
    ESCROW_LATENCY
        .with_label_values(&[operation])
        .observe(latency_secs);
}

pub fn record_escrow_error(operation: &str, kind: &str) {
    ESCROW_ERRORS
        .with_label_values(&[operation, kind])
        .inc();
}

pub fn record_price_rejection(reason: &str) {
    PRICE_REJECTIONS
        .with_label_values(&[reason])
        .inc();
}

pub fn record_expiry_race(race: &str) {
    EXPIRY_RACES
        .with_label_values(&[race])
        .inc();
}

pub fn record_reconciliation(from: SwapState, to: SwapState) {
    RECONCILIATIONS
        .with_label_values(&[from.as_str(), to.as_str()])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_count_terminal_outcomes() {
        let before = SWAPS_FINISHED
            .with_label_values(&["from_lightning", "claimed"])
            .get();
        record_transition(
            Direction::FromLightning,
            SwapState::PaymentDetected,
            SwapState::Claimed,
        );
        record_transition(Direction::FromLightning, SwapState::Claimed, SwapState::Claimed);
        let after = SWAPS_FINISHED
            .with_label_values(&["from_lightning", "claimed"])
            .get();
        assert!(after - before >= 1.0);
    }

    #[tokio::test]
    async fn handler_renders_text_format() {
        record_expiry_race("claim_after_expiry");
        let body = metrics_handler().await.unwrap();
        assert!(body.contains("swap_engine_expiry_races_total"));
    }
}
