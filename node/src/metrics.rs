// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Prometheus Metrics
//!
//! Exposes operational metrics for the consensus engine. Scraped by
//! Prometheus at the `/metrics` HTTP endpoint. Metrics, not a claimed
//! feature of spec.md, are carried regardless per SPEC_FULL.md §1 ("ambient
//! concerns... still use the teacher's crates even when Non-goals exclude
//! observability layers") — the teacher exposes its own `/metrics` the same
//! way, via a dedicated `prometheus::Registry` and an `axum` handler.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Prometheus metric handles for the engine. Clone-friendly — the inner
/// handles are themselves cheaply cloneable prometheus types.
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,
    /// Total blocks this node has finalized and had committed.
    pub blocks_produced_total: IntCounter,
    /// Total empty slots broadcast (no transactions scheduled).
    pub empty_slots_total: IntCounter,
    /// Total slot misses (expected signer penalized and downgraded).
    pub slot_misses_total: IntCounter,
    /// Total witness-list reshuffles performed.
    pub witness_reshuffles_total: IntCounter,
    /// Total epoch transitions completed.
    pub epochs_completed_total: IntCounter,
    /// Number of peers this node currently considers online.
    pub peers_online: IntGauge,
    /// Current epoch number.
    pub epoch_number: IntGauge,
}

impl EngineMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("ddpoa".into()), None)
            .expect("failed to create prometheus registry");

        macro_rules! counter {
            ($name:literal, $help:literal) => {{
                let c = IntCounter::new($name, $help).expect("metric creation");
                registry.register(Box::new(c.clone())).expect("metric registration");
                c
            }};
        }
        macro_rules! gauge {
            ($name:literal, $help:literal) => {{
                let g = IntGauge::new($name, $help).expect("metric creation");
                registry.register(Box::new(g.clone())).expect("metric registration");
                g
            }};
        }

        Self {
            blocks_produced_total: counter!("blocks_produced_total", "Total blocks finalized and committed by this node"),
            empty_slots_total: counter!("empty_slots_total", "Total slots this node skipped for lack of transactions"),
            slot_misses_total: counter!("slot_misses_total", "Total slots missed by the expected witness"),
            witness_reshuffles_total: counter!("witness_reshuffles_total", "Total witness-list reshuffles performed"),
            epochs_completed_total: counter!("epochs_completed_total", "Total epoch transitions completed"),
            peers_online: gauge!("peers_online", "Number of peers currently considered online"),
            epoch_number: gauge!("epoch_number", "Current epoch number"),
            registry,
        }
    }

    /// Encodes all registered metrics in the Prometheus text exposition
    /// format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ddpoa_engine::metrics::MetricsSink for EngineMetrics {
    fn block_produced(&self) {
        self.blocks_produced_total.inc();
    }

    fn empty_slot(&self) {
        self.empty_slots_total.inc();
    }

    fn slot_missed(&self) {
        self.slot_misses_total.inc();
    }

    fn witness_reshuffled(&self) {
        self.witness_reshuffles_total.inc();
    }

    fn epoch_completed(&self) {
        self.epochs_completed_total.inc();
    }

    fn set_peers_online(&self, count: i64) {
        self.peers_online.set(count);
    }

    fn set_epoch_number(&self, number: i64) {
        self.epoch_number.set(number);
    }
}

pub type SharedMetrics = Arc<EngineMetrics>;

/// Axum handler rendering `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
