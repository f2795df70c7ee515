//! Prometheus recorder and the /metrics router.

use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder. Call once, from the binary.
    pub fn init() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("prometheus: install recorder");
        describe_pipeline_metrics();
        Self { handle }
    }

    /// Router exposing `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time metric registration (so series show up on /metrics).
pub fn describe_pipeline_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "pipeline_items_ingested_total",
            "Items pulled from the feed."
        );
        describe_counter!(
            "pipeline_queue_dropped_total",
            "Oldest queued items dropped on queue overflow."
        );
        describe_counter!(
            "classify_retries_total",
            "Classification retry attempts after transient failures."
        );
        describe_counter!(
            "classify_transient_total",
            "Items dropped after exhausting classification retries."
        );
        describe_counter!(
            "classify_malformed_total",
            "Items dropped on malformed classifier responses."
        );
        describe_counter!(
            "events_built_total",
            "News events built after dedup and validation."
        );
        describe_counter!(
            "events_duplicate_total",
            "Items dropped by source_id deduplication."
        );
        describe_counter!(
            "events_late_dropped_total",
            "Events rejected by window buffers as late arrivals."
        );
        describe_counter!("window_evaluations_total", "Window evaluation ticks.");
        describe_counter!(
            "signals_emitted_total",
            "Trading signals delivered to sinks."
        );
        describe_counter!(
            "signals_suppressed_total",
            "Signals suppressed by cooldown hysteresis."
        );
        describe_gauge!(
            "window_event_count",
            "Events currently retained, per window length."
        );
    });
}
