// src/metrics.rs
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
        ensure_metrics_described();
        Ok(Self { handle })
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

/// One-time metric descriptions so series show up with help text.
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("queries_total", "Queries answered, labelled by route.");
        describe_counter!("sitemap_refresh_total", "Sitemap refresh attempts.");
        describe_counter!("sitemap_refresh_errors_total", "Failed sitemap refreshes.");
        describe_gauge!("sitemap_entries", "URLs in the current sitemap snapshot.");
        describe_counter!(
            "allowlist_dropped_total",
            "Candidate URLs dropped for a host outside the allowlist."
        );
        describe_counter!("fetch_dropped_total", "Live candidates dropped after a failed fetch.");
        describe_histogram!("fetch_ms", "Live page fetch time in milliseconds.");
        describe_counter!(
            "retrieval_errors_total",
            "Embedding or vector index failures, labelled by stage."
        );
        describe_counter!("generation_errors_total", "Answer generation failures.");
        describe_counter!(
            "answer_regenerations_total",
            "Collected answers regenerated with a stricter prompt, by reason."
        );
        describe_counter!(
            "official_link_injected_total",
            "Answers that needed the curated fallback link."
        );
        describe_counter!("stream_cancelled_total", "Answer streams abandoned by the client.");
    });
}
