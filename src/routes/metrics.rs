use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::services::queue::JobStore;

#[derive(Clone)]
pub struct MetricsState {
    pub prometheus: Arc<PrometheusHandle>,
    pub store: JobStore,
}

/// GET /metrics — Prometheus text exposition.
///
/// The queue depth gauge is refreshed from the store on every scrape since
/// workers in other processes change it.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    if let Err(e) = state.store.queue_depth().await {
        tracing::warn!(error = %e, "Failed to refresh queue depth gauge");
    }
    state.prometheus.render()
}
