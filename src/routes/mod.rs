use axum::extract::rejection::JsonRejection;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::services::queue::StoreError;
use crate::services::storage::StorageError;
use crate::services::vision::VisionError;

pub mod analyze;
pub mod health;
pub mod jobs;
pub mod metrics;

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Build the gateway router with its middleware stack.
pub fn router(state: AppState, prometheus: Arc<PrometheusHandle>) -> Router {
    let metrics_state = metrics::MetricsState {
        prometheus,
        store: state.store.clone(),
    };

    Router::new()
        .route("/health", get(health::health_check))
        .route("/generate_text", post(jobs::generate_text))
        .route("/generate_image", post(jobs::generate_image))
        .route("/generate_video", post(jobs::generate_video))
        .route("/analyze_image", post(analyze::analyze_image))
        .route("/job_status/{job_id}", get(jobs::job_status))
        .route("/cancel_job/{job_id}", post(jobs::cancel_job))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(metrics_state),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES))
}

/// Errors surfaced by gateway handlers as `{"error": ...}` bodies.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not_found")]
    NotFound,

    #[error("invalid_mode")]
    InvalidMode,

    #[error("validation failed: {0}")]
    Validation(#[from] garde::Report),

    #[error("{0}")]
    BadRequest(String),

    #[error("invalid JSON body: {}", .0.body_text())]
    InvalidJson(#[from] JsonRejection),

    #[error("unsupported image format")]
    UnsupportedMedia,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Vision(#[from] VisionError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::InvalidMode | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidJson(rejection) => rejection.status(),
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::UnsupportedMedia => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Storage(_) | ApiError::Vision(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
