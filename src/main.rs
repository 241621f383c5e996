use inference_queue::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::{
        draft::DraftClient, queue::JobStore, storage::LocalStorage, vision::VisionAnalyzer,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing inference gateway");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("jobs_enqueued_total", "Jobs accepted into the queue");
    metrics::describe_counter!("jobs_cancelled_total", "Cancel requests matching a job");
    metrics::describe_gauge!("queue_depth", "Jobs waiting to be claimed");

    // The store is the only shared resource; without it the gateway is useless.
    tracing::info!(database_url = %config.database_url, "Opening job store");
    let store = match JobStore::open(&config.database_url).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "Job store unavailable, exiting");
            std::process::exit(1);
        }
    };

    let draft = DraftClient::new(&config.draft_config()).expect("Failed to build draft client");
    let vision = VisionAnalyzer::new(config.llava_dir());
    let uploads = LocalStorage::new(config.uploads_dir());

    let state = AppState::new(store, draft, vision, uploads);
    let app = routes::router(state, prometheus_handle);

    tracing::info!("Starting inference gateway on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");
}
