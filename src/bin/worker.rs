use inference_queue::{
    config::{AppConfig, WorkerKind},
    services::{
        diffusion::DiffusionHandler,
        queue::{JobStore, StoreError},
        storage::LocalStorage,
        text_gen::HeavyTextHandler,
        worker::{JobHandler, Worker, WorkerConfig},
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
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

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    tracing::info!(kind = ?config.worker_kind, "Starting job worker");

    if let Some(addr) = config.worker_metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        metrics::describe_counter!("jobs_claimed_total", "Jobs claimed by this worker");
        metrics::describe_counter!("jobs_completed_total", "Jobs finished with status done");
        metrics::describe_counter!("jobs_failed_total", "Jobs finished with status error");
        metrics::describe_histogram!("job_processing_seconds", "Handler wall time per job");
        tracing::info!(%addr, "Worker metrics listener started");
    }

    let store = match JobStore::open(&config.database_url).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "Job store unavailable, exiting");
            std::process::exit(1);
        }
    };

    let outputs = LocalStorage::new(config.outputs_dir());
    let worker_config = config.worker_config();

    let result = match config.worker_kind {
        WorkerKind::TextHeavy => {
            let handler = HeavyTextHandler::new(config.text_gen_config(), outputs);
            run(store, handler, worker_config).await
        }
        WorkerKind::Diffusion => {
            let handler = DiffusionHandler::new(config.diffusion_config(), outputs);
            run(store, handler, worker_config).await
        }
    };

    // Store failures are fatal; leave restarts to the process supervisor.
    if let Err(e) = result {
        tracing::error!(error = %e, "Worker stopped on store failure");
        std::process::exit(1);
    }
}

async fn run<H: JobHandler>(
    store: JobStore,
    handler: H,
    config: WorkerConfig,
) -> Result<(), StoreError> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received, finishing current job");
        on_signal.cancel();
    });

    Worker::new(store, handler, config).run_until(cancel).await
}
