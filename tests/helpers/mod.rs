//! Shared fixtures for store, worker and gateway tests
#![allow(dead_code)]

use axum::Router;
use inference_queue::{
    app_state::AppState,
    models::job::{ClaimedJob, JobType},
    routes,
    services::{
        draft::{DraftClient, DraftConfig},
        queue::JobStore,
        storage::LocalStorage,
        vision::VisionAnalyzer,
        worker::{ClaimMode, HandlerError, JobHandler, WorkerConfig},
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub fn database_url(dir: &Path) -> String {
    format!("sqlite://{}", dir.join("jobs.sqlite3").display())
}

/// Fresh store in its own temp directory. Keep the `TempDir` alive.
pub async fn temp_store() -> (TempDir, JobStore) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = JobStore::open(&database_url(dir.path()))
        .await
        .expect("Failed to open job store");
    (dir, store)
}

/// Second, independent handle on the same file, standing in for another
/// process.
pub async fn reopen(dir: &TempDir) -> JobStore {
    JobStore::open(&database_url(dir.path()))
        .await
        .expect("Failed to reopen job store")
}

pub fn worker_config(claim_mode: ClaimMode) -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(50),
        handler_timeout: Duration::from_secs(5),
        claim_mode,
    }
}

/// Handler whose behavior is driven by the job payload:
///
/// - `{"fail": "msg"}` returns a backend error with `msg`
/// - `{"sleep_ms": n}` sleeps before answering
/// - `{"panic": true}` panics
/// - otherwise echoes `payload.result` (or `{"ok": true}`)
pub struct StubHandler {
    name: String,
    types: Vec<JobType>,
}

impl StubHandler {
    pub fn new(name: &str, types: &[JobType]) -> Self {
        Self {
            name: name.to_string(),
            types: types.to_vec(),
        }
    }
}

impl JobHandler for StubHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn job_types(&self) -> &[JobType] {
        &self.types
    }

    async fn handle(&self, job: &ClaimedJob) -> Result<serde_json::Value, HandlerError> {
        if let Some(ms) = job.payload.get("sleep_ms").and_then(|v| v.as_u64()) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if job.payload.get("panic").is_some() {
            panic!("stub handler panic");
        }
        if let Some(msg) = job.payload.get("fail").and_then(|v| v.as_str()) {
            return Err(HandlerError::Backend(msg.to_string()));
        }
        Ok(job
            .payload
            .get("result")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({ "ok": true })))
    }
}

/// Gateway router over a temp store, with an unreachable draft service and
/// no vision weights so every backend runs in mock mode.
pub async fn test_app() -> (TempDir, Router, JobStore) {
    let (dir, store) = temp_store().await;

    let draft = DraftClient::new(&DraftConfig {
        url: "http://127.0.0.1:9/gen".to_string(),
        timeout: Duration::from_secs(2),
    })
    .expect("Failed to build draft client");
    let vision = VisionAnalyzer::new(dir.path().join("models/llava"));
    let uploads = LocalStorage::new(dir.path().join("uploads"));

    let state = AppState::new(store.clone(), draft, vision, uploads);
    let prometheus = Arc::new(PrometheusBuilder::new().build_recorder().handle());

    (dir, routes::router(state, prometheus), store)
}

/// A tiny valid PNG.
pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::new(2, 2);
    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .expect("Failed to encode PNG");
    buf.into_inner()
}
