//! Worker dispatch loop.
//!
//! A worker claims one job at a time, runs the handler for its specialty
//! under a timeout, and writes exactly one terminal outcome back to the
//! store. A failing job never stops the loop; only store failures do.

use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::models::job::{ClaimedJob, JobId, JobType, Outcome};
use crate::services::process::ProcessError;
use crate::services::queue::{JobStore, StoreError};
use crate::services::storage::StorageError;

/// A type-specific backend invoked by a worker.
pub trait JobHandler: Send + Sync + 'static {
    /// Name used in logs and mismatch reasons.
    fn name(&self) -> &str;

    /// Job types this handler can process.
    fn job_types(&self) -> &[JobType];

    /// Run the job and return the result document stored on success.
    fn handle(
        &self,
        job: &ClaimedJob,
    ) -> impl Future<Output = Result<serde_json::Value, HandlerError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("invalid_type: worker {worker} does not handle {job_type}")]
    InvalidType { worker: String, job_type: JobType },

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("handler aborted: {0}")]
    Aborted(String),

    #[error("{0}")]
    Backend(String),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl HandlerError {
    /// Result document stored for a failed job.
    pub fn to_result(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string() })
    }
}

/// How a worker selects jobs from the shared queue.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClaimMode {
    /// Claims are filtered to the handler's job types inside the store.
    #[default]
    Partitioned,
    /// Claims take the oldest job of any type; foreign types end in `error`.
    Shared,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub handler_timeout: Duration,
    pub claim_mode: ClaimMode,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            handler_timeout: Duration::from_secs(600),
            claim_mode: ClaimMode::Partitioned,
        }
    }
}

/// Outcome of processing one claimed job.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedJob {
    pub id: JobId,
    pub outcome: Outcome,
}

pub struct Worker<H> {
    store: JobStore,
    handler: Arc<H>,
    config: WorkerConfig,
}

impl<H: JobHandler> Worker<H> {
    pub fn new(store: JobStore, handler: H, config: WorkerConfig) -> Self {
        Self {
            store,
            handler: Arc::new(handler),
            config,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Run until a store error occurs.
    pub async fn run(&self) -> Result<(), StoreError> {
        self.run_until(CancellationToken::new()).await
    }

    /// Run until `cancel` fires. Cancellation is only observed between jobs,
    /// never while a claim or a handler is in flight.
    pub async fn run_until(&self, cancel: CancellationToken) -> Result<(), StoreError> {
        tracing::info!(
            worker = self.handler.name(),
            job_types = ?self.handler.job_types(),
            claim_mode = ?self.config.claim_mode,
            "Worker ready, starting job processing loop"
        );

        while !cancel.is_cancelled() {
            let notified = self.store.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.claim().await? {
                Some(job) => {
                    self.process(job).await?;
                }
                None => {
                    tracing::trace!("No jobs available, waiting");
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = &mut notified => {}
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }

        tracing::info!(worker = self.handler.name(), "Worker stopped");
        Ok(())
    }

    /// Claim and process at most one job. Returns `None` when idle.
    pub async fn run_once(&self) -> Result<Option<ProcessedJob>, StoreError> {
        match self.claim().await? {
            Some(job) => Ok(Some(self.process(job).await?)),
            None => Ok(None),
        }
    }

    async fn claim(&self) -> Result<Option<ClaimedJob>, StoreError> {
        match self.config.claim_mode {
            ClaimMode::Partitioned => self.store.claim_types(self.handler.job_types()).await,
            ClaimMode::Shared => self.store.claim().await,
        }
    }

    /// Resolve a job this worker has claimed. Always records a terminal
    /// outcome: the worker cannot hand a claimed job back.
    pub async fn process(&self, job: ClaimedJob) -> Result<ProcessedJob, StoreError> {
        tracing::info!(job_id = %job.id, job_type = %job.job_type, "Processing job");
        let start = Instant::now();

        let result = if self.handler.job_types().contains(&job.job_type) {
            self.execute(&job).await
        } else {
            Err(HandlerError::InvalidType {
                worker: self.handler.name().to_string(),
                job_type: job.job_type,
            })
        };

        let (outcome, document) = match result {
            Ok(value) => {
                tracing::info!(
                    job_id = %job.id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job completed successfully"
                );
                (Outcome::Done, value)
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Job processing failed");
                (Outcome::Error, e.to_result())
            }
        };

        metrics::histogram!("job_processing_seconds").record(start.elapsed().as_secs_f64());
        self.store.set_result(&job.id, outcome, document).await?;

        Ok(ProcessedJob {
            id: job.id,
            outcome,
        })
    }

    /// Run the handler on its own task so a timeout can abort it and a panic
    /// stays contained. Aborting drops the handler future, which kills any
    /// child process it spawned.
    async fn execute(&self, job: &ClaimedJob) -> Result<serde_json::Value, HandlerError> {
        let handler = Arc::clone(&self.handler);
        let owned = job.clone();
        let mut task = tokio::spawn(async move { handler.handle(&owned).await });

        match tokio::time::timeout(self.config.handler_timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(HandlerError::Aborted(join_err.to_string())),
            Err(_) => {
                task.abort();
                Err(HandlerError::Timeout(self.config.handler_timeout))
            }
        }
    }
}
