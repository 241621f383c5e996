use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use crate::db::{self, queries};
use crate::models::job::{ClaimedJob, JobId, JobRecord, JobType, Outcome};

/// Durable job queue over a shared SQLite file.
///
/// Every operation is one short statement against the store; nothing is held
/// across handler calls. Several processes may open the same file and compete
/// for work safely. Within one process, `enqueue` also wakes local workers
/// waiting on [`JobStore::notified`].
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
    work_available: Arc<Notify>,
}

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            work_available: Arc::new(Notify::new()),
        }
    }

    /// Open (or create) the store and bring its schema up to date.
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        let pool = db::init_pool(database_url).await?;
        db::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create a `queued` job and return its id.
    pub async fn enqueue(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
    ) -> Result<JobId, StoreError> {
        let id = JobId::generate();
        queries::insert_job(&self.pool, &id, job_type, &payload, Utc::now()).await?;

        metrics::counter!("jobs_enqueued_total", "type" => job_type.as_ref().to_string())
            .increment(1);
        tracing::info!(job_id = %id, job_type = %job_type, "Job enqueued");

        self.work_available.notify_waiters();
        Ok(id)
    }

    /// Claim the oldest eligible job of any type.
    pub async fn claim(&self) -> Result<Option<ClaimedJob>, StoreError> {
        self.claim_types(&[]).await
    }

    /// Claim the oldest eligible job whose type is in `types`
    /// (any type when `types` is empty).
    ///
    /// A claimed row whose type this build does not know is finished as
    /// `error` on the spot and the claim moves on to the next row.
    pub async fn claim_types(&self, types: &[JobType]) -> Result<Option<ClaimedJob>, StoreError> {
        while let Some(row) = queries::claim_next(&self.pool, types, Utc::now()).await? {
            let job_type = match row.job_type.parse::<JobType>() {
                Ok(job_type) => job_type,
                Err(_) => {
                    tracing::warn!(job_id = %row.id, job_type = %row.job_type, "Claimed job of unknown type");
                    let reason = serde_json::json!({
                        "error": format!("invalid_type: unknown job type {}", row.job_type)
                    });
                    self.set_result(&row.id, Outcome::Error, reason).await?;
                    continue;
                }
            };

            metrics::counter!("jobs_claimed_total", "type" => job_type.as_ref().to_string())
                .increment(1);
            tracing::debug!(job_id = %row.id, job_type = %job_type, "Job claimed");

            return Ok(Some(ClaimedJob {
                id: row.id,
                job_type,
                payload: row.payload,
            }));
        }

        Ok(None)
    }

    /// Record a terminal outcome. Returns `false` when the job was not
    /// running or already had a result, in which case nothing changed.
    pub async fn set_result(
        &self,
        id: &JobId,
        outcome: Outcome,
        result: serde_json::Value,
    ) -> Result<bool, StoreError> {
        let recorded = queries::set_result(&self.pool, id, outcome, &result, Utc::now()).await?;

        if recorded {
            match outcome {
                Outcome::Done => metrics::counter!("jobs_completed_total").increment(1),
                Outcome::Error => metrics::counter!("jobs_failed_total").increment(1),
            }
        } else {
            tracing::warn!(job_id = %id, ?outcome, "Result ignored: job not running or already finished");
        }

        Ok(recorded)
    }

    /// Snapshot of a job, or `None` if the id is unknown.
    pub async fn get_status(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(queries::get_job(&self.pool, id).await?)
    }

    /// Mark a job cancelled. Only prevents execution if it has not been
    /// claimed yet; a running handler is never interrupted.
    pub async fn cancel(&self, id: &JobId) -> Result<bool, StoreError> {
        let found = queries::cancel_job(&self.pool, id, Utc::now()).await?;

        if found {
            metrics::counter!("jobs_cancelled_total").increment(1);
            tracing::info!(job_id = %id, "Job cancel requested");
        }

        Ok(found)
    }

    /// Get the current queue depth (claimable jobs).
    pub async fn queue_depth(&self) -> Result<u64, StoreError> {
        let depth = queries::queue_depth(&self.pool).await?;
        metrics::gauge!("queue_depth").set(depth as f64);
        Ok(depth.max(0) as u64)
    }

    /// Check store connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Future that completes on the next local enqueue.
    ///
    /// Create it (and `enable` it) before claiming so an enqueue landing
    /// between an empty claim and the wait is not missed.
    pub fn notified(&self) -> Notified<'_> {
        self.work_available.notified()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}
