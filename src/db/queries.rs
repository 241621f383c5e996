use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::models::job::{JobId, JobRecord, JobStatus, JobType, Outcome};

fn decode_err(e: strum::ParseError) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}

/// A row moved to `running` by [`claim_next`]. The type is left as stored
/// text; the caller decides what to do with types it does not know.
#[derive(Debug, Clone)]
pub struct ClaimedRow {
    pub id: JobId,
    pub job_type: String,
    pub payload: serde_json::Value,
}

fn record_from_row(row: &SqliteRow) -> Result<JobRecord, sqlx::Error> {
    let id: String = row.try_get("id")?;
    let job_type: String = row.try_get("type")?;
    let status: String = row.try_get("status")?;
    let result: Option<Json<serde_json::Value>> = row.try_get("result")?;

    Ok(JobRecord {
        id: JobId::from(id),
        job_type,
        status: status.parse::<JobStatus>().map_err(decode_err)?,
        result: result.map(|json| json.0),
        created: row.try_get("created")?,
        updated: row.try_get("updated")?,
        cancelled: row.try_get("cancelled")?,
    })
}

/// Insert a new job in `queued` state. SQLite assigns the next `seq`.
pub async fn insert_job(
    pool: &SqlitePool,
    id: &JobId,
    job_type: JobType,
    payload: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<JobRecord, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO jobs (id, type, payload, status, result, created, updated, cancelled)
        VALUES (?1, ?2, ?3, 'queued', NULL, ?4, ?4, 0)
        RETURNING id, type, status, result, created, updated, cancelled
        "#,
    )
    .bind(id.as_str())
    .bind(job_type.as_ref())
    .bind(Json(payload))
    .bind(now)
    .fetch_one(pool)
    .await?;

    record_from_row(&row)
}

/// Claim the oldest queued, uncancelled job in one statement.
///
/// The selection and the `running` transition happen inside a single UPDATE,
/// so two callers can never both see the same row as queued. An empty
/// `types` slice claims any type.
pub async fn claim_next(
    pool: &SqlitePool,
    types: &[JobType],
    now: DateTime<Utc>,
) -> Result<Option<ClaimedRow>, sqlx::Error> {
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("UPDATE jobs SET status = 'running', updated = ");
    qb.push_bind(now);
    qb.push(
        " WHERE seq = (SELECT seq FROM jobs WHERE status = 'queued' AND cancelled = 0",
    );
    if !types.is_empty() {
        qb.push(" AND type IN (");
        let mut separated = qb.separated(", ");
        for job_type in types {
            separated.push_bind(job_type.as_ref().to_string());
        }
        separated.push_unseparated(")");
    }
    qb.push(
        " ORDER BY seq ASC LIMIT 1) AND status = 'queued' AND cancelled = 0 \
         RETURNING id, type, payload",
    );

    let row = qb.build().fetch_optional(pool).await?;

    match row {
        Some(r) => {
            let id: String = r.try_get("id")?;
            let job_type: String = r.try_get("type")?;
            let payload: Json<serde_json::Value> = r.try_get("payload")?;
            Ok(Some(ClaimedRow {
                id: JobId::from(id),
                job_type,
                payload: payload.0,
            }))
        }
        None => Ok(None),
    }
}

/// Record the terminal outcome of a running job.
///
/// Only the first call for a claimed job matches; later calls, and calls for
/// jobs that were never claimed, update nothing and return `false`.
pub async fn set_result(
    pool: &SqlitePool,
    id: &JobId,
    outcome: Outcome,
    result: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let status = JobStatus::from(outcome);
    let done = sqlx::query(
        r#"
        UPDATE jobs
        SET status = ?1, result = ?2, updated = ?3
        WHERE id = ?4 AND status = 'running' AND result IS NULL
        "#,
    )
    .bind(status.as_ref())
    .bind(Json(result))
    .bind(now)
    .bind(id.as_str())
    .execute(pool)
    .await?;

    Ok(done.rows_affected() == 1)
}

/// Get a job by ID
pub async fn get_job(pool: &SqlitePool, id: &JobId) -> Result<Option<JobRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, type, status, result, created, updated, cancelled
        FROM jobs
        WHERE id = ?1
        "#,
    )
    .bind(id.as_str())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// Flag a job as cancelled; a still-queued job also moves to `cancelled`.
/// Returns whether the job exists.
pub async fn cancel_job(
    pool: &SqlitePool,
    id: &JobId,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let done = sqlx::query(
        r#"
        UPDATE jobs
        SET cancelled = 1,
            status = CASE WHEN status = 'queued' THEN 'cancelled' ELSE status END,
            updated = ?1
        WHERE id = ?2
        "#,
    )
    .bind(now)
    .bind(id.as_str())
    .execute(pool)
    .await?;

    Ok(done.rows_affected() > 0)
}

/// Number of jobs still eligible for a claim.
pub async fn queue_depth(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS depth FROM jobs WHERE status = 'queued' AND cancelled = 0",
    )
    .fetch_one(pool)
    .await?;

    row.try_get("depth")
}
