use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::job::{JobId, JobRecord, JobType};
use crate::models::requests::{
    CancelResponse, EnqueuedResponse, GenerateMediaRequest, GenerateTextRequest,
};
use crate::routes::ApiError;

/// POST /generate_text — `draft` answers inline, `heavy` is queued.
pub async fn generate_text(
    State(state): State<AppState>,
    body: Result<Json<GenerateTextRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = body?;
    req.validate()?;

    match req.mode.as_str() {
        "draft" => {
            let draft = state
                .draft
                .generate_or_placeholder(&req.prompt, req.max_tokens)
                .await;
            Ok(Json(draft).into_response())
        }
        "heavy" => {
            let job_id = state
                .store
                .enqueue(
                    JobType::GenerateTextHeavy,
                    serde_json::json!({ "prompt": req.prompt, "max_tokens": req.max_tokens }),
                )
                .await?;
            Ok(Json(EnqueuedResponse { job_id }).into_response())
        }
        _ => Err(ApiError::InvalidMode),
    }
}

/// POST /generate_image — queue an image synthesis job.
pub async fn generate_image(
    State(state): State<AppState>,
    body: Result<Json<GenerateMediaRequest>, JsonRejection>,
) -> Result<Json<EnqueuedResponse>, ApiError> {
    let Json(req) = body?;
    enqueue_media(&state, JobType::GenerateImage, req).await
}

/// POST /generate_video — queue a video-frame synthesis job.
pub async fn generate_video(
    State(state): State<AppState>,
    body: Result<Json<GenerateMediaRequest>, JsonRejection>,
) -> Result<Json<EnqueuedResponse>, ApiError> {
    let Json(req) = body?;
    enqueue_media(&state, JobType::GenerateVideo, req).await
}

async fn enqueue_media(
    state: &AppState,
    job_type: JobType,
    req: GenerateMediaRequest,
) -> Result<Json<EnqueuedResponse>, ApiError> {
    req.validate()?;
    let job_id = state
        .store
        .enqueue(
            job_type,
            serde_json::json!({ "prompt": req.prompt, "params": req.params }),
        )
        .await?;
    Ok(Json(EnqueuedResponse { job_id }))
}

/// GET /job_status/{job_id}
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    state
        .store
        .get_status(&JobId::from(job_id))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

/// POST /cancel_job/{job_id} — only prevents jobs that have not started.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let ok = state.store.cancel(&JobId::from(job_id)).await?;
    Ok(Json(CancelResponse { ok }))
}
