use axum::extract::{Multipart, State};
use axum::Json;

use crate::app_state::AppState;
use crate::models::requests::ImageAnalysis;
use crate::routes::ApiError;

/// POST /analyze_image — Upload an image and describe it synchronously.
pub async fn analyze_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ImageAnalysis>, ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;

            // Validate image format using the `image` crate
            image::guess_format(&data).map_err(|_| ApiError::UnsupportedMedia)?;

            upload = Some((file_name, data.to_vec()));
        }
    }

    let (file_name, data) =
        upload.ok_or_else(|| ApiError::BadRequest("missing multipart field `file`".to_string()))?;

    let path = state.uploads.save_upload(&file_name, &data).await?;
    tracing::info!(path = %path.display(), bytes = data.len(), "Image uploaded for analysis");

    let analysis = state.vision.analyze(&path).await?;
    Ok(Json(analysis))
}
