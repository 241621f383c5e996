use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::JobId;

fn default_mode() -> String {
    "draft".to_string()
}

fn default_max_tokens() -> u32 {
    256
}

/// Request to generate text. `draft` answers synchronously, `heavy` is queued.
#[derive(Debug, Deserialize, Validate)]
pub struct GenerateTextRequest {
    #[garde(length(chars, min = 1, max = 8000))]
    pub prompt: String,

    #[serde(default = "default_mode")]
    #[garde(skip)]
    pub mode: String,

    #[serde(default = "default_max_tokens")]
    #[garde(range(min = 1, max = 8192))]
    pub max_tokens: u32,
}

/// Request to generate an image or a video clip.
#[derive(Debug, Deserialize, Validate)]
pub struct GenerateMediaRequest {
    #[garde(length(chars, min = 1, max = 8000))]
    pub prompt: String,

    #[serde(default)]
    #[garde(skip)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// Response after a job has been queued.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueuedResponse {
    pub job_id: JobId,
}

/// Response from the synchronous draft text path.
#[derive(Debug, Serialize, Deserialize)]
pub struct DraftResponse {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Response for a cancel request.
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub ok: bool,
}

/// Result of analyzing an uploaded image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageAnalysis {
    pub caption: String,
    pub objects: Vec<String>,
    pub ocr_text: String,
}
