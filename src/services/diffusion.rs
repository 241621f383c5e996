use image::{ImageFormat, Rgb, RgbImage};
use serde::Deserialize;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::job::{ClaimedJob, JobType};
use crate::services::process::{self, OfflineEnv};
use crate::services::storage::{LocalStorage, StorageError};
use crate::services::worker::{HandlerError, JobHandler};

const DEFAULT_FRAMES: u32 = 8;
const MAX_FRAMES: u32 = 240;
const PLACEHOLDER_SIZE: u32 = 64;
const SCRIPT_TIMEOUT: Duration = Duration::from_secs(1800);

/// Settings for the diffusers pipeline script.
#[derive(Debug, Clone)]
pub struct DiffusionConfig {
    pub model_dir: PathBuf,
    pub script: Option<PathBuf>,
    pub python: PathBuf,
    pub steps: u32,
    pub seed: u64,
    pub env: OfflineEnv,
}

#[derive(Debug, Default, Deserialize)]
struct MediaParams {
    steps: Option<u32>,
    seed: Option<u64>,
    num_frames: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MediaPayload {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    params: MediaParams,
}

/// Handles image and video-frame synthesis.
///
/// Images go through the diffusers script when it and the SDXL weights are
/// present. Otherwise, and for video, placeholder PNG frames are written.
pub struct DiffusionHandler {
    config: DiffusionConfig,
    outputs: LocalStorage,
}

impl DiffusionHandler {
    pub fn new(config: DiffusionConfig, outputs: LocalStorage) -> Self {
        Self { config, outputs }
    }

    fn pipeline_script(&self) -> Option<&Path> {
        self.config
            .script
            .as_deref()
            .filter(|script| script.exists() && self.config.model_dir.exists())
    }

    async fn generate_image(
        &self,
        job: &ClaimedJob,
        payload: &MediaPayload,
    ) -> Result<serde_json::Value, HandlerError> {
        let out_dir = self
            .outputs
            .ensure_dir(Path::new("image").join(job.id.as_str()))
            .await?;

        let images = match self.pipeline_script() {
            Some(script) => self.run_pipeline(script, &out_dir, payload).await?,
            None => {
                let path = out_dir.join(format!("mock_{}.png", chrono::Utc::now().timestamp()));
                self.write_placeholder(&path, 0).await?;
                vec![path]
            }
        };

        Ok(serde_json::json!({ "images": paths_to_strings(&images) }))
    }

    async fn run_pipeline(
        &self,
        script: &Path,
        out_dir: &Path,
        payload: &MediaPayload,
    ) -> Result<Vec<PathBuf>, HandlerError> {
        let out_file = out_dir.join(format!("sdxl_{}.png", chrono::Utc::now().timestamp()));
        let args = [
            script.display().to_string(),
            "--model_dir".to_string(),
            self.config.model_dir.display().to_string(),
            "--prompt".to_string(),
            payload.prompt.clone(),
            "--out".to_string(),
            out_file.display().to_string(),
            "--steps".to_string(),
            payload.params.steps.unwrap_or(self.config.steps).to_string(),
            "--seed".to_string(),
            payload.params.seed.unwrap_or(self.config.seed).to_string(),
        ];

        let output = process::run_with_timeout(
            &self.config.python,
            &args,
            &self.config.env,
            None,
            SCRIPT_TIMEOUT,
        )
        .await?;

        if !output.success() {
            return Err(HandlerError::Backend(format!(
                "diffusion pipeline exited with {:?}: {}",
                output.code,
                output.stderr.trim()
            )));
        }

        let mut produced = Vec::new();
        let mut entries = tokio::fs::read_dir(out_dir)
            .await
            .map_err(StorageError::from)?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(StorageError::from)?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "png") {
                produced.push(path);
            }
        }
        produced.sort();
        Ok(produced)
    }

    async fn generate_video(
        &self,
        job: &ClaimedJob,
        payload: &MediaPayload,
    ) -> Result<serde_json::Value, HandlerError> {
        let video_dir = self
            .outputs
            .ensure_dir(Path::new("video").join(job.id.as_str()))
            .await?;
        let frames_dir = video_dir.join("frames");
        let num_frames = payload
            .params
            .num_frames
            .unwrap_or(DEFAULT_FRAMES)
            .clamp(1, MAX_FRAMES);

        let mut frames = Vec::with_capacity(num_frames as usize);
        for i in 0..num_frames {
            let path = frames_dir.join(format!("frame_{:04}.png", i));
            self.write_placeholder(&path, i).await?;
            frames.push(path);
        }

        let mp4 = self
            .outputs
            .root()
            .join("video")
            .join(format!("{}.mp4", job.id));
        let ffmpeg_cmd = format!(
            "ffmpeg -framerate 8 -i {}/frame_%04d.png -c:v libx264 -pix_fmt yuv420p {}",
            frames_dir.display(),
            mp4.display()
        );

        Ok(serde_json::json!({
            "frames": paths_to_strings(&frames),
            "ffmpeg_example": ffmpeg_cmd,
        }))
    }

    async fn write_placeholder(&self, path: &Path, index: u32) -> Result<(), HandlerError> {
        let bytes = placeholder_png(index)?;
        self.outputs.write_atomic(path, &bytes).await?;
        Ok(())
    }
}

impl JobHandler for DiffusionHandler {
    fn name(&self) -> &str {
        "diffusion"
    }

    fn job_types(&self) -> &[JobType] {
        &[JobType::GenerateImage, JobType::GenerateVideo]
    }

    async fn handle(&self, job: &ClaimedJob) -> Result<serde_json::Value, HandlerError> {
        let payload: MediaPayload = serde_json::from_value(job.payload.clone())?;

        match job.job_type {
            JobType::GenerateImage => self.generate_image(job, &payload).await,
            JobType::GenerateVideo => self.generate_video(job, &payload).await,
            other => Err(HandlerError::InvalidType {
                worker: self.name().to_string(),
                job_type: other,
            }),
        }
    }
}

/// Small grey gradient frame; shade varies with `index` so frames differ.
fn placeholder_png(index: u32) -> Result<Vec<u8>, HandlerError> {
    let shade = (64 + (index * 16) % 160) as u8;
    let img = RgbImage::from_fn(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, |x, _| {
        Rgb([shade, shade, shade.saturating_add((x % 32) as u8)])
    });
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| HandlerError::Backend(format!("placeholder encoding failed: {e}")))?;
    Ok(buf.into_inner())
}

fn paths_to_strings(paths: &[PathBuf]) -> Vec<String> {
    paths.iter().map(|p| p.display().to_string()).collect()
}
