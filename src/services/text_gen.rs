use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::job::{ClaimedJob, JobType};
use crate::services::process::{self, OfflineEnv};
use crate::services::storage::LocalStorage;
use crate::services::worker::{HandlerError, JobHandler};

/// Settings for the llama.cpp command-line runner.
#[derive(Debug, Clone)]
pub struct TextGenConfig {
    pub llama_cli: PathBuf,
    pub model: PathBuf,
    pub ngl: u32,
    pub ctx: u32,
    pub threads: u32,
    pub env: OfflineEnv,
}

#[derive(Debug, Deserialize)]
struct TextPayload {
    #[serde(default)]
    prompt: String,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    /// Seconds the CLI may run for this job.
    #[serde(default = "default_timeout_secs")]
    timeout: u64,
}

fn default_max_tokens() -> u32 {
    256
}

fn default_timeout_secs() -> u64 {
    600
}

/// First `max_chars` characters of `text`, cut on a char boundary.
pub fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Handles `generate_text_heavy` with the large local model.
///
/// Runs the llama.cpp CLI when both binary and model are installed; any CLI
/// failure falls back to placeholder text so the job still completes.
pub struct HeavyTextHandler {
    config: TextGenConfig,
    outputs: LocalStorage,
}

impl HeavyTextHandler {
    pub fn new(config: TextGenConfig, outputs: LocalStorage) -> Self {
        Self { config, outputs }
    }

    fn backend_installed(&self) -> bool {
        self.config.llama_cli.exists() && self.config.model.exists()
    }

    async fn run_cli(&self, payload: &TextPayload) -> Option<String> {
        let args = [
            "-m".to_string(),
            self.config.model.display().to_string(),
            "-p".to_string(),
            payload.prompt.clone(),
            "-n".to_string(),
            payload.max_tokens.to_string(),
            "-ngl".to_string(),
            self.config.ngl.to_string(),
            "-c".to_string(),
            self.config.ctx.to_string(),
            "-t".to_string(),
            self.config.threads.to_string(),
        ];

        let output = process::run_with_timeout(
            &self.config.llama_cli,
            &args,
            &self.config.env,
            None,
            Duration::from_secs(payload.timeout),
        )
        .await;

        match output {
            Ok(out) if out.success() => {
                tracing::info!(code = ?out.code, "llama.cpp exited");
                Some(out.stdout.trim().to_string())
            }
            Ok(out) => {
                tracing::warn!(code = ?out.code, stderr = %out.stderr, "llama.cpp failed, using mock output");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "llama.cpp failed, using mock output");
                None
            }
        }
    }
}

impl JobHandler for HeavyTextHandler {
    fn name(&self) -> &str {
        "text_heavy"
    }

    fn job_types(&self) -> &[JobType] {
        &[JobType::GenerateTextHeavy]
    }

    async fn handle(&self, job: &ClaimedJob) -> Result<serde_json::Value, HandlerError> {
        let payload: TextPayload = serde_json::from_value(job.payload.clone())?;

        let cli_text = if self.backend_installed() {
            self.run_cli(&payload).await
        } else {
            None
        };
        let text = cli_text
            .unwrap_or_else(|| format!("[MOCK 67B] {}...", preview(&payload.prompt, 64)));

        let result = serde_json::json!({ "text": text });

        let out_dir = self.outputs.ensure_dir("text").await?;
        self.outputs
            .write_json(
                &out_dir.join(format!("{}.json", job.id)),
                &serde_json::json!({ "job_id": job.id, "result": result }),
            )
            .await?;

        Ok(result)
    }
}
