use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::services::diffusion::DiffusionConfig;
use crate::services::draft::DraftConfig;
use crate::services::process::OfflineEnv;
use crate::services::text_gen::TextGenConfig;
use crate::services::worker::{ClaimMode, WorkerConfig};

/// Which handler a worker process runs.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    #[default]
    TextHeavy,
    Diffusion,
}

/// Process configuration, read once at startup and passed to constructors.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Gateway bind address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// SQLite connection string for the job store.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Root for `outputs/` and `uploads/`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Local draft text service endpoint (loopback only).
    #[serde(default = "default_draft_url")]
    pub draft_service_url: String,

    #[serde(default = "default_draft_timeout_secs")]
    pub draft_timeout_secs: u64,

    #[serde(default)]
    pub worker_kind: WorkerKind,

    #[serde(default)]
    pub claim_mode: ClaimMode,

    /// Idle wait between claims when no local enqueue wakes the worker.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Worker-side Prometheus listener; workers export nothing when unset.
    pub worker_metrics_addr: Option<SocketAddr>,

    /// Upper bound on a single handler invocation.
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,

    #[serde(default = "default_llama_cli")]
    pub llama_cli: PathBuf,

    #[serde(default = "default_text_model")]
    pub text_model: PathBuf,

    #[serde(default = "default_text_ngl")]
    pub text_ngl: u32,

    #[serde(default = "default_text_ctx")]
    pub text_ctx: u32,

    #[serde(default = "default_text_threads")]
    pub text_threads: u32,

    #[serde(default = "default_sdxl_model_dir")]
    pub sdxl_model_dir: PathBuf,

    /// Optional diffusers script; without it image jobs produce placeholders.
    pub diffusion_script: Option<PathBuf>,

    #[serde(default = "default_python")]
    pub python_bin: PathBuf,

    #[serde(default = "default_llava_dir")]
    pub llava_dir: PathBuf,

    /// Cache directory handed to child processes as HF_HOME.
    pub hf_home: Option<PathBuf>,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_database_url() -> String {
    "sqlite://job_queue.sqlite3".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_draft_url() -> String {
    "http://127.0.0.1:8001/gen".to_string()
}

fn default_draft_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_handler_timeout_secs() -> u64 {
    600
}

fn default_llama_cli() -> PathBuf {
    PathBuf::from("llama.cpp/bin/main")
}

fn default_text_model() -> PathBuf {
    PathBuf::from("models/deepseek-67b.gguf")
}

fn default_text_ngl() -> u32 {
    35
}

fn default_text_ctx() -> u32 {
    4096
}

fn default_text_threads() -> u32 {
    8
}

fn default_sdxl_model_dir() -> PathBuf {
    PathBuf::from("models/sdxl")
}

fn default_python() -> PathBuf {
    PathBuf::from("python3")
}

fn default_llava_dir() -> PathBuf {
    PathBuf::from("models/llava")
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.data_dir.join("outputs")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    /// Environment applied to every spawned backend process.
    pub fn offline_env(&self) -> OfflineEnv {
        let hf_home = self
            .hf_home
            .clone()
            .unwrap_or_else(|| self.data_dir.join(".hf_home"));
        OfflineEnv::new(&hf_home)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            handler_timeout: Duration::from_secs(self.handler_timeout_secs),
            claim_mode: self.claim_mode,
        }
    }

    pub fn draft_config(&self) -> DraftConfig {
        DraftConfig {
            url: self.draft_service_url.clone(),
            timeout: Duration::from_secs(self.draft_timeout_secs),
        }
    }

    pub fn text_gen_config(&self) -> TextGenConfig {
        TextGenConfig {
            llama_cli: self.resolve(&self.llama_cli),
            model: self.resolve(&self.text_model),
            ngl: self.text_ngl,
            ctx: self.text_ctx,
            threads: self.text_threads,
            env: self.offline_env(),
        }
    }

    pub fn diffusion_config(&self) -> DiffusionConfig {
        DiffusionConfig {
            model_dir: self.resolve(&self.sdxl_model_dir),
            script: self.diffusion_script.as_deref().map(|p| self.resolve(p)),
            python: self.python_bin.clone(),
            steps: 20,
            seed: 42,
            env: self.offline_env(),
        }
    }

    pub fn llava_dir(&self) -> PathBuf {
        self.resolve(&self.llava_dir)
    }

    /// Relative model paths are anchored at the data directory.
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }
}
