//! Service configuration.
//!
//! Settings are read once at startup from an optional `config` file and
//! `RXPARSER__*` environment variables. Every field has a default so an
//! empty environment still yields a runnable configuration (apart from the
//! backend API key).

mod loader;

pub use loader::load_config;

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::backend::BackendKind;
use crate::error::{BackendError, ServiceResult};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub parser: ParserConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    /// Path of the SQLite file holding validated samples
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("samples.db")
    }
}

/// Extraction backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ParserConfig {
    /// Explicit backend choice. When unset the backend is picked from
    /// whichever API key is present, OpenAI first.
    #[serde(default)]
    pub backend: Option<BackendKind>,

    #[serde(default)]
    pub openai_api_key: Option<String>,

    #[serde(default)]
    pub gemini_api_key: Option<String>,

    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,

    /// Overrides the backend's default extraction model
    #[serde(default)]
    pub extraction_model: Option<String>,

    /// Overrides the backend's default embedding model
    #[serde(default)]
    pub embedding_model: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            backend: None,
            openai_api_key: None,
            gemini_api_key: None,
            openai_base_url: default_openai_base_url(),
            gemini_base_url: default_gemini_base_url(),
            extraction_model: None,
            embedding_model: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

impl ParserConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Decide which backend to build.
    ///
    /// An explicit choice must have its key configured; otherwise the first
    /// backend with a key wins.
    pub fn resolve_backend(&self) -> ServiceResult<BackendKind> {
        let has_key = |key: &Option<String>| key.as_deref().is_some_and(|k| !k.trim().is_empty());

        match self.backend {
            Some(BackendKind::OpenAi) if has_key(&self.openai_api_key) => Ok(BackendKind::OpenAi),
            Some(BackendKind::Gemini) if has_key(&self.gemini_api_key) => Ok(BackendKind::Gemini),
            Some(kind) => Err(BackendError::NotConfigured {
                message: format!("no API key configured for the {kind} backend"),
            }
            .into()),
            None if has_key(&self.openai_api_key) => Ok(BackendKind::OpenAi),
            None if has_key(&self.gemini_api_key) => Ok(BackendKind::Gemini),
            None => Err(BackendError::NotConfigured {
                message: "set an OpenAI or Gemini API key".to_string(),
            }
            .into()),
        }
    }
}

/// Pipeline tuning
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    /// Number of nearest exemplars fed to the refinement pass
    #[serde(default = "default_sample_count")]
    pub sample_count: usize,

    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            sample_count: default_sample_count(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

/// Job registry retention
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl JobsConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Request size limits
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_size_bytes: default_max_upload_size(),
        }
    }
}

/// Evaluation harness settings
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            deadline_secs: default_deadline_secs(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl EvaluationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

// Default value functions

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_max_output_tokens() -> u32 {
    10240
}

fn default_sample_count() -> usize {
    3
}

fn default_max_concurrent_jobs() -> usize {
    8
}

fn default_retention_secs() -> u64 {
    15 * 60
}

fn default_sweep_interval_secs() -> u64 {
    5 * 60
}

fn default_max_upload_size() -> u64 {
    10 * 1024 * 1024
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_deadline_secs() -> u64 {
    120
}

fn default_max_iterations() -> usize {
    20
}
