//! Extraction backends.
//!
//! A backend is the external multimodal model service. It holds uploaded
//! documents, produces structured prescriptions from them, embeds
//! prescriptions for similarity search and grades parser output.

mod gemini;
mod openai;
pub mod prompts;
pub mod schema;

pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::info;

use crate::config::ParserConfig;
use crate::error::{BackendError, ServiceResult};
use crate::models::{ParserResultScore, Prescription, SamplePrescription};

/// Length of every embedding vector stored or compared
pub const EMBEDDING_DIMENSIONS: usize = 1536;

pub type BackendResult<T> = Result<T, BackendError>;

/// Available backend implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BackendKind {
    #[serde(alias = "open_ai")]
    OpenAi,
    Gemini,
}

/// Capabilities the extraction pipeline needs from a model service.
///
/// Locators are opaque strings owned by the backend that produced them.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Backend name for logs and health output
    fn name(&self) -> &'static str;

    /// Upload a document and return its locator
    async fn upload(&self, file_name: &str, content_type: &str, bytes: Bytes)
    -> BackendResult<String>;

    /// Delete a previously uploaded document
    async fn delete(&self, locator: &str) -> BackendResult<()>;

    /// Extract a prescription from an uploaded document
    async fn extract_first_pass(
        &self,
        locator: &str,
        content_type: &str,
    ) -> BackendResult<Prescription>;

    /// Re-extract with validated exemplars and the first result as context
    async fn extract_second_pass(
        &self,
        locator: &str,
        content_type: &str,
        exemplars: &[SamplePrescription],
        prior: &Prescription,
    ) -> BackendResult<Prescription>;

    /// Embed a prescription's JSON form
    async fn embed(&self, document: &Prescription) -> BackendResult<Vec<f32>>;

    /// Grade `output_json` against `expected_json`
    async fn score(&self, expected_json: &str, output_json: &str)
    -> BackendResult<ParserResultScore>;
}

/// Build the configured backend
pub fn build_backend(config: &ParserConfig) -> ServiceResult<Arc<dyn ExtractionBackend>> {
    let kind = config.resolve_backend()?;
    let backend: Arc<dyn ExtractionBackend> = match kind {
        BackendKind::OpenAi => Arc::new(OpenAiBackend::new(config)?),
        BackendKind::Gemini => Arc::new(GeminiBackend::new(config)?),
    };
    info!(backend = backend.name(), "Extraction backend initialized");
    Ok(backend)
}

/// Canonical JSON text of a prescription, as embedded and stored
pub fn document_json(document: &Prescription) -> BackendResult<String> {
    serde_json::to_string(document).map_err(|e| BackendError::InvalidResponse {
        message: format!("failed to serialize prescription: {e}"),
    })
}

/// Reject embeddings that cannot be compared with stored vectors
pub(crate) fn validate_embedding(vector: Vec<f32>) -> BackendResult<Vec<f32>> {
    if vector.len() != EMBEDDING_DIMENSIONS {
        return Err(BackendError::EmbeddingDimension {
            expected: EMBEDDING_DIMENSIONS,
            actual: vector.len(),
        });
    }
    Ok(vector)
}

/// Decode structured model output into `T`
pub(crate) fn decode_structured<T: serde::de::DeserializeOwned>(text: &str) -> BackendResult<T> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(BackendError::InvalidResponse {
            message: "model returned no output".to_string(),
        });
    }
    serde_json::from_str(trimmed).map_err(|e| BackendError::InvalidResponse {
        message: format!("output does not match schema: {e}"),
    })
}

/// Turn a non-success HTTP response into an API error
pub(crate) async fn ensure_success(response: reqwest::Response) -> BackendResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(&body).unwrap_or_else(|| {
        let mut text = body.trim().to_string();
        text.truncate(char_boundary_at(&text, MAX_ERROR_BODY_CHARS));
        if text.is_empty() {
            status.canonical_reason().unwrap_or("unknown error").to_string()
        } else {
            text
        }
    });

    Err(BackendError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Longest raw error body kept in an API error message
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Byte offset just past the first `max_chars` characters of `text`
fn char_boundary_at(text: &str, max_chars: usize) -> usize {
    text.char_indices().nth(max_chars).map_or(text.len(), |(i, _)| i)
}

/// Both providers wrap errors as `{"error": {"message": ...}}`
fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}
