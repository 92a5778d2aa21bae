//! Gemini backend: resumable media upload, `generateContent` with a
//! response schema, and `embedContent`.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::prompts::{PARSE_PROMPT, REVIEW_PROMPT, SYSTEM_PROMPT, scoring_request};
use super::schema::gemini_schema;
use super::{
    BackendResult, EMBEDDING_DIMENSIONS, ExtractionBackend, decode_structured, document_json,
    ensure_success, validate_embedding,
};
use crate::config::ParserConfig;
use crate::error::{BackendError, ServiceResult};
use crate::models::{ParserResultScore, Prescription, SamplePrescription};

const DEFAULT_EXTRACTION_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_EMBEDDING_MODEL: &str = "gemini-embedding-001";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini API client
pub struct GeminiBackend {
    client: Client,
    base_url: String,
    api_key: String,
    extraction_model: String,
    embedding_model: String,
    max_output_tokens: u32,
}

impl GeminiBackend {
    pub fn new(config: &ParserConfig) -> ServiceResult<Self> {
        let api_key = config
            .gemini_api_key
            .clone()
            .ok_or_else(|| BackendError::NotConfigured {
                message: "Gemini API key is missing".to_string(),
            })?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BackendError::Connection {
                url: config.gemini_base_url.clone(),
                source: e,
            })?;

        Ok(Self {
            client,
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            api_key,
            extraction_model: config
                .extraction_model
                .clone()
                .unwrap_or_else(|| DEFAULT_EXTRACTION_MODEL.to_string()),
            embedding_model: config
                .embedding_model
                .clone()
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            max_output_tokens: config.max_output_tokens,
        })
    }

    async fn generate<T: JsonSchema + DeserializeOwned>(
        &self,
        system_instruction: Option<&str>,
        contents: Vec<Content>,
    ) -> BackendResult<T> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.extraction_model
        );
        let request = GenerateRequest {
            system_instruction: system_instruction.map(|text| Content {
                role: None,
                parts: vec![ContentPart::text(text)],
            }),
            contents,
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: gemini_schema::<T>(),
                max_output_tokens: self.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::Connection {
                url: url.clone(),
                source: e,
            })?;

        let body: GenerateResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse {
                message: e.to_string(),
            })?;

        decode_structured(&body.text()?)
    }
}

#[async_trait]
impl ExtractionBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn upload(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> BackendResult<String> {
        let start_url = format!("{}/upload/v1beta/files", self.base_url);
        let start = self
            .client
            .post(&start_url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len())
            .header("X-Goog-Upload-Header-Content-Type", content_type)
            .json(&serde_json::json!({ "file": { "display_name": file_name } }))
            .send()
            .await
            .map_err(|e| BackendError::Connection {
                url: start_url.clone(),
                source: e,
            })?;

        let start = ensure_success(start).await?;
        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| BackendError::InvalidResponse {
                message: "upload session URL missing".to_string(),
            })?;

        let response = self
            .client
            .post(&upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await
            .map_err(|e| BackendError::Connection {
                url: upload_url.clone(),
                source: e,
            })?;

        let uploaded: UploadResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse {
                message: e.to_string(),
            })?;

        debug!(file_uri = %uploaded.file.uri, file_name, "File uploaded");
        Ok(uploaded.file.uri)
    }

    async fn delete(&self, locator: &str) -> BackendResult<()> {
        let name = resource_name(locator).ok_or_else(|| BackendError::InvalidResponse {
            message: format!("not a Gemini file URI: {locator}"),
        })?;
        let url = format!("{}/v1beta/{}", self.base_url, name);

        let response = self
            .client
            .delete(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| BackendError::Connection {
                url: url.clone(),
                source: e,
            })?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn extract_first_pass(
        &self,
        locator: &str,
        content_type: &str,
    ) -> BackendResult<Prescription> {
        let contents = vec![Content::user(vec![
            ContentPart::file(locator, content_type),
            ContentPart::text(PARSE_PROMPT),
        ])];
        self.generate(Some(SYSTEM_PROMPT), contents).await
    }

    async fn extract_second_pass(
        &self,
        locator: &str,
        content_type: &str,
        exemplars: &[SamplePrescription],
        prior: &Prescription,
    ) -> BackendResult<Prescription> {
        let prior_json = document_json(prior)?;
        let contents = second_pass_contents(locator, content_type, exemplars, prior_json);
        self.generate(Some(SYSTEM_PROMPT), contents).await
    }

    async fn embed(&self, document: &Prescription) -> BackendResult<Vec<f32>> {
        let url = format!(
            "{}/v1beta/models/{}:embedContent",
            self.base_url, self.embedding_model
        );
        let request = EmbedRequest {
            model: format!("models/{}", self.embedding_model),
            content: Content {
                role: None,
                parts: vec![ContentPart::text(&document_json(document)?)],
            },
            task_type: "SEMANTIC_SIMILARITY",
            output_dimensionality: EMBEDDING_DIMENSIONS,
        };

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::Connection {
                url: url.clone(),
                source: e,
            })?;

        let body: EmbedResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse {
                message: e.to_string(),
            })?;

        validate_embedding(body.embedding.values)
    }

    async fn score(
        &self,
        expected_json: &str,
        output_json: &str,
    ) -> BackendResult<ParserResultScore> {
        let contents = vec![Content::user(vec![ContentPart::text(&scoring_request(
            expected_json,
            output_json,
        ))])];
        self.generate(None, contents).await
    }
}

/// `files/{id}` resource name from a file URI
fn resource_name(uri: &str) -> Option<&str> {
    let start = uri.rfind("files/")?;
    let name = &uri[start..];
    (name.len() > "files/".len()).then_some(name)
}

fn second_pass_contents(
    locator: &str,
    content_type: &str,
    exemplars: &[SamplePrescription],
    prior_json: String,
) -> Vec<Content> {
    let mut contents = Vec::with_capacity(exemplars.len() * 2 + 3);

    for sample in exemplars {
        contents.push(Content::user(vec![
            ContentPart::file(&sample.file_id, &sample.mime_type),
            ContentPart::text(PARSE_PROMPT),
        ]));
        contents.push(Content::model(&sample.content));
    }

    contents.push(Content::user(vec![
        ContentPart::file(locator, content_type),
        ContentPart::text(PARSE_PROMPT),
    ]));
    contents.push(Content::model(&prior_json));
    contents.push(Content::user(vec![ContentPart::text(REVIEW_PROMPT)]));

    contents
}

// === Request types ===

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: serde_json::Value,
    max_output_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<ContentPart>,
}

impl Content {
    fn user(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Some("user"),
            parts,
        }
    }

    fn model(text: &str) -> Self {
        Self {
            role: Some("model"),
            parts: vec![ContentPart::text(text)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_data: Option<FileData>,
}

impl ContentPart {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            file_data: None,
        }
    }

    fn file(uri: &str, mime_type: &str) -> Self {
        Self {
            text: None,
            file_data: Some(FileData {
                mime_type: mime_type.to_string(),
                file_uri: uri.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest {
    model: String,
    content: Content,
    task_type: &'static str,
    output_dimensionality: usize,
}

// === Response types ===

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GenerateResponse {
    /// Text of the first candidate
    fn text(&self) -> BackendResult<String> {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Err(BackendError::InvalidResponse {
                message: format!("prompt blocked: {reason}"),
            });
        }

        let candidate = self
            .candidates
            .first()
            .ok_or_else(|| BackendError::InvalidResponse {
                message: "no candidates returned".to_string(),
            })?;

        if candidate.finish_reason.as_deref() == Some("MAX_TOKENS") {
            return Err(BackendError::InvalidResponse {
                message: "response truncated at the output token limit".to_string(),
            });
        }

        Ok(candidate
            .content
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_name() {
        assert_eq!(
            resource_name("https://generativelanguage.googleapis.com/v1beta/files/abc123"),
            Some("files/abc123")
        );
        assert_eq!(resource_name("files/xyz"), Some("files/xyz"));
        assert_eq!(resource_name("https://example.com/files/"), None);
        assert_eq!(resource_name("file-abc"), None);
    }

    #[test]
    fn test_second_pass_contents_alternate_roles() {
        let exemplars = vec![SamplePrescription::new(
            "https://g/v1beta/files/sample",
            "application/pdf",
            "{\"x\":1}".to_string(),
        )];
        let contents =
            second_pass_contents("https://g/v1beta/files/doc", "application/pdf", &exemplars, "{}".to_string());

        let roles: Vec<_> = contents.iter().map(|c| c.role.unwrap()).collect();
        assert_eq!(roles, vec!["user", "model", "user", "model", "user"]);
        assert_eq!(
            contents[0].parts[0],
            ContentPart::file("https://g/v1beta/files/sample", "application/pdf")
        );
        assert_eq!(contents[4].parts, vec![ContentPart::text(REVIEW_PROMPT)]);
    }

    #[test]
    fn test_request_wire_format() {
        let request = GenerateRequest {
            system_instruction: Some(Content {
                role: None,
                parts: vec![ContentPart::text("sys")],
            }),
            contents: vec![Content::user(vec![ContentPart::file("uri", "application/pdf")])],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: serde_json::json!({"type": "OBJECT"}),
                max_output_tokens: 10,
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "sys");
        assert!(value["systemInstruction"].get("role").is_none());
        assert_eq!(value["contents"][0]["parts"][0]["fileData"]["fileUri"], "uri");
        assert_eq!(
            value["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[test]
    fn test_response_text() {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "{\"a\""}, {"text": ":1}"}]}, "finishReason": "STOP"}]
        }))
        .unwrap();
        assert_eq!(response.text().unwrap(), "{\"a\":1}");

        let blocked: GenerateResponse = serde_json::from_value(serde_json::json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        assert!(blocked.text().is_err());

        let truncated: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "{"}]}, "finishReason": "MAX_TOKENS"}]
        }))
        .unwrap();
        assert!(truncated.text().is_err());
    }

    use axum::{
        Json, Router,
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::{delete, post},
    };
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeGemini {
        base_url: String,
        uploaded_bytes: Mutex<Vec<u8>>,
        upload_name: Mutex<Option<String>>,
        deleted: Mutex<Vec<String>>,
        embed_requests: Mutex<Vec<serde_json::Value>>,
    }

    async fn fake_upload_start(
        State(api): State<Arc<FakeGemini>>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> impl IntoResponse {
        assert_eq!(headers[API_KEY_HEADER], "g-test");
        assert_eq!(headers["x-goog-upload-protocol"], "resumable");
        assert_eq!(headers["x-goog-upload-command"], "start");
        assert_eq!(headers["x-goog-upload-header-content-type"], "application/pdf");
        assert_eq!(headers["x-goog-upload-header-content-length"], "8");
        *api.upload_name.lock().unwrap() = body["file"]["display_name"].as_str().map(str::to_string);

        let session = format!("{}/upload-session/1", api.base_url);
        (StatusCode::OK, [("x-goog-upload-url", session)])
    }

    async fn fake_upload_finalize(
        State(api): State<Arc<FakeGemini>>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Json<serde_json::Value> {
        assert_eq!(headers["x-goog-upload-command"], "upload, finalize");
        assert_eq!(headers["x-goog-upload-offset"], "0");
        *api.uploaded_bytes.lock().unwrap() = body.to_vec();
        Json(serde_json::json!({
            "file": {
                "name": "files/abc123",
                "uri": format!("{}/v1beta/files/abc123", api.base_url)
            }
        }))
    }

    async fn fake_delete(State(api): State<Arc<FakeGemini>>, Path(id): Path<String>) -> Json<serde_json::Value> {
        api.deleted.lock().unwrap().push(id);
        Json(serde_json::json!({}))
    }

    async fn fake_model_call(
        State(api): State<Arc<FakeGemini>>,
        Path(call): Path<String>,
        Json(body): Json<serde_json::Value>,
    ) -> Json<serde_json::Value> {
        if call.ends_with(":embedContent") {
            let dims = body["outputDimensionality"].as_u64().unwrap() as usize;
            api.embed_requests.lock().unwrap().push(body);
            return Json(serde_json::json!({"embedding": {"values": vec![0.25_f32; dims]}}));
        }

        assert_eq!(call, "gemini-2.5-flash:generateContent");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseSchema"]["type"], "OBJECT");
        let text = if body.get("systemInstruction").is_some() {
            "{\"date_written\":\"2024-03-04\"}"
        } else {
            "{\"field_scores\":[],\"total_awarded_points\":2.0,\"total_possible_points\":4.0,\"overall_score_percentage\":50.0,\"summary_critique\":\"half\"}"
        };
        Json(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": text}]}, "finishReason": "STOP"}]
        }))
    }

    async fn spawn_fake_gemini() -> (String, Arc<FakeGemini>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let api = Arc::new(FakeGemini {
            base_url: base_url.clone(),
            ..Default::default()
        });

        let app = Router::new()
            .route("/upload/v1beta/files", post(fake_upload_start))
            .route("/upload-session/{session}", post(fake_upload_finalize))
            .route("/v1beta/files/{id}", delete(fake_delete))
            .route("/v1beta/models/{call}", post(fake_model_call))
            .with_state(api.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (base_url, api)
    }

    fn backend_for(base_url: String) -> GeminiBackend {
        GeminiBackend::new(&ParserConfig {
            gemini_api_key: Some("g-test".to_string()),
            gemini_base_url: base_url,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_against_fake_api() {
        let (base_url, api) = spawn_fake_gemini().await;
        let backend = backend_for(base_url.clone());

        let locator = backend
            .upload("rx.pdf", "application/pdf", Bytes::from_static(b"%PDF-1.4"))
            .await
            .unwrap();
        assert_eq!(locator, format!("{base_url}/v1beta/files/abc123"));
        assert_eq!(api.uploaded_bytes.lock().unwrap().as_slice(), b"%PDF-1.4");
        assert_eq!(api.upload_name.lock().unwrap().as_deref(), Some("rx.pdf"));

        let rx = backend
            .extract_first_pass(&locator, "application/pdf")
            .await
            .unwrap();
        assert_eq!(rx.date_written, "2024-03-04");

        let embedding = backend.embed(&rx).await.unwrap();
        assert_eq!(embedding.len(), EMBEDDING_DIMENSIONS);
        let embed_request = api.embed_requests.lock().unwrap()[0].clone();
        assert_eq!(embed_request["taskType"], "SEMANTIC_SIMILARITY");
        assert_eq!(embed_request["model"], "models/gemini-embedding-001");

        let score = backend.score("{}", "{}").await.unwrap();
        assert_eq!(score.summary_critique, "half");
        assert_eq!(score.overall_score_percentage, 50.0);

        backend.delete(&locator).await.unwrap();
        assert_eq!(*api.deleted.lock().unwrap(), vec!["abc123".to_string()]);
    }

    #[tokio::test]
    async fn test_upload_without_session_url_is_invalid_response() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let app = Router::new().route("/upload/v1beta/files", post(|| async { StatusCode::OK }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let err = backend_for(base_url)
            .upload("rx.pdf", "application/pdf", Bytes::from_static(b"%PDF-1.4"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_delete_rejects_foreign_locator() {
        let backend = backend_for("http://127.0.0.1:9".to_string());
        let err = backend.delete("file-abc").await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse { .. }));
    }
}
