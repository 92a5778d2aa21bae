//! OpenAI backend: Files API, Responses API with strict JSON schema output,
//! and the embeddings endpoint.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::prompts::{PARSE_PROMPT, REVIEW_PROMPT, SYSTEM_PROMPT, scoring_request};
use super::schema::openai_schema;
use super::{
    BackendResult, EMBEDDING_DIMENSIONS, ExtractionBackend, decode_structured, document_json,
    ensure_success, validate_embedding,
};
use crate::config::ParserConfig;
use crate::error::{BackendError, ServiceResult};
use crate::models::{ParserResultScore, Prescription, SamplePrescription};

const DEFAULT_EXTRACTION_MODEL: &str = "gpt-4.1";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// OpenAI API client
pub struct OpenAiBackend {
    client: Client,
    base_url: String,
    api_key: String,
    extraction_model: String,
    embedding_model: String,
    max_output_tokens: u32,
}

impl OpenAiBackend {
    pub fn new(config: &ParserConfig) -> ServiceResult<Self> {
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or_else(|| BackendError::NotConfigured {
                message: "OpenAI API key is missing".to_string(),
            })?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BackendError::Connection {
                url: config.openai_base_url.clone(),
                source: e,
            })?;

        Ok(Self {
            client,
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
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

    /// Run a Responses API call constrained to the schema of `T`
    async fn structured<T: JsonSchema + DeserializeOwned>(
        &self,
        schema_name: &str,
        input: Vec<InputMessage>,
    ) -> BackendResult<T> {
        let url = format!("{}/responses", self.base_url);
        let request = ResponsesRequest {
            model: &self.extraction_model,
            input,
            text: TextOptions {
                format: TextFormat {
                    kind: "json_schema",
                    name: schema_name,
                    schema: openai_schema::<T>(),
                    strict: true,
                },
            },
            max_output_tokens: self.max_output_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::Connection {
                url: url.clone(),
                source: e,
            })?;

        let body: ResponsesResponse =
            ensure_success(response)
                .await?
                .json()
                .await
                .map_err(|e| BackendError::InvalidResponse {
                    message: e.to_string(),
                })?;

        decode_structured(&body.output_text()?)
    }
}

#[async_trait]
impl ExtractionBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn upload(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> BackendResult<String> {
        let url = format!("{}/files", self.base_url);
        let part = Part::bytes(bytes.to_vec())
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .map_err(|e| BackendError::Connection {
                url: url.clone(),
                source: e,
            })?;
        let form = Form::new().text("purpose", "user_data").part("file", part);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| BackendError::Connection {
                url: url.clone(),
                source: e,
            })?;

        let file: FileObject = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse {
                message: e.to_string(),
            })?;

        debug!(file_id = %file.id, file_name, "File uploaded");
        Ok(file.id)
    }

    async fn delete(&self, locator: &str) -> BackendResult<()> {
        let url = format!("{}/files/{}", self.base_url, locator);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_key)
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
        _content_type: &str,
    ) -> BackendResult<Prescription> {
        self.structured("Prescription", first_pass_input(locator))
            .await
    }

    async fn extract_second_pass(
        &self,
        locator: &str,
        _content_type: &str,
        exemplars: &[SamplePrescription],
        prior: &Prescription,
    ) -> BackendResult<Prescription> {
        let prior_json = document_json(prior)?;
        self.structured(
            "Prescription",
            second_pass_input(locator, exemplars, prior_json),
        )
        .await
    }

    async fn embed(&self, document: &Prescription) -> BackendResult<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: document_json(document)?,
            dimensions: EMBEDDING_DIMENSIONS,
            encoding_format: "float",
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::Connection {
                url: url.clone(),
                source: e,
            })?;

        let body: EmbeddingResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse {
                message: e.to_string(),
            })?;

        let embedding = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| BackendError::InvalidResponse {
                message: "no embedding returned".to_string(),
            })?;

        validate_embedding(embedding)
    }

    async fn score(
        &self,
        expected_json: &str,
        output_json: &str,
    ) -> BackendResult<ParserResultScore> {
        let input = vec![InputMessage::user(vec![ContentPart::InputText {
            text: scoring_request(expected_json, output_json),
        }])];
        self.structured("ParserResultScore", input).await
    }
}

fn first_pass_input(locator: &str) -> Vec<InputMessage> {
    vec![
        InputMessage::system(SYSTEM_PROMPT),
        InputMessage::user(vec![
            ContentPart::InputFile {
                file_id: locator.to_string(),
            },
            ContentPart::InputText {
                text: PARSE_PROMPT.to_string(),
            },
        ]),
    ]
}

/// Exemplars become prior user/assistant turns, followed by the document,
/// the first-pass answer and the review request.
fn second_pass_input(
    locator: &str,
    exemplars: &[SamplePrescription],
    prior_json: String,
) -> Vec<InputMessage> {
    let mut input = vec![InputMessage::system(SYSTEM_PROMPT)];

    for sample in exemplars {
        input.push(InputMessage::user(vec![
            ContentPart::InputFile {
                file_id: sample.file_id.clone(),
            },
            ContentPart::InputText {
                text: PARSE_PROMPT.to_string(),
            },
        ]));
        input.push(InputMessage::assistant(sample.content.clone()));
    }

    input.push(InputMessage::user(vec![
        ContentPart::InputFile {
            file_id: locator.to_string(),
        },
        ContentPart::InputText {
            text: PARSE_PROMPT.to_string(),
        },
    ]));
    input.push(InputMessage::assistant(prior_json));
    input.push(InputMessage::user(vec![ContentPart::InputText {
        text: REVIEW_PROMPT.to_string(),
    }]));

    input
}

// === Request types ===

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: Vec<InputMessage>,
    text: TextOptions<'a>,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct TextOptions<'a> {
    format: TextFormat<'a>,
}

#[derive(Debug, Serialize)]
struct TextFormat<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'a str,
    schema: serde_json::Value,
    strict: bool,
}

#[derive(Debug, Clone, Serialize)]
struct InputMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

impl InputMessage {
    fn system(text: &str) -> Self {
        Self {
            role: "system",
            content: vec![ContentPart::InputText {
                text: text.to_string(),
            }],
        }
    }

    fn user(content: Vec<ContentPart>) -> Self {
        Self {
            role: "user",
            content,
        }
    }

    fn assistant(text: String) -> Self {
        Self {
            role: "assistant",
            content: vec![ContentPart::OutputText { text }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    InputText { text: String },
    InputFile { file_id: String },
    OutputText { text: String },
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: String,
    dimensions: usize,
    encoding_format: &'static str,
}

// === Response types ===

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    incomplete_details: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

impl ResponsesResponse {
    /// Concatenated text of all message outputs
    fn output_text(&self) -> BackendResult<String> {
        if self.status.as_deref() == Some("incomplete") {
            let reason = self
                .incomplete_details
                .as_ref()
                .and_then(|d| d.get("reason"))
                .and_then(|r| r.as_str())
                .unwrap_or("unknown");
            return Err(BackendError::InvalidResponse {
                message: format!("response incomplete: {reason}"),
            });
        }

        let mut text = String::new();
        for part in self
            .output
            .iter()
            .filter(|item| item.kind == "message")
            .flat_map(|item| item.content.iter())
        {
            match (part.kind.as_str(), &part.text, &part.refusal) {
                ("output_text", Some(chunk), _) => text.push_str(chunk),
                ("refusal", _, Some(reason)) => {
                    return Err(BackendError::InvalidResponse {
                        message: format!("model refused: {reason}"),
                    });
                }
                _ => {}
            }
        }
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
