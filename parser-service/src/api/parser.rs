//! Prescription parser API endpoints.
//!
//! Handlers for document submission, job polling, sample ingestion,
//! scoring and evaluation runs.

use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::jobs::Job;
use crate::models::{ParserResultScore, Prescription};
use crate::service::EvaluationReport;

use super::AppState;

/// Multipart fields shared by the upload endpoints
#[derive(Default)]
struct UploadForm {
    image: Option<(String, Bytes)>,
    json: Option<String>,
    iterations: Option<String>,
}

impl UploadForm {
    async fn read(multipart: &mut Multipart, max_size: u64) -> ServiceResult<Self> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await.map_err(invalid_request)? {
            let name = field.name().unwrap_or("").to_string();

            match name.as_str() {
                "image" => {
                    let file_name = field.file_name().unwrap_or("document").to_string();
                    let data = field.bytes().await.map_err(invalid_request)?;
                    if data.len() as u64 > max_size {
                        return Err(ProcessingError::FileTooLarge {
                            size: data.len() as u64,
                            max: max_size,
                        }
                        .into());
                    }
                    form.image = Some((file_name, data));
                }
                "json" => form.json = Some(field.text().await.map_err(invalid_request)?),
                "iterations" => form.iterations = Some(field.text().await.map_err(invalid_request)?),
                _ => {}
            }
        }

        Ok(form)
    }

    fn take_image(&mut self) -> ServiceResult<(String, Bytes)> {
        self.image.take().ok_or_else(|| ServiceError::InvalidRequest {
            message: "missing image field".to_string(),
        })
    }

    fn take_json(&mut self) -> ServiceResult<String> {
        self.json.take().ok_or_else(|| ServiceError::InvalidRequest {
            message: "missing json field".to_string(),
        })
    }
}

fn invalid_request(e: impl std::fmt::Display) -> ServiceError {
    ServiceError::InvalidRequest {
        message: e.to_string(),
    }
}

/// Submit a prescription document for asynchronous extraction
pub async fn submit_prescription_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ServiceResult<Json<Job>> {
    let max_size = state.service.config.limits.max_upload_size_bytes;
    let mut form = UploadForm::read(&mut multipart, max_size).await?;
    let (file_name, data) = form.take_image()?;

    let job_id = state.service.submit_document(&file_name, data)?;
    let job = state
        .service
        .jobs
        .get_job(&job_id)
        .ok_or_else(|| ServiceError::Internal {
            message: format!("job {job_id} missing right after submission"),
        })?;
    Ok(Json(job))
}

/// Get the current snapshot of a job
pub async fn get_job_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ServiceResult<Json<Job>> {
    state
        .service
        .jobs
        .get_job(&id)
        .map(Json)
        .ok_or(ServiceError::JobNotFound { job_id: id })
}

/// Store a validated document and its prescription as a sample
pub async fn ingest_sample_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ServiceResult<StatusCode> {
    let max_size = state.service.config.limits.max_upload_size_bytes;
    let mut form = UploadForm::read(&mut multipart, max_size).await?;
    let (file_name, data) = form.take_image()?;
    let json = form.take_json()?;

    let document: Prescription = serde_json::from_str(&json).map_err(|e| ServiceError::InvalidRequest {
        message: format!("json is not a valid prescription: {e}"),
    })?;

    state.service.ingest_sample(&file_name, data, document).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Request to grade parser output against the expected document.
///
/// Either side may be a JSON value or a string holding JSON.
#[derive(Deserialize)]
pub struct ScoreRequest {
    pub expected: Value,
    pub output: Value,
}

fn json_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

/// Score parser output against a validated document
pub async fn score_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScoreRequest>,
) -> ServiceResult<Json<ParserResultScore>> {
    let expected = json_text(request.expected);
    let output = json_text(request.output);
    let score = state.service.score_result(&expected, &output).await?;
    Ok(Json(score))
}

/// Run a document through the pipeline several times and score each result
pub async fn evaluate_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ServiceResult<Json<Vec<EvaluationReport>>> {
    let max_size = state.service.config.limits.max_upload_size_bytes;
    let mut form = UploadForm::read(&mut multipart, max_size).await?;
    let (file_name, data) = form.take_image()?;
    let expected = form.take_json()?;

    let iterations = match form.iterations.as_deref().map(str::trim) {
        None | Some("") => 1,
        Some(raw) => raw.parse::<usize>().map_err(|_| ServiceError::InvalidRequest {
            message: format!("iterations must be a positive integer, got {raw:?}"),
        })?,
    };

    let reports = state
        .service
        .evaluate(&file_name, data, &expected, iterations)
        .await?;
    Ok(Json(reports))
}
