//! The multi-pass extraction pipeline.
//!
//! Stages run strictly in order for one document: validate and upload,
//! first-pass extraction, embedding, exemplar retrieval, second-pass
//! refinement, finalize. Only upload and the first pass can fail a job.
//! Later stages fall back to the best result so far.

use bytes::Bytes;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::ParserService;
use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::jobs::{JobResult, JobStatus, PARSE_PRESCRIPTION_JOB};
use crate::models::Prescription;

/// Content type for a file name; only PDFs are accepted
pub fn resolve_content_type(file_name: &str) -> Result<String, ProcessingError> {
    let extension = Path::new(file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase());

    match extension.as_deref() {
        Some("pdf") => Ok(mime::APPLICATION_PDF.essence_str().to_string()),
        Some(ext) => Err(ProcessingError::UnsupportedFormat {
            extension: format!(".{ext}"),
        }),
        None => Err(ProcessingError::UnsupportedFormat {
            extension: String::new(),
        }),
    }
}

impl ParserService {
    /// Register a job for `file_name` and process it in the background.
    ///
    /// Returns the job id as soon as the job is recorded. Pipeline failures
    /// are reported through the job, never here.
    pub fn submit_document(self: &Arc<Self>, file_name: &str, bytes: Bytes) -> ServiceResult<String> {
        if self.shutdown.is_cancelled() {
            return Err(ServiceError::ShuttingDown);
        }

        let job_id = self.jobs.create_job(
            PARSE_PRESCRIPTION_JOB,
            format!("Processing image: {file_name}"),
        );
        info!(job_id = %job_id, file_name, size = bytes.len(), "Prescription submitted");

        let service = Arc::clone(self);
        let task_job_id = job_id.clone();
        let file_name = file_name.to_string();
        self.tasks.spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = service.shutdown.cancelled() => {
                    service.fail_job(&task_job_id, "service shutting down".to_string());
                    return;
                }
                permit = Arc::clone(&service.workers).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        service.fail_job(&task_job_id, "service shutting down".to_string());
                        return;
                    }
                },
            };

            // A panicking stage must still leave the job terminal.
            let outcome = AssertUnwindSafe(service.run_pipeline(&task_job_id, &file_name, bytes))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                error!(job_id = %task_job_id, "Pipeline panicked");
                service.fail_job(&task_job_id, "internal error while parsing prescription".to_string());
            }
        });

        Ok(job_id)
    }

    async fn run_pipeline(&self, job_id: &str, file_name: &str, bytes: Bytes) {
        let content_type = match resolve_content_type(file_name) {
            Ok(content_type) => content_type,
            Err(e) => {
                warn!(job_id, file_name, error = %e, "Rejected document");
                self.fail_job(job_id, e.to_string());
                return;
            }
        };

        if bytes.is_empty() {
            let e = ProcessingError::Read(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "file is empty",
            ));
            warn!(job_id, file_name, error = %e, "Rejected document");
            self.fail_job(job_id, e.to_string());
            return;
        }

        let locator = match self.backend.upload(file_name, &content_type, bytes).await {
            Ok(locator) => locator,
            Err(e) => {
                error!(job_id, file_name, error = %e, "Upload failed");
                self.fail_job(job_id, format!("failed to upload file: {e}"));
                return;
            }
        };

        self.jobs
            .update_job(job_id, JobStatus::Processing, None, JobResult::None);
        debug!(job_id, locator = %locator, "Document uploaded");

        match self.backend.extract_first_pass(&locator, &content_type).await {
            Ok(first_pass) => {
                let result = self.refine(job_id, &locator, &content_type, first_pass).await;
                self.jobs.update_job(
                    job_id,
                    JobStatus::Complete,
                    None,
                    JobResult::Prescription(result),
                );
                info!(job_id, "Prescription parsed");
            }
            Err(e) => {
                error!(job_id, error = %e, "First parsing pass failed");
                self.fail_job(job_id, format!("failed in first parsing pass: {e}"));
            }
        }

        if let Err(e) = self.backend.delete(&locator).await {
            warn!(job_id, locator = %locator, error = %e, "Failed to delete uploaded file");
        }
    }

    /// Embedding, exemplar retrieval and second pass. Any failure here
    /// keeps the first-pass result.
    async fn refine(
        &self,
        job_id: &str,
        locator: &str,
        content_type: &str,
        first_pass: Prescription,
    ) -> Prescription {
        let embedding = match self.backend.embed(&first_pass).await {
            Ok(embedding) => embedding,
            Err(e) => {
                error!(job_id, error = %e, "Embedding failed, keeping first pass");
                return first_pass;
            }
        };

        let exemplars = match self
            .samples
            .nearest(&embedding, self.config.extraction.sample_count)
            .await
        {
            Ok(exemplars) => exemplars,
            Err(e) => {
                error!(job_id, error = %e, "Sample lookup failed, keeping first pass");
                return first_pass;
            }
        };

        info!(job_id, sample_count = exemplars.len(), "Retrieved similar samples");
        if exemplars.is_empty() {
            return first_pass;
        }

        match self
            .backend
            .extract_second_pass(locator, content_type, &exemplars, &first_pass)
            .await
        {
            Ok(refined) => refined,
            Err(e) => {
                error!(job_id, error = %e, "Second parsing pass failed, keeping first pass");
                first_pass
            }
        }
    }

    fn fail_job(&self, job_id: &str, message: String) {
        self.jobs
            .update_job(job_id, JobStatus::Failed, Some(message), JobResult::None);
    }
}
