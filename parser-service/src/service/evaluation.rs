//! Repeated extraction of one document, graded against a validated result.

use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use super::ParserService;
use crate::error::{ServiceError, ServiceResult};
use crate::jobs::{Job, JobStatus};
use crate::models::ParserResultScore;

/// Outcome of one evaluated extraction job
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub job_id: String,
    /// Last status observed, `None` if the job vanished from the registry
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub score: Option<ParserResultScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_error: Option<String>,
    pub timed_out: bool,
}

impl ParserService {
    /// Submit the same document `iterations` times and score each completed
    /// extraction against `expected_json`.
    ///
    /// The deadline bounds how long this call waits. Jobs still running at
    /// the deadline keep running and are reported as timed out.
    pub async fn evaluate(
        self: &Arc<Self>,
        file_name: &str,
        bytes: Bytes,
        expected_json: &str,
        iterations: usize,
    ) -> ServiceResult<Vec<EvaluationReport>> {
        let max = self.config.evaluation.max_iterations;
        if iterations == 0 || iterations > max {
            return Err(ServiceError::InvalidRequest {
                message: format!("iterations must be between 1 and {max}"),
            });
        }
        serde_json::from_str::<serde_json::Value>(expected_json).map_err(|e| {
            ServiceError::InvalidRequest {
                message: format!("expected is not valid JSON: {e}"),
            }
        })?;

        let mut job_ids = Vec::with_capacity(iterations);
        for _ in 0..iterations {
            job_ids.push(self.submit_document(file_name, bytes.clone())?);
        }
        info!(file_name, iterations, "Evaluation jobs submitted");

        let poll = self.config.evaluation.poll_interval();
        let deadline = Instant::now() + self.config.evaluation.deadline();
        let finished = join_all(job_ids.iter().map(|id| self.wait_for_job(id, poll, deadline))).await;

        let mut reports = Vec::with_capacity(job_ids.len());
        for (job_id, job) in job_ids.into_iter().zip(finished) {
            reports.push(self.report_for(job_id, job, expected_json).await);
        }
        Ok(reports)
    }

    /// Poll a job until it is terminal or the deadline passes, returning the
    /// last snapshot seen.
    async fn wait_for_job(&self, job_id: &str, poll: Duration, deadline: Instant) -> Option<Job> {
        loop {
            let job = self.jobs.get_job(job_id);
            match &job {
                Some(job) if !job.status.is_terminal() => {}
                _ => return job,
            }
            if Instant::now() + poll > deadline {
                return job;
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn report_for(&self, job_id: String, job: Option<Job>, expected_json: &str) -> EvaluationReport {
        let mut report = EvaluationReport {
            job_id,
            status: job.as_ref().map(|job| job.status),
            error: job.as_ref().and_then(|job| job.error.clone()),
            score: None,
            score_error: None,
            timed_out: job.as_ref().is_some_and(|job| !job.status.is_terminal()),
        };

        let Some(document) = job
            .as_ref()
            .filter(|job| job.status == JobStatus::Complete)
            .and_then(|job| job.result.as_prescription())
        else {
            return report;
        };

        let output = match serde_json::to_string(document) {
            Ok(output) => output,
            Err(e) => {
                report.score_error = Some(e.to_string());
                return report;
            }
        };
        match self.score_result(expected_json, &output).await {
            Ok(score) => report.score = Some(score),
            Err(e) => {
                warn!(job_id = %report.job_id, error = %e, "Failed to score evaluation job");
                report.score_error = Some(e.to_string());
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::{
        MockBackend, MockSampleStore, canned_score, first_pass_document, test_service_with,
    };
    use std::sync::atomic::Ordering;

    fn quick_evaluation(config: &mut crate::config::ServiceConfig) {
        config.evaluation.poll_interval_secs = 1;
        config.evaluation.deadline_secs = 5;
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluate_scores_each_completed_job() {
        let (service, backend, _) =
            test_service_with(MockBackend::default(), MockSampleStore::default(), quick_evaluation);

        let reports = service
            .evaluate("rx.pdf", Bytes::from_static(b"%PDF"), r#"{"date_written":"2024-02-10"}"#, 3)
            .await
            .unwrap();

        assert_eq!(reports.len(), 3);
        for report in &reports {
            assert_eq!(report.status, Some(JobStatus::Complete));
            assert_eq!(report.score, Some(canned_score()));
            assert!(!report.timed_out);
        }
        assert_eq!(backend.scores.load(Ordering::SeqCst), 3);

        let (_, output) = backend.last_score_inputs.lock().unwrap().clone().unwrap();
        let scored: crate::models::Prescription = serde_json::from_str(&output).unwrap();
        assert_eq!(scored, first_pass_document());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_jobs_are_reported_unscored() {
        let backend = MockBackend {
            fail_first_pass: true,
            ..Default::default()
        };
        let (service, backend, _) = test_service_with(backend, MockSampleStore::default(), quick_evaluation);

        let reports = service
            .evaluate("rx.pdf", Bytes::from_static(b"%PDF"), "{}", 2)
            .await
            .unwrap();

        assert!(reports.iter().all(|r| r.status == Some(JobStatus::Failed)));
        assert!(reports.iter().all(|r| r.score.is_none()));
        assert!(
            reports
                .iter()
                .all(|r| r.error.as_deref().is_some_and(|e| e.starts_with("failed in first parsing pass")))
        );
        assert_eq!(backend.scores.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_reports_running_jobs_as_timed_out() {
        let backend = MockBackend {
            first_pass_gate: Some(Arc::new(tokio::sync::Notify::new())),
            ..Default::default()
        };
        let (service, _, _) = test_service_with(backend, MockSampleStore::default(), quick_evaluation);

        let reports = service
            .evaluate("rx.pdf", Bytes::from_static(b"%PDF"), "{}", 1)
            .await
            .unwrap();

        assert_eq!(reports.len(), 1);
        assert!(reports[0].timed_out);
        assert_eq!(reports[0].status, Some(JobStatus::Processing));
        assert!(reports[0].score.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scoring_failure_is_recorded_per_job() {
        let backend = MockBackend {
            fail_score: true,
            ..Default::default()
        };
        let (service, _, _) = test_service_with(backend, MockSampleStore::default(), quick_evaluation);

        let reports = service
            .evaluate("rx.pdf", Bytes::from_static(b"%PDF"), "{}", 1)
            .await
            .unwrap();

        assert_eq!(reports[0].status, Some(JobStatus::Complete));
        assert!(reports[0].score.is_none());
        assert!(reports[0].score_error.is_some());
    }

    #[tokio::test]
    async fn test_iterations_are_bounded() {
        let (service, backend, _) =
            test_service_with(MockBackend::default(), MockSampleStore::default(), quick_evaluation);

        for iterations in [0, 21] {
            let err = service
                .evaluate("rx.pdf", Bytes::from_static(b"%PDF"), "{}", iterations)
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::InvalidRequest { .. }));
        }
        assert_eq!(backend.uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_expected_json_submits_nothing() {
        let (service, _, _) = test_service_with(MockBackend::default(), MockSampleStore::default(), quick_evaluation);

        let err = service
            .evaluate("rx.pdf", Bytes::from_static(b"%PDF"), "not json", 1)
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::InvalidRequest { .. }));
        assert!(service.jobs.is_empty());
    }
}
