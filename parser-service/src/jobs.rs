//! In-memory ledger of asynchronous jobs.
//!
//! Jobs live only as long as the process. Terminal jobs are reaped by a
//! background sweep once they are older than the retention window.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use strum::{Display, EnumString};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::JobsConfig;
use crate::models::{ParserResultScore, Prescription};

/// Type tag for jobs created by the extraction pipeline
pub const PARSE_PRESCRIPTION_JOB: &str = "parse_prescription";

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

/// Payload carried by a job, serialized as `null` or the bare object
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobResult {
    #[default]
    None,
    Prescription(Prescription),
    Score(ParserResultScore),
}

impl JobResult {
    #[cfg(test)]
    pub fn is_none(&self) -> bool {
        matches!(self, JobResult::None)
    }

    pub fn as_prescription(&self) -> Option<&Prescription> {
        match self {
            JobResult::Prescription(rx) => Some(rx),
            _ => None,
        }
    }
}

/// A tracked unit of asynchronous work
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub reference: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub result: JobResult,
}

/// Thread-safe job registry
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<String, Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending job and return its id
    pub fn create_job(&self, kind: &str, reference: impl Into<String>) -> String {
        let reference = reference.into();
        loop {
            let id = Uuid::new_v4().to_string();
            if let Entry::Vacant(entry) = self.jobs.entry(id.clone()) {
                entry.insert(Job {
                    id: id.clone(),
                    kind: kind.to_string(),
                    reference,
                    status: JobStatus::Pending,
                    started_at: Utc::now(),
                    completed_at: None,
                    error: None,
                    result: JobResult::None,
                });
                debug!(job_id = %id, kind, "Job created");
                return id;
            }
        }
    }

    /// Snapshot of a job, detached from later updates
    pub fn get_job(&self, id: &str) -> Option<Job> {
        self.jobs.get(id).map(|job| job.value().clone())
    }

    /// Apply an update to a job. Returns false if the id is unknown.
    ///
    /// The first terminal status stamps `completed_at`. An error message is
    /// only written when one is given. The result is always replaced, so
    /// passing `JobResult::None` clears an earlier result.
    pub fn update_job(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<String>,
        result: JobResult,
    ) -> bool {
        let Some(mut job) = self.jobs.get_mut(id) else {
            return false;
        };

        job.status = status;
        if status.is_terminal() && job.completed_at.is_none() {
            job.completed_at = Some(Utc::now());
        }
        if let Some(message) = error {
            job.error = Some(message);
        }
        job.result = result;

        debug!(job_id = %id, status = %status, "Job updated");
        true
    }

    /// Remove terminal jobs that completed more than `age` ago
    pub fn cleanup_older_than(&self, age: Duration) -> usize {
        let threshold = chrono::Duration::from_std(age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.cleanup_completed_before(threshold)
    }

    /// Remove terminal jobs that completed strictly before `threshold`
    pub fn cleanup_completed_before(&self, threshold: DateTime<Utc>) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.completed_at.is_some_and(|done| done < threshold))
        });
        let removed = before.saturating_sub(self.jobs.len());

        if removed > 0 {
            info!(removed, "Cleaned up completed jobs");
        }
        removed
    }

    /// Number of tracked jobs
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Start the background sweep that evicts old terminal jobs.
///
/// Runs until `shutdown` is cancelled.
pub fn spawn_reaper(
    registry: Arc<JobRegistry>,
    config: &JobsConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let period = config.sweep_interval();
    let retention = config.retention();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Job reaper stopped");
                    break;
                }
                _ = interval.tick() => {
                    registry.cleanup_older_than(retention);
                }
            }
        }
    })
}
