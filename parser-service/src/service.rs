//! Prescription extraction service.
//!
//! `ParserService` owns the job registry, the extraction backend and the
//! sample store, and runs submitted documents through the extraction
//! pipeline on a bounded pool of background tasks.

mod evaluation;
mod pipeline;
mod samples;
mod scoring;
#[cfg(test)]
pub(crate) mod testing;

pub use evaluation::EvaluationReport;

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::backend::ExtractionBackend;
use crate::config::ServiceConfig;
use crate::db::SampleStore;
use crate::jobs::JobRegistry;

/// Main service coordinator
pub struct ParserService {
    pub config: Arc<ServiceConfig>,
    pub jobs: Arc<JobRegistry>,
    pub backend: Arc<dyn ExtractionBackend>,
    pub samples: Arc<dyn SampleStore>,
    /// Permits for concurrently running pipelines
    workers: Arc<Semaphore>,
    /// Every spawned pipeline task, so shutdown can wait for them
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl ParserService {
    /// Create a new service instance
    pub fn new(
        config: Arc<ServiceConfig>,
        backend: Arc<dyn ExtractionBackend>,
        samples: Arc<dyn SampleStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let permits = config.extraction.max_concurrent_jobs.max(1);
        info!(
            backend = backend.name(),
            max_concurrent_jobs = permits,
            sample_count = config.extraction.sample_count,
            "Initializing prescription parser service"
        );

        Self {
            config,
            jobs: Arc::new(JobRegistry::new()),
            backend,
            samples,
            workers: Arc::new(Semaphore::new(permits)),
            tasks: TaskTracker::new(),
            shutdown,
        }
    }

    /// Token cancelled when the process is shutting down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Signal shutdown and wait for in-flight pipelines to finish.
    ///
    /// Pipelines still waiting for a worker fail immediately; running ones
    /// complete their current stages.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        info!(in_flight = self.tasks.len(), "Waiting for running pipelines");
        self.tasks.wait().await;
    }

    /// Wait until every pipeline spawned so far has finished
    #[cfg(test)]
    pub(crate) async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}
