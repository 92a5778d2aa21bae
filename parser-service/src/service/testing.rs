//! Scripted backend and sample store for service tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::ParserService;
use crate::backend::{BackendResult, EMBEDDING_DIMENSIONS, ExtractionBackend, validate_embedding};
use crate::config::ServiceConfig;
use crate::db::SampleStore;
use crate::error::{BackendError, DatabaseError, ServiceResult};
use crate::models::{ParserResultScore, Prescription, SamplePrescription};

pub(crate) fn first_pass_document() -> Prescription {
    let mut rx = Prescription {
        date_written: "2024-02-10".to_string(),
        therapy_status: "new".to_string(),
        ..Default::default()
    };
    rx.patient.first_name = "Ada".to_string();
    rx
}

pub(crate) fn second_pass_document() -> Prescription {
    let mut rx = first_pass_document();
    rx.patient.last_name = "Lovelace".to_string();
    rx
}

pub(crate) fn canned_score() -> ParserResultScore {
    ParserResultScore {
        total_awarded_points: 3.0,
        total_possible_points: 4.0,
        overall_score_percentage: 75.0,
        summary_critique: "Mostly correct".to_string(),
        ..Default::default()
    }
}

fn scripted_failure(stage: &str) -> BackendError {
    BackendError::Api {
        status: 500,
        message: format!("scripted {stage} failure"),
    }
}

/// Backend whose every call succeeds unless its `fail_*` flag is set
#[derive(Default)]
pub(crate) struct MockBackend {
    pub fail_upload: bool,
    pub fail_first_pass: bool,
    pub panic_first_pass: bool,
    pub fail_embed: bool,
    pub short_embedding: bool,
    pub fail_second_pass: bool,
    pub fail_score: bool,
    /// Returned by `score` instead of the canned score
    pub score_override: Option<ParserResultScore>,
    /// When set, the first pass waits for a notification before returning
    pub first_pass_gate: Option<Arc<Notify>>,

    pub uploads: AtomicUsize,
    pub deletes: AtomicUsize,
    pub first_pass_calls: AtomicUsize,
    pub second_pass_calls: AtomicUsize,
    pub embeds: AtomicUsize,
    pub scores: AtomicUsize,
    pub last_exemplars: Mutex<Vec<SamplePrescription>>,
    pub last_prior: Mutex<Option<Prescription>>,
    pub last_score_inputs: Mutex<Option<(String, String)>>,
}

#[async_trait]
impl ExtractionBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn upload(&self, _file_name: &str, _content_type: &str, _bytes: Bytes) -> BackendResult<String> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail_upload {
            return Err(scripted_failure("upload"));
        }
        Ok(format!("file-{n}"))
    }

    async fn delete(&self, _locator: &str) -> BackendResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn extract_first_pass(&self, _locator: &str, _content_type: &str) -> BackendResult<Prescription> {
        self.first_pass_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.first_pass_gate {
            gate.notified().await;
        }
        if self.panic_first_pass {
            panic!("scripted first pass panic");
        }
        if self.fail_first_pass {
            return Err(scripted_failure("first pass"));
        }
        Ok(first_pass_document())
    }

    async fn extract_second_pass(
        &self,
        _locator: &str,
        _content_type: &str,
        exemplars: &[SamplePrescription],
        prior: &Prescription,
    ) -> BackendResult<Prescription> {
        self.second_pass_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.last_exemplars.lock() {
            *seen = exemplars.to_vec();
        }
        if let Ok(mut seen) = self.last_prior.lock() {
            *seen = Some(prior.clone());
        }
        if self.fail_second_pass {
            return Err(scripted_failure("second pass"));
        }
        Ok(second_pass_document())
    }

    async fn embed(&self, _document: &Prescription) -> BackendResult<Vec<f32>> {
        self.embeds.fetch_add(1, Ordering::SeqCst);
        if self.fail_embed {
            return Err(scripted_failure("embedding"));
        }
        let dims = if self.short_embedding { 8 } else { EMBEDDING_DIMENSIONS };
        validate_embedding(vec![0.1; dims])
    }

    async fn score(&self, expected_json: &str, output_json: &str) -> BackendResult<ParserResultScore> {
        self.scores.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.last_score_inputs.lock() {
            *seen = Some((expected_json.to_string(), output_json.to_string()));
        }
        if self.fail_score {
            return Err(scripted_failure("scoring"));
        }
        Ok(self.score_override.clone().unwrap_or_else(canned_score))
    }
}

/// Sample store returning a fixed list
#[derive(Default)]
pub(crate) struct MockSampleStore {
    pub samples: Vec<SamplePrescription>,
    pub fail_nearest: bool,
    pub fail_save: bool,
    pub nearest_calls: AtomicUsize,
    pub last_k: AtomicUsize,
    pub saved: Mutex<Vec<(String, String, Prescription, usize)>>,
}

#[async_trait]
impl SampleStore for MockSampleStore {
    async fn nearest(&self, _embedding: &[f32], k: usize) -> ServiceResult<Vec<SamplePrescription>> {
        self.nearest_calls.fetch_add(1, Ordering::SeqCst);
        self.last_k.store(k, Ordering::SeqCst);
        if self.fail_nearest {
            return Err(DatabaseError::Migration {
                message: "scripted lookup failure".to_string(),
            }
            .into());
        }
        Ok(self.samples.iter().take(k).cloned().collect())
    }

    async fn save(
        &self,
        content_type: &str,
        locator: &str,
        document: &Prescription,
        embedding: &[f32],
    ) -> ServiceResult<SamplePrescription> {
        if self.fail_save {
            return Err(DatabaseError::LockPoisoned.into());
        }
        if let Ok(mut saved) = self.saved.lock() {
            saved.push((
                content_type.to_string(),
                locator.to_string(),
                document.clone(),
                embedding.len(),
            ));
        }
        let content = serde_json::to_string(document).map_err(DatabaseError::Serialization)?;
        Ok(SamplePrescription::new(locator, content_type, content))
    }
}

pub(crate) fn test_service(
    backend: MockBackend,
    store: MockSampleStore,
) -> (Arc<ParserService>, Arc<MockBackend>, Arc<MockSampleStore>) {
    test_service_with(backend, store, |_| {})
}

pub(crate) fn test_service_with(
    backend: MockBackend,
    store: MockSampleStore,
    configure: impl FnOnce(&mut ServiceConfig),
) -> (Arc<ParserService>, Arc<MockBackend>, Arc<MockSampleStore>) {
    let mut config = ServiceConfig::default();
    configure(&mut config);

    let backend = Arc::new(backend);
    let store = Arc::new(store);
    let service = Arc::new(ParserService::new(
        Arc::new(config),
        backend.clone(),
        store.clone(),
        CancellationToken::new(),
    ));
    (service, backend, store)
}

/// Yield to other tasks until `condition` holds, panicking after a few seconds
pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..5000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not met in time");
}
