//! HTTP API for the prescription parser.
//!
//! This module provides the REST API endpoints for:
//! - Health monitoring
//! - Prescription submission and job polling
//! - Sample ingestion, scoring and evaluation

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::service::ParserService;

pub mod parser;
use parser::{
    evaluate_handler, get_job_handler, ingest_sample_handler, score_handler,
    submit_prescription_handler,
};

/// Application state
pub struct AppState {
    pub service: Arc<ParserService>,
    pub start_time: Instant,
}

/// Build the API router
pub fn router(service: Arc<ParserService>) -> Router {
    let max_body_size = usize::try_from(service.config.limits.max_upload_size_bytes).unwrap_or(usize::MAX);

    let state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/parser/prescription", post(submit_prescription_handler))
        .route("/parser/prescription/{id}", get(get_job_handler))
        .route("/parser/prescription/sample", post(ingest_sample_handler))
        .route("/parser/score", post(score_handler))
        .route("/parser/evaluate", post(evaluate_handler))
        .layer(DefaultBodyLimit::max(max_body_size));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        backend: state.service.backend.name(),
        tracked_jobs: state.service.jobs.len(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    backend: &'static str,
    tracked_jobs: usize,
}
