use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod api;
mod backend;
mod config;
mod db;
mod error;
mod jobs;
mod models;
mod service;

use crate::db::Database;
use crate::service::ParserService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!(
        "Starting prescription parser service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = Arc::new(config::load_config()?);
    info!(
        host = %config.server.host,
        port = config.server.port,
        "Configuration loaded"
    );

    std::fs::create_dir_all(&config.storage.data_dir)?;

    let db_path = config.storage.database_path();
    let db = Arc::new(Database::open(&db_path)?);
    match db.sample_count() {
        Ok(count) => info!(path = %db_path.display(), samples = count, "Sample database initialized"),
        Err(e) => warn!(error = %e, "Could not count stored samples"),
    }

    let backend = backend::build_backend(&config.parser)?;

    let shutdown = CancellationToken::new();
    let service = Arc::new(ParserService::new(
        config.clone(),
        backend,
        db,
        shutdown.clone(),
    ));

    let reaper = jobs::spawn_reaper(service.jobs.clone(), &config.jobs, shutdown.clone());

    let app = api::router(service.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            signal_token.cancel();
        })
        .await?;

    service.shutdown().await;
    if let Err(e) = reaper.await {
        warn!(error = %e, "Job reaper ended abnormally");
    }
    info!("Shutdown complete");

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // RUST_LOG wins when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("prescription_parser=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
