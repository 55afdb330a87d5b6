//! Transmute Server - Main entry point
//!
//! Batch conversion orchestration over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use transmute_core::{
    api::{self, AppState},
    batch::{InMemoryPersistenceSink, PersistenceSink, Scheduler, TracingReporter},
    config::Config,
    db::{Database, PgPersistenceSink},
    service::{HttpConversionConfig, HttpConversionService},
    telemetry::{init_telemetry, TelemetryConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    // Initialize telemetry
    let metrics = init_telemetry(&TelemetryConfig::from_observability(&config.observability))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Transmute Server"
    );

    // Record store
    let db = match &config.database {
        Some(db_config) => {
            let db = Database::new(db_config).await?;
            db.migrate().await?;
            tracing::info!("Connected to database, migrations applied");
            Some(db)
        }
        None => {
            tracing::warn!("No database configured, job records are kept in memory");
            None
        }
    };

    let sink: Arc<dyn PersistenceSink> = match &db {
        Some(db) => Arc::new(PgPersistenceSink::new(db.clone())),
        None => Arc::new(InMemoryPersistenceSink::new()),
    };

    // Conversion service
    let service = HttpConversionService::new(HttpConversionConfig::from(&config.conversion))?;
    tracing::info!(endpoint = %service.endpoint(), "Conversion service configured");

    // Scheduler
    let scheduler = Scheduler::builder(Arc::new(service))
        .persistence(sink)
        .reporter(Arc::new(TracingReporter))
        .reporter_buffer(config.scheduler.reporter_buffer)
        .reporter_timeout(config.scheduler.reporter_timeout)
        .build();
    tracing::info!(
        default_concurrency_limit = config.scheduler.default_concurrency_limit,
        default_max_attempts = config.scheduler.default_max_attempts,
        "Scheduler initialized"
    );

    // Create app state
    let mut app_state = AppState::new(scheduler, config.scheduler.clone()).with_metrics(metrics);
    if let Some(db) = db {
        app_state = app_state.with_database(db);
    }

    // Build router
    let app = api::build_router(app_state);

    // Start server
    let ip: std::net::IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid server host {}", config.server.host))?;
    let addr = SocketAddr::new(ip, config.server.port);
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
