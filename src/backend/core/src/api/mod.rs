//! REST API for Transmute Core.
//!
//! - `GET /health`, `GET /metrics` (unversioned)
//! - `/api/v1/batches` for submitting, inspecting and controlling batches

mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::batch::Scheduler;
use crate::config::SchedulerConfig;
use crate::db::Database;
use crate::telemetry::MetricsRegistry;

pub use handlers::{BatchOverview, ControlResponse, FileDto, SubmitBatchRequest};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
    /// Defaults for fields a submission leaves out
    pub defaults: Arc<SchedulerConfig>,
    pub metrics: MetricsRegistry,
    /// Present when records go to Postgres
    pub db: Option<Database>,
}

impl AppState {
    pub fn new(scheduler: Scheduler, defaults: SchedulerConfig) -> Self {
        Self {
            scheduler,
            defaults: Arc::new(defaults),
            metrics: MetricsRegistry::disabled(),
            db: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }
}

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let batches = Router::new()
        .route(
            "/batches",
            post(handlers::submit_batch).get(handlers::list_batches),
        )
        .route(
            "/batches/:id",
            get(handlers::get_batch).delete(handlers::remove_batch),
        )
        .route("/batches/:id/pause", post(handlers::pause_batch))
        .route("/batches/:id/resume", post(handlers::resume_batch))
        .route("/batches/:id/cancel", post(handlers::cancel_batch))
        .route("/batches/:id/summary", get(handlers::batch_summary));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .nest("/api/v1", batches)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Envelope for successful JSON responses. Failures use
/// [`ErrorResponse`](crate::error::ErrorResponse), which shares the
/// `success` field.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}
