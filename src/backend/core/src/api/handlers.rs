//! API request handlers.
//!
//! All handlers return `Result<impl IntoResponse, TransmuteError>` so that
//! errors become the right HTTP status through `TransmuteError`'s
//! `IntoResponse` implementation.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::{ApiResponse, AppState};
use crate::batch::{
    Batch, BatchHandle, BatchId, BatchSnapshot, ConversionInput, ControlState, StatusCounts,
};
use crate::error::{Result, TransmuteError};

// ═══════════════════════════════════════════════════════════════════════════════
// Health and Metrics
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (persistence, healthy) = match &state.db {
        Some(db) => ("postgres", db.ping().await.is_ok()),
        None => ("memory", true),
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "version": env!("CARGO_PKG_VERSION"),
            "persistence": persistence,
            "batches": state.scheduler.list().len(),
            "timestamp": Utc::now().to_rfc3339()
        })),
    )
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Batch Handlers
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize)]
pub struct FileDto {
    pub file_name: String,
    pub content: String,
    /// Overrides the batch-wide options for this file
    #[serde(default)]
    pub options: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitBatchRequest {
    pub name: Option<String>,
    pub files: Vec<FileDto>,
    pub concurrency_limit: Option<usize>,
    pub max_attempts: Option<u32>,
    pub backoff_ms: Option<u64>,
    /// Conversion options applied to every file
    #[serde(default)]
    pub options: Option<serde_json::Value>,
}

/// Row of the batch listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchOverview {
    pub id: BatchId,
    pub name: String,
    pub control_state: ControlState,
    pub finished: bool,
    pub counts: StatusCounts,
    pub submitted_at: DateTime<Utc>,
}

impl From<&BatchSnapshot> for BatchOverview {
    fn from(snapshot: &BatchSnapshot) -> Self {
        Self {
            id: snapshot.id,
            name: snapshot.name.clone(),
            control_state: snapshot.control_state,
            finished: snapshot.finished,
            counts: snapshot.counts,
            submitted_at: snapshot.submitted_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ControlResponse {
    pub id: BatchId,
    /// False when the call did nothing
    pub changed: bool,
    pub control_state: ControlState,
}

fn find_batch(state: &AppState, id: Uuid) -> Result<BatchHandle> {
    state
        .scheduler
        .get(BatchId(id))
        .ok_or_else(|| TransmuteError::batch_not_found(id))
}

pub async fn submit_batch(
    State(state): State<AppState>,
    Json(req): Json<SubmitBatchRequest>,
) -> Result<impl IntoResponse> {
    if let Some(name) = &req.name {
        if name.trim().is_empty() {
            return Err(TransmuteError::validation("Batch name cannot be empty"));
        }
    }
    if req.files.iter().any(|f| f.file_name.trim().is_empty()) {
        return Err(TransmuteError::validation("File name cannot be empty"));
    }

    let config = state.defaults.batch_config(
        req.concurrency_limit,
        req.max_attempts,
        req.backoff_ms.map(Duration::from_millis),
    );

    let shared_options = req.options.unwrap_or(serde_json::Value::Null);
    let inputs = req.files.into_iter().map(|file| {
        ConversionInput::new(file.file_name, file.content)
            .with_options(file.options.unwrap_or_else(|| shared_options.clone()))
    });

    let mut batch = Batch::from_inputs(inputs).with_config(config);
    if let Some(name) = req.name {
        batch = batch.with_name(name);
    }

    let handle = state.scheduler.submit(batch)?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(handle.snapshot())),
    ))
}

pub async fn list_batches(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let batches: Vec<BatchOverview> = state
        .scheduler
        .list()
        .iter()
        .map(|handle| BatchOverview::from(&handle.snapshot()))
        .collect();

    Ok(Json(ApiResponse::success(batches)))
}

pub async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let handle = find_batch(&state, id)?;
    Ok(Json(ApiResponse::success(handle.snapshot())))
}

fn control_response(handle: &BatchHandle, changed: bool) -> Json<ApiResponse<ControlResponse>> {
    Json(ApiResponse::success(ControlResponse {
        id: handle.id(),
        changed,
        control_state: handle.control_state(),
    }))
}

pub async fn pause_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let handle = find_batch(&state, id)?;
    let changed = state.scheduler.pause(&handle);
    Ok(control_response(&handle, changed))
}

pub async fn resume_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let handle = find_batch(&state, id)?;
    let changed = state.scheduler.resume(&handle);
    Ok(control_response(&handle, changed))
}

pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let handle = find_batch(&state, id)?;
    let changed = state.scheduler.cancel(&handle);
    Ok(control_response(&handle, changed))
}

/// Blocks until the batch has finished.
pub async fn batch_summary(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let handle = find_batch(&state, id)?;
    let summary = state.scheduler.wait(&handle).await;
    Ok(Json(ApiResponse::success(summary)))
}

pub async fn remove_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let handle = state.scheduler.remove(BatchId(id))?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "id": handle.id(),
        "removed": true
    }))))
}
