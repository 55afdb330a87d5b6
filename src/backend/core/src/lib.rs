#![allow(clippy::result_large_err)]
//! # Transmute Core
//!
//! Batch orchestration for source-to-source conversion.
//!
//! ## Architecture
//!
//! - **Batch**: jobs, retries, bounded workers, pause/resume/cancel and progress
//! - **Service**: the conversion service seam and its HTTP adapter
//! - **Persistence**: idempotent job records, in memory or in PostgreSQL
//! - **API**: REST surface for submitting and steering batches
//! - **Telemetry**: structured logging and Prometheus metrics

pub mod api;
pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod service;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorResponse, Result, TransmuteError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::batch::{
        Batch, BatchConfig, BatchHandle, BatchId, BatchSummary, ControlState, ConversionInput,
        ConversionOutput, ErrorClass, InMemoryPersistenceSink, Job, JobFailure, JobId,
        JobStatus, PersistenceSink, ProgressEvent, ProgressReporter, RetryPolicy, Scheduler,
        StatusCounts,
    };
    pub use crate::error::{ErrorCode, ErrorContext, Result, TransmuteError};
    pub use crate::service::{ConversionError, ConversionService, HttpConversionService};
}
