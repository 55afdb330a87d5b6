//! Batch conversion orchestration.
//!
//! - [`job`]: jobs and their lifecycle
//! - [`retry`]: attempts, fixed backoff and error classification
//! - [`worker_pool`]: bounded worker slots
//! - [`control`]: pause, resume and cancel
//! - [`progress`]: live counts and event fan-out
//! - [`persistence`]: idempotent record upserts
//! - [`scheduler`]: ties it all together

pub mod control;
pub mod job;
pub mod persistence;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod worker_pool;

pub use control::{BatchControl, ControlState};
pub use job::{
    BatchId, ConversionInput, ConversionOutput, ErrorClass, Job, JobFailure, JobId, JobStatus,
};
pub use persistence::{
    InMemoryPersistenceSink, JobRecord, PersistenceError, PersistenceSink,
    PersistenceSynchronizer, RecordIdentity, SyncOutcome,
};
pub use progress::{
    BatchEventKind, ProgressAggregator, ProgressEvent, ProgressEventKind, ProgressReporter,
    ReporterHub, StatusCounts, TracingReporter,
};
pub use retry::{Outcome, RetryPolicy, DEFAULT_CALL_TIMEOUT};
pub use scheduler::{
    Batch, BatchConfig, BatchHandle, BatchSnapshot, BatchSummary, JobErrorDetail, JobView,
    PersistenceWarning, Scheduler, SchedulerBuilder,
};
pub use worker_pool::{WorkerPermit, WorkerPool, WorkerPoolStats};
