//! Job definitions.
//!
//! A [`Job`] pairs an immutable [`ConversionInput`] with the mutable status
//! record the scheduler drives forward:
//!
//! ```text
//! Pending → Queued → Running → Succeeded | Failed
//!    └─────────┴──→ Cancelled
//! ```
//!
//! Transitions never move backwards and terminal jobs never change again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::error::{Result, TransmuteError};

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a job, stable across retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Unique identifier for a submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for BatchId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created at submission, not yet in the queue
    Pending,
    /// Waiting in the queue for a free slot
    Queued,
    /// Holding a slot; attempts in progress
    Running,
    /// Conversion produced a result
    Succeeded,
    /// Fatal error, or transient errors on every attempt
    Failed,
    /// Withdrawn before it started
    Cancelled,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 6] = [
        Self::Pending,
        Self::Queued,
        Self::Running,
        Self::Succeeded,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Queued)
                | (Self::Queued, Self::Running)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Queued, Self::Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Input and Output
// ═══════════════════════════════════════════════════════════════════════════════

/// What gets sent to the conversion service. Opaque to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionInput {
    /// Logical name of the artifact; unique within a batch
    pub file_name: String,
    /// Source content
    pub content: String,
    /// Service-specific conversion options
    #[serde(default)]
    pub options: serde_json::Value,
}

impl ConversionInput {
    pub fn new(file_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
            options: serde_json::Value::Null,
        }
    }

    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }

    /// SHA-256 of the source content, hex encoded.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.content.as_bytes()))
    }
}

/// Converted content returned by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionOutput {
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ConversionOutput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: serde_json::Value::Null,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Failures
// ═══════════════════════════════════════════════════════════════════════════════

/// Retryable versus permanent failure of a conversion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network faults, rate limiting, timeouts
    Transient,
    /// Malformed input, permanent rejection
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// The classified error a failed job ends with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub class: ErrorClass,
    /// Short machine-readable reason (`timeout`, `rate_limited`, ...)
    pub code: String,
    pub message: String,
}

impl JobFailure {
    pub fn new(class: ErrorClass, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class,
            code: code.into(),
            message: message.into(),
        }
    }

    /// The task driving the job died before recording an outcome.
    pub fn worker_terminated() -> Self {
        Self::new(
            ErrorClass::Fatal,
            "worker_terminated",
            "worker terminated unexpectedly",
        )
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.class, self.code, self.message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job
// ═══════════════════════════════════════════════════════════════════════════════

/// One unit of conversion work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub input: ConversionInput,
    pub status: JobStatus,
    /// Attempts made so far; 0 before the first
    pub attempt: u32,
    /// Present only when `Succeeded`
    pub result: Option<ConversionOutput>,
    /// Present only when `Failed`
    pub last_error: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job.
    pub fn new(input: ConversionInput) -> Self {
        Self {
            id: JobId::new(),
            input,
            status: JobStatus::Pending,
            attempt: 0,
            result: None,
            last_error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.input.file_name
    }

    /// Move to `next`, returning the previous status.
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` when the lifecycle forbids the move.
    pub fn transition_to(&mut self, next: JobStatus) -> Result<JobStatus> {
        let from = self.status;
        if !from.can_transition_to(next) {
            return Err(TransmuteError::invalid_state_transition(self.id, from, next));
        }

        self.status = next;
        match next {
            JobStatus::Running => self.started_at = Some(Utc::now()),
            s if s.is_terminal() => self.finished_at = Some(Utc::now()),
            _ => {}
        }
        Ok(from)
    }

    /// Record that attempt number `attempt` has begun.
    pub fn record_attempt(&mut self, attempt: u32) {
        self.attempt = self.attempt.max(attempt);
    }

    pub fn mark_succeeded(&mut self, output: ConversionOutput) -> Result<JobStatus> {
        let from = self.transition_to(JobStatus::Succeeded)?;
        self.result = Some(output);
        Ok(from)
    }

    pub fn mark_failed(&mut self, failure: JobFailure) -> Result<JobStatus> {
        let from = self.transition_to(JobStatus::Failed)?;
        self.last_error = Some(failure);
        Ok(from)
    }

    pub fn mark_cancelled(&mut self) -> Result<JobStatus> {
        self.transition_to(JobStatus::Cancelled)
    }

    /// Time spent running, once finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn job() -> Job {
        Job::new(ConversionInput::new("report.cbl", "IDENTIFICATION DIVISION."))
    }

    #[test]
    fn test_job_id() {
        let id1 = JobId::new();
        let id2 = JobId::new();
        assert_ne!(id1, id2);

        let uuid = Uuid::new_v4();
        assert_eq!(JobId::from(uuid).to_string(), uuid.to_string());
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_transition_rules() {
        use JobStatus::*;

        let allowed = [
            (Pending, Queued),
            (Queued, Running),
            (Running, Succeeded),
            (Running, Failed),
            (Pending, Cancelled),
            (Queued, Cancelled),
        ];

        for from in JobStatus::ALL {
            for to in JobStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_happy_path_lifecycle() {
        let mut job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt, 0);

        job.transition_to(JobStatus::Queued).unwrap();
        job.transition_to(JobStatus::Running).unwrap();
        assert!(job.started_at.is_some());

        job.record_attempt(1);
        let from = job.mark_succeeded(ConversionOutput::new("public class Report {}")).unwrap();

        assert_eq!(from, JobStatus::Running);
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.attempt, 1);
        assert!(job.result.is_some());
        assert!(job.last_error.is_none());
        assert!(job.duration().is_some());
    }

    #[test]
    fn test_terminal_job_cannot_move() {
        let mut job = job();
        job.transition_to(JobStatus::Queued).unwrap();
        job.transition_to(JobStatus::Running).unwrap();
        job.mark_failed(JobFailure::new(ErrorClass::Fatal, "rejected", "nope"))
            .unwrap();

        let err = job.transition_to(JobStatus::Running).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result.is_none());
        assert_eq!(job.last_error.as_ref().unwrap().code, "rejected");
    }

    #[test]
    fn test_running_job_cannot_be_cancelled() {
        let mut job = job();
        job.transition_to(JobStatus::Queued).unwrap();
        job.transition_to(JobStatus::Running).unwrap();
        assert!(job.mark_cancelled().is_err());
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn test_record_attempt_is_monotonic() {
        let mut job = job();
        job.record_attempt(2);
        job.record_attempt(1);
        assert_eq!(job.attempt, 2);
    }

    #[test]
    fn test_input_digest() {
        let input = ConversionInput::new("a.txt", "abc");
        assert_eq!(
            input.digest(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&JobStatus::Succeeded).unwrap();
        assert_eq!(json, "\"succeeded\"");
        let class: ErrorClass = serde_json::from_str("\"transient\"").unwrap();
        assert_eq!(class, ErrorClass::Transient);
    }
}
