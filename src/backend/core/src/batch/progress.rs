//! Progress aggregation and fan-out.
//!
//! Each batch owns a [`ProgressAggregator`]: the only place live status counts
//! change. Every transition produces a [`ProgressEvent`] that goes to
//!
//! - `broadcast` subscribers of that batch ([`ProgressAggregator::subscribe`])
//! - every scheduler-wide [`ProgressReporter`], through a [`ReporterHub`]
//!
//! Neither path can block a worker. Broadcast receivers that fall behind lose
//! the oldest events; a reporter whose queue is full loses the newest one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::batch::{BatchId, JobId, JobStatus};
use crate::error::Result;

// ═══════════════════════════════════════════════════════════════════════════════
// Counts and Events
// ═══════════════════════════════════════════════════════════════════════════════

/// Number of jobs in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    /// `n` freshly created jobs.
    pub fn with_pending(n: usize) -> Self {
        Self {
            pending: n,
            ..Self::default()
        }
    }

    pub fn get(&self, status: JobStatus) -> usize {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Queued => self.queued,
            JobStatus::Running => self.running,
            JobStatus::Succeeded => self.succeeded,
            JobStatus::Failed => self.failed,
            JobStatus::Cancelled => self.cancelled,
        }
    }

    fn slot(&mut self, status: JobStatus) -> &mut usize {
        match status {
            JobStatus::Pending => &mut self.pending,
            JobStatus::Queued => &mut self.queued,
            JobStatus::Running => &mut self.running,
            JobStatus::Succeeded => &mut self.succeeded,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Cancelled => &mut self.cancelled,
        }
    }

    /// Move one job from `from` to `to`.
    pub fn apply(&mut self, from: JobStatus, to: JobStatus) {
        let source = self.slot(from);
        *source = source.saturating_sub(1);
        *self.slot(to) += 1;
    }

    pub fn total(&self) -> usize {
        self.pending + self.queued + self.running + self.succeeded + self.failed + self.cancelled
    }

    /// Jobs in a terminal status.
    pub fn finished(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    pub fn is_complete(&self) -> bool {
        self.finished() == self.total()
    }
}

/// Batch-level milestones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchEventKind {
    Started,
    Paused,
    Resumed,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEventKind {
    JobTransition {
        job_id: JobId,
        file_name: String,
        from: JobStatus,
        to: JobStatus,
    },
    Batch {
        event: BatchEventKind,
    },
}

/// One observable change, with the counts right after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub batch_id: BatchId,
    #[serde(flatten)]
    pub kind: ProgressEventKind,
    pub counts: StatusCounts,
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn job_transition(&self) -> Option<(JobId, JobStatus, JobStatus)> {
        match &self.kind {
            ProgressEventKind::JobTransition { job_id, from, to, .. } => Some((*job_id, *from, *to)),
            ProgressEventKind::Batch { .. } => None,
        }
    }

    pub fn batch_event(&self) -> Option<BatchEventKind> {
        match &self.kind {
            ProgressEventKind::Batch { event } => Some(*event),
            ProgressEventKind::JobTransition { .. } => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Reporters
// ═══════════════════════════════════════════════════════════════════════════════

/// An observer of progress events.
///
/// Reporters run on their own delivery task; a slow or failing reporter only
/// delays itself.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn notify(&self, event: &ProgressEvent) -> Result<()>;
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone)]
pub struct TracingReporter;

#[async_trait]
impl ProgressReporter for TracingReporter {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn notify(&self, event: &ProgressEvent) -> Result<()> {
        let counts = &event.counts;
        match &event.kind {
            ProgressEventKind::JobTransition {
                job_id,
                file_name,
                from,
                to,
            } => {
                debug!(
                    batch_id = %event.batch_id,
                    job_id = %job_id,
                    file_name = %file_name,
                    from = %from,
                    to = %to,
                    running = counts.running,
                    finished = counts.finished(),
                    total = counts.total(),
                    "Job status changed"
                );
            }
            ProgressEventKind::Batch { event: kind } => {
                info!(
                    batch_id = %event.batch_id,
                    event = ?kind,
                    succeeded = counts.succeeded,
                    failed = counts.failed,
                    cancelled = counts.cancelled,
                    total = counts.total(),
                    "Batch progress"
                );
            }
        }
        Ok(())
    }
}

struct ReporterQueue {
    name: String,
    tx: mpsc::Sender<ProgressEvent>,
}

/// Delivers events to the scheduler-wide reporters.
///
/// Each reporter gets a bounded queue and a task draining it.
pub struct ReporterHub {
    queues: Vec<ReporterQueue>,
}

impl ReporterHub {
    /// A hub with no reporters.
    pub fn empty() -> Self {
        Self { queues: Vec::new() }
    }

    /// Start one delivery task per reporter. Must be called inside a tokio runtime.
    pub fn start(
        reporters: Vec<Arc<dyn ProgressReporter>>,
        buffer: usize,
        timeout: Duration,
    ) -> Self {
        let queues = reporters
            .into_iter()
            .map(|reporter| {
                let (tx, rx) = mpsc::channel(buffer.max(1));
                let name = reporter.name().to_string();
                tokio::spawn(deliver(reporter, rx, timeout));
                ReporterQueue { name, tx }
            })
            .collect();

        Self { queues }
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Hand an event to every reporter without waiting.
    pub fn dispatch(&self, event: &ProgressEvent) {
        for queue in &self.queues {
            match queue.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        reporter = %queue.name,
                        batch_id = %event.batch_id,
                        "Progress reporter queue full, event dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(reporter = %queue.name, "Progress reporter stopped");
                }
            }
        }
    }
}

async fn deliver(
    reporter: Arc<dyn ProgressReporter>,
    mut rx: mpsc::Receiver<ProgressEvent>,
    timeout: Duration,
) {
    while let Some(event) = rx.recv().await {
        match tokio::time::timeout(timeout, reporter.notify(&event)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                warn!(reporter = %reporter.name(), error = %error, "Progress reporter failed");
            }
            Err(_) => {
                warn!(
                    reporter = %reporter.name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Progress reporter timed out"
                );
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Aggregator
// ═══════════════════════════════════════════════════════════════════════════════

/// Live counts for one batch plus event fan-out.
pub struct ProgressAggregator {
    batch_id: BatchId,
    counts: Mutex<StatusCounts>,
    subscribers: broadcast::Sender<ProgressEvent>,
    hub: Arc<ReporterHub>,
}

impl ProgressAggregator {
    /// `jobs` is the number of pending jobs the batch starts with.
    pub fn new(batch_id: BatchId, jobs: usize, hub: Arc<ReporterHub>, capacity: usize) -> Self {
        let (subscribers, _) = broadcast::channel(capacity.max(1));
        Self {
            batch_id,
            counts: Mutex::new(StatusCounts::with_pending(jobs)),
            subscribers,
            hub,
        }
    }

    /// Record a job status change and publish it.
    pub fn on_transition(&self, job_id: JobId, file_name: &str, from: JobStatus, to: JobStatus) {
        let mut counts = self.counts.lock();
        counts.apply(from, to);
        // Published under the lock so subscribers see counts in order
        self.publish(
            ProgressEventKind::JobTransition {
                job_id,
                file_name: file_name.to_string(),
                from,
                to,
            },
            *counts,
        );
    }

    /// Publish a batch milestone with the current counts.
    pub fn on_batch_event(&self, event: BatchEventKind) {
        let counts = self.counts.lock();
        self.publish(ProgressEventKind::Batch { event }, *counts);
    }

    pub fn counts(&self) -> StatusCounts {
        *self.counts.lock()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.subscribers.subscribe()
    }

    fn publish(&self, kind: ProgressEventKind, counts: StatusCounts) {
        let event = ProgressEvent {
            batch_id: self.batch_id,
            kind,
            counts,
            at: Utc::now(),
        };
        self.hub.dispatch(&event);
        // No subscribers is fine
        let _ = self.subscribers.send(event);
    }
}
