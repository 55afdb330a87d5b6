//! The batch scheduler.
//!
//! Each submitted batch gets:
//!
//! - a job table indexed by [`JobId`], keeping submission order
//! - a FIFO queue of job ids, filled once at submission and never refilled
//! - a [`WorkerPool`] with `concurrency_limit` slots
//! - a dispatcher task that pops the queue whenever a slot is free and the
//!   batch is neither paused nor cancelled
//!
//! Every started job runs on its own task, holding its slot through all
//! attempts and the record sync that follows. Lock order is queue, then job,
//! then counts; no lock is held across an await.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::batch::control::{self, BatchControl, ControlState};
use crate::batch::{
    BatchEventKind, BatchId, ConversionInput, ErrorClass, InMemoryPersistenceSink, Job,
    JobFailure, JobId, JobStatus, Outcome, PersistenceSink, PersistenceSynchronizer,
    ProgressAggregator, ProgressEvent, ProgressReporter, ReporterHub, RetryPolicy,
    StatusCounts, WorkerPermit, WorkerPool, WorkerPoolStats,
};
use crate::error::{Result, TransmuteError};
use crate::service::ConversionService;
use crate::telemetry::BatchMetrics;

const DEFAULT_EVENT_CAPACITY: usize = 1024;

// ═══════════════════════════════════════════════════════════════════════════════
// Submission
// ═══════════════════════════════════════════════════════════════════════════════

/// Concurrency and retry settings of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Most jobs running at once
    pub concurrency_limit: usize,
    pub retry: RetryPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
            retry: RetryPolicy::default(),
        }
    }
}

/// A collection of jobs to run under one configuration.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Persistence namespace; defaults to the batch id
    pub name: Option<String>,
    pub jobs: Vec<Job>,
    pub config: BatchConfig,
}

impl Batch {
    pub fn new(jobs: Vec<Job>) -> Self {
        Self {
            name: None,
            jobs,
            config: BatchConfig::default(),
        }
    }

    /// One pending job per input, in order.
    pub fn from_inputs(inputs: impl IntoIterator<Item = ConversionInput>) -> Self {
        Self::new(inputs.into_iter().map(Job::new).collect())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.config.concurrency_limit = limit;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.config.concurrency_limit == 0 {
            return Err(TransmuteError::invalid_batch(
                "concurrency limit must be at least 1",
            ));
        }
        if self.jobs.is_empty() {
            return Err(TransmuteError::invalid_batch("batch has no jobs"));
        }
        self.config.retry.validate()?;

        let mut ids = HashSet::with_capacity(self.jobs.len());
        let mut file_names = HashSet::with_capacity(self.jobs.len());
        for job in &self.jobs {
            if job.status != JobStatus::Pending || job.attempt != 0 {
                return Err(TransmuteError::invalid_batch(format!(
                    "job {} is not pending",
                    job.id
                )));
            }
            if !ids.insert(job.id) {
                return Err(TransmuteError::invalid_batch(format!(
                    "job id {} appears twice",
                    job.id
                )));
            }
            if !file_names.insert(job.file_name()) {
                return Err(TransmuteError::invalid_batch(format!(
                    "file name {} appears twice",
                    job.file_name()
                )));
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Results and Views
// ═══════════════════════════════════════════════════════════════════════════════

/// Why one job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobErrorDetail {
    pub job_id: JobId,
    pub file_name: String,
    pub class: ErrorClass,
    pub code: String,
    pub message: String,
    pub attempts: u32,
}

/// A record that could not be written. The job's status is unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistenceWarning {
    pub job_id: JobId,
    pub file_name: String,
    pub message: String,
}

/// Final report of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub batch_name: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// In submission order
    pub per_job_errors: Vec<JobErrorDetail>,
    pub persistence_warnings: Vec<PersistenceWarning>,
    /// Whether `cancel` was called before the batch drained
    pub was_cancelled: bool,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// One job, without its payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub file_name: String,
    pub status: JobStatus,
    pub attempt: u32,
    pub error: Option<JobFailure>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            file_name: job.input.file_name.clone(),
            status: job.status,
            attempt: job.attempt,
            error: job.last_error.clone(),
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

/// Point-in-time state of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSnapshot {
    pub id: BatchId,
    pub name: String,
    pub control_state: ControlState,
    pub finished: bool,
    pub counts: StatusCounts,
    pub concurrency_limit: usize,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub pool: WorkerPoolStats,
    pub submitted_at: DateTime<Utc>,
    pub jobs: Vec<JobView>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Table
// ═══════════════════════════════════════════════════════════════════════════════

/// Jobs by id. The set of jobs is fixed at submission; each entry is only
/// written by whoever currently owns that job.
struct JobTable {
    order: Vec<JobId>,
    jobs: HashMap<JobId, RwLock<Job>>,
}

impl JobTable {
    fn new(jobs: Vec<Job>) -> Self {
        let order = jobs.iter().map(|j| j.id).collect();
        let jobs = jobs.into_iter().map(|j| (j.id, RwLock::new(j))).collect();
        Self { order, jobs }
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.get(&id).map(|job| job.read().clone())
    }

    fn read<T>(&self, id: JobId, f: impl FnOnce(&Job) -> T) -> Option<T> {
        self.jobs.get(&id).map(|job| f(&job.read()))
    }

    fn write<T>(&self, id: JobId, f: impl FnOnce(&mut Job) -> T) -> Option<T> {
        self.jobs.get(&id).map(|job| f(&mut job.write()))
    }

    /// Visit jobs in submission order.
    fn each<T>(&self, mut f: impl FnMut(&Job) -> Option<T>) -> Vec<T> {
        self.order
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .filter_map(|job| f(&job.read()))
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Batch Run
// ═══════════════════════════════════════════════════════════════════════════════

struct BatchRun {
    id: BatchId,
    name: String,
    config: BatchConfig,
    jobs: JobTable,
    queue: Mutex<VecDeque<JobId>>,
    /// Set under the queue lock once dispatch stops; control calls are then no-ops
    closed: AtomicBool,
    control: BatchControl,
    progress: ProgressAggregator,
    pool: WorkerPool,
    warnings: Mutex<Vec<PersistenceWarning>>,
    /// Cancelled before starting; records still to be written
    cancelled: Mutex<Vec<JobId>>,
    submitted_at: DateTime<Utc>,
    summary: watch::Sender<Option<BatchSummary>>,
}

impl BatchRun {
    fn is_finished(&self) -> bool {
        self.summary.borrow().is_some()
    }

    /// Apply a status change to a job and publish it.
    fn transition(&self, id: JobId, apply: impl FnOnce(&mut Job) -> Result<JobStatus>) -> bool {
        let applied = self.jobs.write(id, |job| {
            apply(job).map(|from| {
                self.progress
                    .on_transition(job.id, job.file_name(), from, job.status);
            })
        });

        match applied {
            Some(Ok(())) => true,
            Some(Err(error)) => {
                error!(batch_id = %self.id, job_id = %id, error = %error, "Rejected job transition");
                false
            }
            None => {
                error!(batch_id = %self.id, job_id = %id, "Unknown job");
                false
            }
        }
    }

    fn enqueue_all(&self) {
        let mut queue = self.queue.lock();
        for &id in &self.jobs.order {
            if self.transition(id, |job| job.transition_to(JobStatus::Queued)) {
                queue.push_back(id);
            }
        }
    }

    /// Pop the next queued job and mark it running, unless paused or cancelled.
    fn start_next(&self) -> Option<JobId> {
        let mut queue = self.queue.lock();
        if self.control.state() != ControlState::Running {
            return None;
        }
        while let Some(id) = queue.pop_front() {
            if self.transition(id, |job| job.transition_to(JobStatus::Running)) {
                return Some(id);
            }
        }
        None
    }

    fn pause(&self) -> bool {
        if self.is_finished() {
            return false;
        }
        // Taken so no job starts between the check in start_next and here
        let _queue = self.queue.lock();
        if self.closed.load(Ordering::SeqCst) || !self.control.pause() {
            return false;
        }
        info!(batch_id = %self.id, "Batch paused");
        self.progress.on_batch_event(BatchEventKind::Paused);
        true
    }

    fn resume(&self) -> bool {
        if self.is_finished() {
            return false;
        }
        let _queue = self.queue.lock();
        if self.closed.load(Ordering::SeqCst) || !self.control.resume() {
            return false;
        }
        info!(batch_id = %self.id, "Batch resumed");
        self.progress.on_batch_event(BatchEventKind::Resumed);
        true
    }

    fn cancel(&self) -> bool {
        if self.is_finished() {
            return false;
        }

        // The queue lock is held until the withdrawn jobs are terminal and
        // listed, so the dispatcher cannot finish the batch in between.
        let withdrawn = {
            let mut queue = self.queue.lock();
            if self.closed.load(Ordering::SeqCst) || !self.control.cancel() {
                return false;
            }
            queue.clear();

            let waiting = self.jobs.each(|job| {
                matches!(job.status, JobStatus::Pending | JobStatus::Queued).then_some(job.id)
            });
            let withdrawn: Vec<JobId> = waiting
                .into_iter()
                .filter(|&id| self.transition(id, |job| job.mark_cancelled()))
                .collect();

            self.cancelled.lock().extend(withdrawn.iter().copied());
            self.progress.on_batch_event(BatchEventKind::Cancelled);
            withdrawn.len()
        };

        for _ in 0..withdrawn {
            BatchMetrics::record_job_cancelled();
        }
        info!(batch_id = %self.id, withdrawn, "Batch cancelled");
        true
    }

    /// Drive one started job to a terminal status.
    ///
    /// The worker slot stays held until the job's record is synced, so a slow
    /// sink delays the next dequeue of this batch. Each job's record is then
    /// written before its slot goes to another job.
    async fn execute(&self, id: JobId, permit: WorkerPermit, ctx: &SchedulerContext) {
        let Some(input) = self.jobs.read(id, |job| job.input.clone()) else {
            error!(batch_id = %self.id, job_id = %id, "Started job missing from table");
            permit.mark_failure();
            return;
        };

        BatchMetrics::record_job_started();
        debug!(batch_id = %self.id, job_id = %id, file_name = %input.file_name, "Job started");

        let outcome = self
            .config
            .retry
            .execute(ctx.service.as_ref(), &input, |attempt| {
                self.jobs.write(id, |job| job.record_attempt(attempt));
                BatchMetrics::record_attempt(attempt);
            })
            .await;

        let succeeded = outcome.is_success();
        self.finish(id, outcome, ctx).await;

        if succeeded {
            permit.mark_success();
        } else {
            permit.mark_failure();
        }
    }

    async fn finish(&self, id: JobId, outcome: Outcome, ctx: &SchedulerContext) {
        self.transition(id, |job| match outcome {
            Outcome::Succeeded(output) => job.mark_succeeded(output),
            Outcome::Failed(failure) => job.mark_failed(failure),
        });

        let Some(job) = self.jobs.get(id) else {
            return;
        };

        let elapsed = job
            .duration()
            .and_then(|d| d.to_std().ok())
            .unwrap_or_default();
        BatchMetrics::record_job_finished(job.status, elapsed);

        info!(
            batch_id = %self.id,
            job_id = %id,
            file_name = %job.input.file_name,
            status = %job.status,
            attempt = job.attempt,
            "Job finished"
        );

        self.persist(&job, ctx).await;
    }

    async fn persist(&self, job: &Job, ctx: &SchedulerContext) {
        match ctx.synchronizer.sync(&self.name, job).await {
            Ok(outcome) => {
                debug!(batch_id = %self.id, job_id = %job.id, outcome = ?outcome, "Record synced");
            }
            Err(error) => {
                warn!(
                    batch_id = %self.id,
                    job_id = %job.id,
                    file_name = %job.input.file_name,
                    error = %error,
                    "Failed to persist job record"
                );
                BatchMetrics::record_persistence_failure();
                self.warnings.lock().push(PersistenceWarning {
                    job_id: job.id,
                    file_name: job.input.file_name.clone(),
                    message: error.to_string(),
                });
            }
        }
    }

    /// Fail jobs left running by a worker task that died.
    async fn recover_orphans(&self, ctx: &SchedulerContext) {
        let orphans = self
            .jobs
            .each(|job| (job.status == JobStatus::Running).then_some(job.id));

        for id in orphans {
            error!(batch_id = %self.id, job_id = %id, "Worker terminated before finishing job");
            self.finish(id, Outcome::Failed(JobFailure::worker_terminated()), ctx)
                .await;
        }
    }

    async fn persist_cancelled(&self, ctx: &SchedulerContext) {
        let withdrawn = std::mem::take(&mut *self.cancelled.lock());
        for id in withdrawn {
            if let Some(job) = self.jobs.get(id) {
                self.persist(&job, ctx).await;
            }
        }
    }

    fn build_summary(&self) -> BatchSummary {
        let counts = self.progress.counts();
        let per_job_errors = self.jobs.each(|job| {
            job.last_error.as_ref().map(|failure| JobErrorDetail {
                job_id: job.id,
                file_name: job.input.file_name.clone(),
                class: failure.class,
                code: failure.code.clone(),
                message: failure.message.clone(),
                attempts: job.attempt,
            })
        });

        let finished_at = Utc::now();
        BatchSummary {
            batch_id: self.id,
            batch_name: self.name.clone(),
            total: self.jobs.len(),
            succeeded: counts.succeeded,
            failed: counts.failed,
            cancelled: counts.cancelled,
            per_job_errors,
            persistence_warnings: self.warnings.lock().clone(),
            was_cancelled: self.control.state() == ControlState::Cancelled,
            submitted_at: self.submitted_at,
            finished_at,
            elapsed_ms: (finished_at - self.submitted_at).num_milliseconds().max(0) as u64,
        }
    }

    fn snapshot(&self) -> BatchSnapshot {
        BatchSnapshot {
            id: self.id,
            name: self.name.clone(),
            control_state: self.control.state(),
            finished: self.is_finished(),
            counts: self.progress.counts(),
            concurrency_limit: self.config.concurrency_limit,
            max_attempts: self.config.retry.max_attempts(),
            backoff_ms: self.config.retry.backoff_delay().as_millis() as u64,
            pool: self.pool.stats(),
            submitted_at: self.submitted_at,
            jobs: self.jobs.each(|job| Some(JobView::from(job))),
        }
    }
}

/// The dispatcher: one per batch.
async fn dispatch(run: Arc<BatchRun>, ctx: Arc<SchedulerContext>) {
    info!(
        batch_id = %run.id,
        batch_name = %run.name,
        jobs = run.jobs.len(),
        concurrency_limit = run.config.concurrency_limit,
        max_attempts = run.config.retry.max_attempts(),
        "Batch started"
    );
    run.progress.on_batch_event(BatchEventKind::Started);

    let mut control_rx = run.control.subscribe();
    let mut workers = JoinSet::new();

    loop {
        if control::wait_while_paused(&mut control_rx).await == ControlState::Cancelled {
            break;
        }
        if run.queue.lock().is_empty() {
            break;
        }

        let permit = tokio::select! {
            permit = run.pool.acquire() => match permit {
                Ok(permit) => permit,
                Err(error) => {
                    error!(batch_id = %run.id, error = %error, "Worker pool unavailable");
                    break;
                }
            },
            Ok(()) = control_rx.changed() => continue,
            Some(joined) = workers.join_next(), if !workers.is_empty() => {
                report_join(&run, joined);
                continue;
            }
        };

        // Paused or cancelled since the slot came free: the permit goes back
        let Some(job_id) = run.start_next() else {
            continue;
        };

        let run = run.clone();
        let ctx = ctx.clone();
        workers.spawn(async move { run.execute(job_id, permit, &ctx).await });
    }

    while let Some(joined) = workers.join_next().await {
        report_join(&run, joined);
    }

    // Waits out a cancel that is still withdrawing jobs
    {
        let _queue = run.queue.lock();
        run.closed.store(true, Ordering::SeqCst);
    }

    run.recover_orphans(&ctx).await;
    run.persist_cancelled(&ctx).await;

    let summary = run.build_summary();
    run.progress.on_batch_event(BatchEventKind::Completed);
    BatchMetrics::record_batch_finished(if summary.was_cancelled {
        "cancelled"
    } else {
        "completed"
    });

    info!(
        batch_id = %run.id,
        succeeded = summary.succeeded,
        failed = summary.failed,
        cancelled = summary.cancelled,
        persistence_warnings = summary.persistence_warnings.len(),
        elapsed_ms = summary.elapsed_ms,
        "Batch completed"
    );

    run.summary.send_replace(Some(summary));
}

fn report_join(run: &BatchRun, joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(error) = joined {
        error!(batch_id = %run.id, error = %error, "Job task ended abnormally");
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handle
// ═══════════════════════════════════════════════════════════════════════════════

/// Control and observation of one submitted batch.
#[derive(Clone)]
pub struct BatchHandle {
    run: Arc<BatchRun>,
}

impl std::fmt::Debug for BatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchHandle")
            .field("id", &self.run.id)
            .field("name", &self.run.name)
            .finish()
    }
}

impl BatchHandle {
    pub fn id(&self) -> BatchId {
        self.run.id
    }

    pub fn name(&self) -> &str {
        &self.run.name
    }

    pub fn control_state(&self) -> ControlState {
        self.run.control.state()
    }

    /// Stop starting new jobs. Running jobs carry on. Returns whether the
    /// state changed.
    pub fn pause(&self) -> bool {
        self.run.pause()
    }

    /// Start dispatching again after [`pause`](Self::pause).
    pub fn resume(&self) -> bool {
        self.run.resume()
    }

    /// Withdraw every job that has not started. Running jobs are not
    /// interrupted.
    pub fn cancel(&self) -> bool {
        self.run.cancel()
    }

    /// Wait until every job is terminal and all records are written.
    pub async fn wait(&self) -> BatchSummary {
        let mut rx = self.run.summary.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(summary) = current {
                return summary;
            }
            if rx.changed().await.is_err() {
                return self.run.build_summary();
            }
        }
    }

    /// The summary, if the batch has finished.
    pub fn summary(&self) -> Option<BatchSummary> {
        self.run.summary.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.run.is_finished()
    }

    pub fn counts(&self) -> StatusCounts {
        self.run.progress.counts()
    }

    pub fn pool_stats(&self) -> WorkerPoolStats {
        self.run.pool.stats()
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        self.run.snapshot()
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.run.jobs.get(id)
    }

    /// All jobs in submission order.
    pub fn jobs(&self) -> Vec<Job> {
        self.run.jobs.each(|job| Some(job.clone()))
    }

    /// Live progress events of this batch.
    ///
    /// Jobs move `Pending -> Queued` inside [`Scheduler::submit`], before a
    /// handle exists, so subscribers never see those transitions. The first
    /// job events they can receive are `Queued -> Running` or
    /// `Queued -> Cancelled`. Scheduler-wide reporters do see them.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.run.progress.subscribe()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Scheduler
// ═══════════════════════════════════════════════════════════════════════════════

struct SchedulerContext {
    service: Arc<dyn ConversionService>,
    synchronizer: PersistenceSynchronizer,
    hub: Arc<ReporterHub>,
    event_capacity: usize,
}

/// Builds a [`Scheduler`].
pub struct SchedulerBuilder {
    service: Arc<dyn ConversionService>,
    sink: Option<Arc<dyn PersistenceSink>>,
    reporters: Vec<Arc<dyn ProgressReporter>>,
    reporter_buffer: usize,
    reporter_timeout: Duration,
    event_capacity: usize,
}

impl SchedulerBuilder {
    /// Where job records go. Defaults to an in-memory sink.
    pub fn persistence(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Attach a reporter to every batch.
    pub fn reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    /// Events queued per reporter before new ones are dropped.
    pub fn reporter_buffer(mut self, buffer: usize) -> Self {
        self.reporter_buffer = buffer;
        self
    }

    /// Longest a single reporter notification may take.
    pub fn reporter_timeout(mut self, timeout: Duration) -> Self {
        self.reporter_timeout = timeout;
        self
    }

    /// Broadcast capacity for batch subscribers.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Must be called inside a tokio runtime when reporters are attached.
    pub fn build(self) -> Scheduler {
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(InMemoryPersistenceSink::new()));

        let hub = if self.reporters.is_empty() {
            ReporterHub::empty()
        } else {
            ReporterHub::start(self.reporters, self.reporter_buffer, self.reporter_timeout)
        };

        Scheduler {
            ctx: Arc::new(SchedulerContext {
                service: self.service,
                synchronizer: PersistenceSynchronizer::new(sink),
                hub: Arc::new(hub),
                event_capacity: self.event_capacity,
            }),
            batches: Arc::new(DashMap::new()),
        }
    }
}

/// Runs batches of conversion jobs.
#[derive(Clone)]
pub struct Scheduler {
    ctx: Arc<SchedulerContext>,
    batches: Arc<DashMap<BatchId, BatchHandle>>,
}

impl Scheduler {
    pub fn builder(service: Arc<dyn ConversionService>) -> SchedulerBuilder {
        SchedulerBuilder {
            service,
            sink: None,
            reporters: Vec::new(),
            reporter_buffer: 256,
            reporter_timeout: Duration::from_secs(5),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn new(service: Arc<dyn ConversionService>, sink: Arc<dyn PersistenceSink>) -> Self {
        Self::builder(service).persistence(sink).build()
    }

    /// Validate a batch and start running it in the background.
    ///
    /// # Errors
    ///
    /// `InvalidBatch` when the concurrency limit or attempt count is zero,
    /// there are no jobs, or two jobs share an id or file name.
    pub fn submit(&self, batch: Batch) -> Result<BatchHandle> {
        batch.validate()?;

        let id = BatchId::new();
        let name = batch.name.unwrap_or_else(|| id.to_string());
        let job_count = batch.jobs.len();
        let (summary, _) = watch::channel(None);

        let run = Arc::new(BatchRun {
            id,
            pool: WorkerPool::new(format!("batch-{}", id), batch.config.concurrency_limit),
            progress: ProgressAggregator::new(
                id,
                job_count,
                self.ctx.hub.clone(),
                self.ctx.event_capacity,
            ),
            name,
            config: batch.config,
            jobs: JobTable::new(batch.jobs),
            queue: Mutex::new(VecDeque::with_capacity(job_count)),
            closed: AtomicBool::new(false),
            control: BatchControl::new(),
            warnings: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            submitted_at: Utc::now(),
            summary,
        });

        run.enqueue_all();

        let handle = BatchHandle { run: run.clone() };
        self.batches.insert(id, handle.clone());
        tokio::spawn(dispatch(run, self.ctx.clone()));

        Ok(handle)
    }

    pub fn pause(&self, handle: &BatchHandle) -> bool {
        handle.pause()
    }

    pub fn resume(&self, handle: &BatchHandle) -> bool {
        handle.resume()
    }

    pub fn cancel(&self, handle: &BatchHandle) -> bool {
        handle.cancel()
    }

    /// Wait for a batch to finish.
    pub async fn wait(&self, handle: &BatchHandle) -> BatchSummary {
        handle.wait().await
    }

    pub fn get(&self, id: BatchId) -> Option<BatchHandle> {
        self.batches.get(&id).map(|h| h.clone())
    }

    /// Submitted batches, oldest first.
    pub fn list(&self) -> Vec<BatchHandle> {
        let mut handles: Vec<BatchHandle> = self.batches.iter().map(|h| h.clone()).collect();
        handles.sort_by_key(|h| h.run.submitted_at);
        handles
    }

    /// Forget a finished batch.
    ///
    /// # Errors
    ///
    /// `BatchNotFound` for an unknown id, `BatchStillRunning` if it has not
    /// finished.
    pub fn remove(&self, id: BatchId) -> Result<BatchHandle> {
        let handle = self
            .get(id)
            .ok_or_else(|| TransmuteError::batch_not_found(id))?;
        if !handle.is_finished() {
            return Err(TransmuteError::batch_still_running(id));
        }
        self.batches
            .remove(&id)
            .map(|(_, handle)| handle)
            .ok_or_else(|| TransmuteError::batch_not_found(id))
    }

    /// Number of reporters attached to every batch.
    pub fn reporter_count(&self) -> usize {
        self.ctx.hub.len()
    }
}
