//! Tests for idempotent record synchronization.
//!
//! Tests cover:
//! - Concurrent syncs of the same job
//! - Insert races against another writer
//! - Concurrent syncs of distinct jobs
//! - Error propagation from the sink

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use transmute_core::batch::{
    ConversionInput, ConversionOutput, ErrorClass, InMemoryPersistenceSink, Job, JobFailure,
    JobRecord, JobStatus, PersistenceError, PersistenceSink, PersistenceSynchronizer,
    RecordIdentity, SyncOutcome,
};

fn finished_job(file_name: &str) -> Job {
    let mut job = Job::new(ConversionInput::new(file_name, "MOVE A TO B."));
    job.transition_to(JobStatus::Queued).unwrap();
    job.transition_to(JobStatus::Running).unwrap();
    job.record_attempt(1);
    job.mark_succeeded(ConversionOutput::new("a = b")).unwrap();
    job
}

fn failed_job(file_name: &str) -> Job {
    let mut job = Job::new(ConversionInput::new(file_name, "GARBAGE"));
    job.transition_to(JobStatus::Queued).unwrap();
    job.transition_to(JobStatus::Running).unwrap();
    job.record_attempt(1);
    job.mark_failed(JobFailure::new(ErrorClass::Fatal, "malformed_input", "line 1"))
        .unwrap();
    job
}

/// Sink whose `find` never sees committed records, like a stale replica.
#[derive(Default)]
struct StaleReadSink {
    inner: InMemoryPersistenceSink,
    finds: AtomicU32,
}

#[async_trait]
impl PersistenceSink for StaleReadSink {
    async fn find(&self, _: &RecordIdentity) -> Result<Option<JobRecord>, PersistenceError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    async fn insert(&self, record: &JobRecord) -> Result<(), PersistenceError> {
        self.inner.insert(record).await
    }

    async fn update(&self, identity: &RecordIdentity, record: &JobRecord) -> Result<(), PersistenceError> {
        self.inner.update(identity, record).await
    }
}

/// Sink that refuses every update.
#[derive(Default)]
struct ReadOnlySink {
    inner: InMemoryPersistenceSink,
}

#[async_trait]
impl PersistenceSink for ReadOnlySink {
    async fn find(&self, identity: &RecordIdentity) -> Result<Option<JobRecord>, PersistenceError> {
        self.inner.find(identity).await
    }

    async fn insert(&self, record: &JobRecord) -> Result<(), PersistenceError> {
        self.inner.insert(record).await
    }

    async fn update(&self, _: &RecordIdentity, _: &JobRecord) -> Result<(), PersistenceError> {
        Err(PersistenceError::Backend("read-only replica".into()))
    }
}

// ============================================================================
// Idempotence
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_syncs_of_one_job_keep_one_record() {
    let sink = Arc::new(InMemoryPersistenceSink::new());
    let sync = Arc::new(PersistenceSynchronizer::new(sink.clone()));
    let job = Arc::new(finished_job("report.cbl"));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let sync = sync.clone();
            let job = job.clone();
            tokio::spawn(async move { sync.sync("daily", &job).await })
        })
        .collect();

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap().unwrap());
    }

    assert_eq!(sink.len(), 1);
    assert_eq!(sink.insert_count(), 1);
    assert_eq!(sink.update_count(), 0);
    assert_eq!(
        outcomes.iter().filter(|o| **o == SyncOutcome::Inserted).count(),
        1
    );
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, SyncOutcome::Inserted | SyncOutcome::Unchanged)));
}

#[tokio::test]
async fn test_insert_race_falls_back_to_update() {
    let sink = Arc::new(StaleReadSink::default());
    let sync = PersistenceSynchronizer::new(sink.clone());
    let job = finished_job("report.cbl");

    assert_eq!(sync.sync("daily", &job).await.unwrap(), SyncOutcome::Inserted);
    assert_eq!(sync.sync("daily", &job).await.unwrap(), SyncOutcome::Updated);

    assert_eq!(sink.finds.load(Ordering::SeqCst), 2);
    assert_eq!(sink.inner.len(), 1);
    assert_eq!(sink.inner.insert_count(), 1);
    assert_eq!(sink.inner.update_count(), 1);
}

#[tokio::test]
async fn test_new_outcome_replaces_old_one() {
    let sink = Arc::new(InMemoryPersistenceSink::new());
    let sync = PersistenceSynchronizer::new(sink.clone());

    sync.sync("daily", &failed_job("report.cbl")).await.unwrap();
    let outcome = sync.sync("daily", &finished_job("report.cbl")).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Updated);

    let record = sink.get(&RecordIdentity::new("daily", "report.cbl")).unwrap();
    assert_eq!(record.status, JobStatus::Succeeded);
    assert!(record.error.is_none());
    assert_eq!(record.output.unwrap().content, "a = b");
}

#[tokio::test]
async fn test_identity_is_scoped_by_batch_name() {
    let sink = Arc::new(InMemoryPersistenceSink::new());
    let sync = PersistenceSynchronizer::new(sink.clone());
    let job = finished_job("report.cbl");

    sync.sync("monday", &job).await.unwrap();
    sync.sync("tuesday", &job).await.unwrap();

    assert_eq!(sink.len(), 2);
}

// ============================================================================
// Concurrency Across Identities
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_jobs_sync_concurrently() {
    let sink = Arc::new(InMemoryPersistenceSink::new());
    let sync = Arc::new(PersistenceSynchronizer::new(sink.clone()));

    let tasks: Vec<_> = (0..50)
        .map(|i| {
            let sync = sync.clone();
            tokio::spawn(async move {
                let job = finished_job(&format!("prog-{}.cbl", i));
                sync.sync("bulk", &job).await
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), SyncOutcome::Inserted);
    }
    assert_eq!(sink.len(), 50);
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_sink_errors_are_returned() {
    let sink = Arc::new(ReadOnlySink::default());
    let sync = PersistenceSynchronizer::new(sink.clone());

    sync.sync("daily", &failed_job("report.cbl")).await.unwrap();
    let err = sync
        .sync("daily", &finished_job("report.cbl"))
        .await
        .unwrap_err();

    assert_eq!(err, PersistenceError::Backend("read-only replica".into()));
    let stored = sink.inner.get(&RecordIdentity::new("daily", "report.cbl")).unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
}

#[tokio::test]
async fn test_record_carries_input_digest() {
    let sink = Arc::new(InMemoryPersistenceSink::new());
    let sync = PersistenceSynchronizer::new(sink.clone());
    let job = finished_job("report.cbl");

    sync.sync("daily", &job).await.unwrap();

    let record = sink.get(&RecordIdentity::new("daily", "report.cbl")).unwrap();
    assert_eq!(record.input_digest, job.input.digest());
    assert_eq!(record.input_digest.len(), 64);
    assert_eq!(record.job_id, job.id);
    assert_eq!(record.attempts, 1);
}
