//! Durable job records.
//!
//! A job's terminal state is written to a [`PersistenceSink`] keyed by
//! logical identity (batch name + file name). The [`PersistenceSynchronizer`]
//! is the single place that decides between insert and update, so writing the
//! same terminal job twice never leaves two records behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::batch::{ConversionOutput, Job, JobFailure, JobId, JobStatus};

/// Logical key of a durable record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordIdentity {
    pub batch_name: String,
    pub file_name: String,
}

impl RecordIdentity {
    pub fn new(batch_name: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            batch_name: batch_name.into(),
            file_name: file_name.into(),
        }
    }
}

impl fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.batch_name, self.file_name)
    }
}

/// What gets stored for a finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub identity: RecordIdentity,
    pub job_id: JobId,
    pub status: JobStatus,
    pub attempts: u32,
    pub output: Option<ConversionOutput>,
    pub error: Option<JobFailure>,
    /// SHA-256 of the source content
    pub input_digest: String,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn from_job(batch_name: &str, job: &Job) -> Self {
        Self {
            identity: RecordIdentity::new(batch_name, job.input.file_name.clone()),
            job_id: job.id,
            status: job.status,
            attempts: job.attempt,
            output: job.result.clone(),
            error: job.last_error.clone(),
            input_digest: job.input.digest(),
            updated_at: Utc::now(),
        }
    }

    /// Equal in everything but the write time.
    pub fn same_outcome(&self, other: &JobRecord) -> bool {
        self.identity == other.identity
            && self.job_id == other.job_id
            && self.status == other.status
            && self.attempts == other.attempts
            && self.output == other.output
            && self.error == other.error
            && self.input_digest == other.input_digest
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("record already exists: {0}")]
    Duplicate(RecordIdentity),

    #[error("record not found: {0}")]
    NotFound(RecordIdentity),

    #[error("job {0} has not reached a terminal status")]
    NotTerminal(JobId),

    #[error("persistence backend error: {0}")]
    Backend(String),
}

/// A durable store of job records.
///
/// Must accept concurrent calls for distinct identities.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn find(
        &self,
        identity: &RecordIdentity,
    ) -> std::result::Result<Option<JobRecord>, PersistenceError>;

    /// Fails with [`PersistenceError::Duplicate`] when the identity exists.
    async fn insert(&self, record: &JobRecord) -> std::result::Result<(), PersistenceError>;

    /// Fails with [`PersistenceError::NotFound`] when the identity is absent.
    async fn update(
        &self,
        identity: &RecordIdentity,
        record: &JobRecord,
    ) -> std::result::Result<(), PersistenceError>;
}

/// What a sync call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Inserted,
    Updated,
    /// An identical record was already stored
    Unchanged,
}

/// Idempotent upsert of terminal job records.
pub struct PersistenceSynchronizer {
    sink: Arc<dyn PersistenceSink>,
    /// Serializes writes per identity
    locks: DashMap<RecordIdentity, Arc<tokio::sync::Mutex<()>>>,
}

impl PersistenceSynchronizer {
    pub fn new(sink: Arc<dyn PersistenceSink>) -> Self {
        Self {
            sink,
            locks: DashMap::new(),
        }
    }

    /// Write the terminal state of `job` under `batch_name`.
    pub async fn sync(
        &self,
        batch_name: &str,
        job: &Job,
    ) -> std::result::Result<SyncOutcome, PersistenceError> {
        if !job.status.is_terminal() {
            return Err(PersistenceError::NotTerminal(job.id));
        }
        self.upsert(JobRecord::from_job(batch_name, job)).await
    }

    /// Insert or update `record` by identity.
    pub async fn upsert(
        &self,
        record: JobRecord,
    ) -> std::result::Result<SyncOutcome, PersistenceError> {
        let identity = record.identity.clone();
        let lock = self.locks.entry(identity.clone()).or_default().clone();

        let result = {
            let _guard = lock.lock().await;
            self.upsert_locked(&record).await
        };

        drop(lock);
        self.locks
            .remove_if(&identity, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    async fn upsert_locked(
        &self,
        record: &JobRecord,
    ) -> std::result::Result<SyncOutcome, PersistenceError> {
        let identity = &record.identity;

        match self.sink.find(identity).await? {
            Some(existing) if existing.same_outcome(record) => Ok(SyncOutcome::Unchanged),
            Some(_) => {
                self.sink.update(identity, record).await?;
                Ok(SyncOutcome::Updated)
            }
            None => match self.sink.insert(record).await {
                Ok(()) => Ok(SyncOutcome::Inserted),
                Err(PersistenceError::Duplicate(_)) => {
                    // Another writer got there between find and insert
                    debug!(identity = %identity, "Insert raced, updating instead");
                    self.sink.update(identity, record).await?;
                    Ok(SyncOutcome::Updated)
                }
                Err(error) => Err(error),
            },
        }
    }
}

/// Sink backed by a concurrent map. Used when no database is configured.
#[derive(Default)]
pub struct InMemoryPersistenceSink {
    records: DashMap<RecordIdentity, JobRecord>,
    inserts: AtomicU64,
    updates: AtomicU64,
}

impl InMemoryPersistenceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &RecordIdentity) -> Option<JobRecord> {
        self.records.get(identity).map(|r| r.clone())
    }

    pub fn records(&self) -> Vec<JobRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn insert_count(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PersistenceSink for InMemoryPersistenceSink {
    async fn find(
        &self,
        identity: &RecordIdentity,
    ) -> std::result::Result<Option<JobRecord>, PersistenceError> {
        Ok(self.get(identity))
    }

    async fn insert(&self, record: &JobRecord) -> std::result::Result<(), PersistenceError> {
        match self.records.entry(record.identity.clone()) {
            Entry::Occupied(_) => Err(PersistenceError::Duplicate(record.identity.clone())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                self.inserts.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    async fn update(
        &self,
        identity: &RecordIdentity,
        record: &JobRecord,
    ) -> std::result::Result<(), PersistenceError> {
        match self.records.get_mut(identity) {
            Some(mut existing) => {
                *existing = record.clone();
                self.updates.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => Err(PersistenceError::NotFound(identity.clone())),
        }
    }
}
