//! Worker slots for one batch, bounded by a tokio Semaphore.
//!
//! A slot is held for the whole life of a running job: every attempt, every
//! backoff pause and the record synchronization that follows. Pool statistics
//! track how many slots were ever held at once.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Result, TransmuteError};

/// A held worker slot. Released when dropped.
pub struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
    pool_stats: Arc<PoolStats>,
    started_at: Instant,
    finished: bool,
}

impl WorkerPermit {
    /// Release the slot after a job succeeded.
    pub fn mark_success(mut self) {
        self.finished = true;
        self.pool_stats.record_success(self.started_at.elapsed());
    }

    /// Release the slot after a job failed.
    pub fn mark_failure(mut self) {
        self.finished = true;
        self.pool_stats.record_failure(self.started_at.elapsed());
    }
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        // Dropped without an outcome: unused slot or an aborted task
        if !self.finished {
            self.pool_stats.record_unknown();
        }
    }
}

#[derive(Default)]
struct PoolStats {
    acquired: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    unknown: AtomicU64,
    total_wait_time_us: AtomicU64,
    total_exec_time_us: AtomicU64,
    peak_concurrent: AtomicUsize,
    current_concurrent: AtomicUsize,
}

impl PoolStats {
    fn record_acquire(&self, wait_time: Duration) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        self.total_wait_time_us
            .fetch_add(wait_time.as_micros() as u64, Ordering::Relaxed);
        let current = self.current_concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_concurrent.fetch_max(current, Ordering::SeqCst);
    }

    fn record_release(&self) {
        self.current_concurrent.fetch_sub(1, Ordering::SeqCst);
    }

    fn record_success(&self, exec_time: Duration) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.record_duration(exec_time);
        self.record_release();
    }

    fn record_failure(&self, exec_time: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.record_duration(exec_time);
        self.record_release();
    }

    fn record_unknown(&self) {
        self.unknown.fetch_add(1, Ordering::Relaxed);
        self.record_release();
    }

    fn record_duration(&self, duration: Duration) {
        self.total_exec_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }
}

/// A fixed number of worker slots.
pub struct WorkerPool {
    name: String,
    max_workers: usize,
    semaphore: Arc<Semaphore>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Create a pool with `max_workers` slots.
    pub fn new(name: impl Into<String>, max_workers: usize) -> Self {
        let name = name.into();

        tracing::debug!(pool_name = %name, max_workers, "Worker pool created");

        Self {
            name,
            max_workers,
            semaphore: Arc::new(Semaphore::new(max_workers)),
            stats: Arc::new(PoolStats::default()),
        }
    }

    fn active_workers(&self) -> usize {
        self.max_workers - self.semaphore.available_permits()
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<WorkerPermit> {
        let start = Instant::now();

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| {
                TransmuteError::internal(format!("Worker pool '{}' semaphore closed", self.name))
            })?;

        let wait_time = start.elapsed();
        self.stats.record_acquire(wait_time);

        tracing::trace!(
            pool_name = %self.name,
            wait_time_ms = wait_time.as_millis() as u64,
            available = self.semaphore.available_permits(),
            "Worker permit acquired"
        );

        Ok(self.permit(permit))
    }

    fn permit(&self, permit: OwnedSemaphorePermit) -> WorkerPermit {
        WorkerPermit {
            _permit: permit,
            pool_stats: self.stats.clone(),
            started_at: Instant::now(),
            finished: false,
        }
    }

    /// Get pool statistics.
    pub fn stats(&self) -> WorkerPoolStats {
        let stats = &self.stats;
        let acquired = stats.acquired.load(Ordering::Relaxed);
        let succeeded = stats.succeeded.load(Ordering::Relaxed);
        let failed = stats.failed.load(Ordering::Relaxed);
        let completed = succeeded + failed;

        WorkerPoolStats {
            max_workers: self.max_workers,
            active_workers: self.active_workers(),
            acquired,
            succeeded,
            failed,
            abandoned: stats.unknown.load(Ordering::Relaxed),
            peak_concurrent: stats.peak_concurrent.load(Ordering::SeqCst),
            avg_wait_time_us: if acquired > 0 {
                stats.total_wait_time_us.load(Ordering::Relaxed) / acquired
            } else {
                0
            },
            avg_exec_time_us: if completed > 0 {
                stats.total_exec_time_us.load(Ordering::Relaxed) / completed
            } else {
                0
            },
        }
    }
}

/// Statistics for the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerPoolStats {
    pub max_workers: usize,
    pub active_workers: usize,
    /// Slots handed out
    pub acquired: u64,
    /// Slots released after a successful job
    pub succeeded: u64,
    /// Slots released after a failed job
    pub failed: u64,
    /// Slots released without an outcome
    pub abandoned: u64,
    /// Most slots ever held at the same time
    pub peak_concurrent: usize,
    pub avg_wait_time_us: u64,
    pub avg_exec_time_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_release() {
        let pool = WorkerPool::new("test", 2);
        assert_eq!(pool.stats().active_workers, 0);

        let permit1 = pool.acquire().await.unwrap();
        let permit2 = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().active_workers, 2);

        permit1.mark_success();
        assert_eq!(pool.stats().active_workers, 1);

        permit2.mark_failure();
        assert_eq!(pool.stats().active_workers, 0);

        let stats = pool.stats();
        assert_eq!(stats.acquired, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.peak_concurrent, 2);
    }

    #[tokio::test]
    async fn test_peak_never_exceeds_capacity() {
        let pool = Arc::new(WorkerPool::new("test", 3));

        let mut handles = vec![];
        for _ in 0..12 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let permit = pool.acquire().await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
                permit.mark_success();
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.succeeded, 12);
        assert!(stats.peak_concurrent <= 3);
        assert_eq!(stats.active_workers, 0);
    }
}
