//! Tests for progress reporting.
//!
//! Tests cover:
//! - Delivery to scheduler-wide reporters
//! - Slow, stuck and failing reporters never holding up a batch
//! - Event serialization

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use transmute_core::batch::{
    Batch, BatchEventKind, ConversionInput, ConversionOutput, ProgressEvent, ProgressReporter,
    Scheduler,
};
use transmute_core::error::{Result, TransmuteError};
use transmute_core::service::{ConversionError, ConversionService};

struct Echo;

#[async_trait]
impl ConversionService for Echo {
    async fn convert(&self, input: &ConversionInput) -> std::result::Result<ConversionOutput, ConversionError> {
        Ok(ConversionOutput::new(input.content.clone()))
    }
}

fn batch(n: usize) -> Batch {
    Batch::from_inputs(
        (0..n).map(|i| ConversionInput::new(format!("unit-{}.pli", i), format!("DCL X{};", i))),
    )
}

#[derive(Default)]
struct Recording {
    events: Mutex<Vec<ProgressEvent>>,
}

impl Recording {
    fn saw_completion(&self) -> bool {
        self.events
            .lock()
            .iter()
            .any(|e| e.batch_event() == Some(BatchEventKind::Completed))
    }
}

#[async_trait]
impl ProgressReporter for Recording {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(&self, event: &ProgressEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Never returns.
struct Stuck;

#[async_trait]
impl ProgressReporter for Stuck {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn notify(&self, _: &ProgressEvent) -> Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[derive(Default)]
struct Failing {
    calls: AtomicUsize,
}

#[async_trait]
impl ProgressReporter for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    async fn notify(&self, _: &ProgressEvent) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TransmuteError::internal("webhook returned 500"))
    }
}

async fn until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_reporter_receives_batch_events() {
    let recording = Arc::new(Recording::default());
    let scheduler = Scheduler::builder(Arc::new(Echo))
        .reporter(recording.clone())
        .build();
    assert_eq!(scheduler.reporter_count(), 1);

    let handle = scheduler.submit(batch(4)).unwrap();
    let summary = scheduler.wait(&handle).await;
    assert_eq!(summary.succeeded, 4);

    until(|| recording.saw_completion()).await;

    let events = recording.events.lock();
    assert!(events.iter().all(|e| e.batch_id == handle.id()));
    // Pending -> Queued, Queued -> Running, Running -> Succeeded per job
    assert_eq!(events.iter().filter(|e| e.job_transition().is_some()).count(), 12);
    assert_eq!(events.last().unwrap().counts.succeeded, 4);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_reporter_does_not_block_batch() {
    // A queue of 4 overflows long before 10 jobs are done
    let scheduler = Scheduler::builder(Arc::new(Echo))
        .reporter(Arc::new(Stuck))
        .reporter_buffer(4)
        .reporter_timeout(Duration::from_secs(60))
        .build();

    let handle = scheduler.submit(batch(10)).unwrap();
    let summary = tokio::time::timeout(Duration::from_secs(1), scheduler.wait(&handle))
        .await
        .expect("batch held up by a reporter");
    assert_eq!(summary.succeeded, 10);
    assert!(handle.is_finished());
}

#[tokio::test]
async fn test_failing_reporter_is_isolated() {
    let failing = Arc::new(Failing::default());
    let recording = Arc::new(Recording::default());
    let scheduler = Scheduler::builder(Arc::new(Echo))
        .reporter(failing.clone())
        .reporter(recording.clone())
        .build();

    let handle = scheduler.submit(batch(3)).unwrap();
    let summary = scheduler.wait(&handle).await;
    assert_eq!(summary.succeeded, 3);
    assert!(summary.persistence_warnings.is_empty());

    until(|| recording.saw_completion()).await;
    until(|| failing.calls.load(Ordering::SeqCst) > 0).await;
}

#[tokio::test]
async fn test_event_json_shape() {
    let scheduler = Scheduler::builder(Arc::new(Echo)).build();
    let handle = scheduler.submit(batch(1)).unwrap();
    let mut events = handle.subscribe();
    scheduler.wait(&handle).await;

    let mut transition = None;
    let mut completed = None;
    while let Ok(event) = events.try_recv() {
        match event.batch_event() {
            Some(BatchEventKind::Completed) => completed = Some(event),
            None if transition.is_none() => transition = Some(event),
            _ => {}
        }
    }

    let json = serde_json::to_value(transition.unwrap()).unwrap();
    assert_eq!(json["type"], "job_transition");
    assert_eq!(json["file_name"], "unit-0.pli");
    assert_eq!(json["from"], "queued");
    assert_eq!(json["to"], "running");
    assert_eq!(json["counts"]["running"], 1);

    let json = serde_json::to_value(completed.unwrap()).unwrap();
    assert_eq!(json["type"], "batch");
    assert_eq!(json["event"], "completed");
    assert_eq!(json["counts"]["succeeded"], 1);
}
