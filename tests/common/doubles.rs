//! Collaborator doubles for integration tests

use async_trait::async_trait;
use gridload_core::error::{GridloadError, Result};
use gridload_core::events::{NotificationEvent, NotificationKind, Notifier};
use gridload_core::models::{CanonicalRow, ProcessingOutcome, ProcessingPath, ProcessingRequest};
use gridload_core::orchestration::{IndexExecutor, IndexRequest, ProcessingExecutor, RowReader};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Processing executor that fails a scripted number of times, then succeeds
#[derive(Debug)]
pub struct ScriptedProcessingExecutor {
    failures_remaining: AtomicU32,
    failure: Mutex<Option<GridloadError>>,
    row_count: u64,
    calls: Mutex<Vec<(ProcessingPath, ProcessingRequest)>>,
}

impl ScriptedProcessingExecutor {
    pub fn succeeding(row_count: u64) -> Self {
        Self {
            failures_remaining: AtomicU32::new(0),
            failure: Mutex::new(None),
            row_count,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `times` calls with `error`
    pub fn failing(times: u32, error: GridloadError) -> Self {
        let executor = Self::succeeding(0);
        executor.failures_remaining.store(times, Ordering::SeqCst);
        *executor.failure.lock() = Some(error);
        executor
    }

    pub fn always_failing(error: GridloadError) -> Self {
        Self::failing(u32::MAX, error)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn paths(&self) -> Vec<ProcessingPath> {
        self.calls.lock().iter().map(|(path, _)| *path).collect()
    }

    pub fn requests(&self) -> Vec<ProcessingRequest> {
        self.calls.lock().iter().map(|(_, r)| r.clone()).collect()
    }
}

#[async_trait]
impl ProcessingExecutor for ScriptedProcessingExecutor {
    async fn process(
        &self,
        path: ProcessingPath,
        request: &ProcessingRequest,
    ) -> Result<ProcessingOutcome> {
        self.calls.lock().push((path, request.clone()));

        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            if let Some(error) = self.failure.lock().clone() {
                return Err(error);
            }
        }

        Ok(ProcessingOutcome {
            row_count: self.row_count,
            output_location: request.output_location.clone(),
        })
    }
}

/// Row reader that hands back the same rows for every location
#[derive(Debug, Default)]
pub struct StaticRowReader {
    rows: Vec<CanonicalRow>,
}

impl StaticRowReader {
    pub fn new(rows: Vec<CanonicalRow>) -> Self {
        Self { rows }
    }
}

#[async_trait]
impl RowReader for StaticRowReader {
    async fn read_rows(&self, _output_location: &str) -> Result<Vec<CanonicalRow>> {
        Ok(self.rows.clone())
    }
}

/// Notifier that keeps every notification for inspection
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
    broken: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifier that records, then reports failure
    pub fn broken() -> Self {
        let notifier = Self::default();
        notifier.broken.store(true, Ordering::SeqCst);
        notifier
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().clone()
    }

    pub fn of_kind(&self, kind: NotificationKind) -> Vec<NotificationEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        if self.broken.load(Ordering::SeqCst) {
            return Err(GridloadError::transient("notifier", "topic unavailable"));
        }
        Ok(())
    }
}

/// Indexer that counts calls
#[derive(Debug, Default)]
pub struct CountingIndexer {
    requests: Mutex<Vec<IndexRequest>>,
}

impl CountingIndexer {
    pub fn requests(&self) -> Vec<IndexRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl IndexExecutor for CountingIndexer {
    async fn index(&self, request: &IndexRequest) -> Result<()> {
        self.requests.lock().push(request.clone());
        Ok(())
    }
}
