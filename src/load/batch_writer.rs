use super::manifest::FailedPoint;
use crate::error::GridloadError;
use crate::models::TimeSeriesPoint;
use crate::resilience::{execute_with_retry, RetryPolicy};
use crate::store::PointStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of writing one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    pub batch_index: usize,
    pub submitted: usize,
    pub written: usize,
    pub failed: Vec<FailedPoint>,
    /// Whole-batch attempts made before success or fallback
    pub attempts: u32,
    pub used_fallback: bool,
}

impl BatchResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.written == self.submitted
    }
}

/// Writes batches with whole-batch retry and per-point fallback
///
/// A batch counts as written only when the store acknowledges every point.
/// When retries are exhausted each point is written on its own, once, and
/// whatever still fails is reported for the failure manifest. Points already
/// written are never rolled back.
#[derive(Clone)]
pub struct BatchWriter {
    store: Arc<dyn PointStore>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for BatchWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter")
            .field("retry", &self.retry)
            .finish()
    }
}

impl BatchWriter {
    pub fn new(store: Arc<dyn PointStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &Arc<dyn PointStore> {
        &self.store
    }

    pub async fn write_batch(&self, batch_index: usize, points: &[TimeSeriesPoint]) -> BatchResult {
        let submitted = points.len();
        let mut result = BatchResult {
            batch_index,
            submitted,
            ..BatchResult::default()
        };
        if points.is_empty() {
            return result;
        }

        let outcome = execute_with_retry(&self.retry, "load_batch", |_attempt| async move {
            let ack = self.store.write_batch(points).await?;
            if ack.is_complete(submitted) {
                Ok(())
            } else {
                Err(GridloadError::transient(
                    "point_store",
                    format!(
                        "batch {batch_index} partially acknowledged ({}/{submitted})",
                        ack.acknowledged
                    ),
                ))
            }
        })
        .await;
        result.attempts = outcome.attempts;

        let last_error = match outcome.result {
            Ok(()) => {
                debug!(batch_index, points = submitted, "📦 Batch written");
                result.written = submitted;
                return result;
            }
            Err(error) => error,
        };

        warn!(
            batch_index,
            points = submitted,
            attempts = result.attempts,
            error = %last_error,
            "⚠️ Batch failed after retries, falling back to per-point writes"
        );
        result.used_fallback = true;

        for point in points {
            match self.store.write_point(point).await {
                Ok(()) => result.written += 1,
                Err(error) => result.failed.push(failed_point(batch_index, point, &error)),
            }
        }

        info!(
            batch_index,
            written = result.written,
            failed = result.failed.len(),
            "🩹 Per-point fallback finished"
        );
        result
    }
}

fn failed_point(batch_index: usize, point: &TimeSeriesPoint, error: &GridloadError) -> FailedPoint {
    FailedPoint {
        point_id: point.point_id(),
        measurement: point.measurement.clone(),
        timestamp: point.timestamp,
        batch_index,
        error: error.to_string(),
    }
}
