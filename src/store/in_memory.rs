use super::traits::{BatchAck, PointQuery, PointStore};
use crate::constants::system;
use crate::error::{GridloadError, Result};
use crate::models::{PointId, TimeSeriesPoint};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// In-process point store keyed by point identity
///
/// Carries a few fault-injection switches so that batching, fallback and
/// health-check behaviour can be exercised without a real store.
#[derive(Debug, Default)]
pub struct InMemoryPointStore {
    points: RwLock<BTreeMap<PointId, TimeSeriesPoint>>,
    unavailable: AtomicBool,
    failing_batch_calls: AtomicUsize,
    /// Points carrying any of these tag pairs are always rejected
    rejected_tags: RwLock<Vec<(String, String)>>,
    batch_sizes: Mutex<Vec<usize>>,
    point_writes: AtomicUsize,
}

impl InMemoryPointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the store were down
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Fail the next `count` batch calls with a transient error
    pub fn fail_next_batches(&self, count: usize) {
        self.failing_batch_calls.store(count, Ordering::SeqCst);
    }

    /// Permanently reject points tagged `key=value`
    pub fn reject_tag(&self, key: impl Into<String>, value: impl Into<String>) {
        self.rejected_tags.write().push((key.into(), value.into()));
    }

    /// Sizes of every batch call received, in order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    /// Number of single-point writes received
    pub fn point_writes(&self) -> usize {
        self.point_writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.points.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.read().is_empty()
    }

    pub fn insert(&self, point: TimeSeriesPoint) {
        self.points.write().insert(point.point_id(), point);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GridloadError::transient(
                "point_store",
                "connection refused",
            ));
        }
        Ok(())
    }

    fn is_rejected(&self, point: &TimeSeriesPoint) -> bool {
        self.rejected_tags
            .read()
            .iter()
            .any(|(k, v)| point.has_tag(k, v))
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_batch_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PointStore for InMemoryPointStore {
    async fn write_batch(&self, points: &[TimeSeriesPoint]) -> Result<BatchAck> {
        self.ensure_available()?;
        self.batch_sizes.lock().push(points.len());

        if self.take_injected_failure() {
            return Err(GridloadError::transient("point_store", "request throttled"));
        }

        let mut ack = BatchAck::default();
        let mut stored = self.points.write();
        for point in points {
            if self.is_rejected(point) {
                ack.failed.push(point.point_id());
            } else {
                stored.insert(point.point_id(), point.clone());
                ack.acknowledged += 1;
            }
        }
        Ok(ack)
    }

    async fn write_point(&self, point: &TimeSeriesPoint) -> Result<()> {
        self.ensure_available()?;
        self.point_writes.fetch_add(1, Ordering::SeqCst);

        if self.is_rejected(point) {
            return Err(GridloadError::validation(format!(
                "point {} rejected by store",
                point.point_id()
            )));
        }
        self.insert(point.clone());
        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        self.ensure_available()?;

        let probe = TimeSeriesPoint::new(system::HEALTH_PROBE_MEASUREMENT, Utc::now())
            .with_field("ok", 1i64);
        let id = probe.point_id();
        let mut stored = self.points.write();
        stored.insert(id.clone(), probe);
        match stored.remove(&id) {
            Some(_) => Ok(()),
            None => Err(GridloadError::store_unavailable("probe point was not readable")),
        }
    }

    async fn query(&self, query: &PointQuery) -> Result<Vec<TimeSeriesPoint>> {
        self.ensure_available()?;
        Ok(self
            .points
            .read()
            .values()
            .filter(|p| query.matches(p))
            .cloned()
            .collect())
    }

    async fn delete(&self, query: &PointQuery) -> Result<usize> {
        self.ensure_available()?;
        let mut stored = self.points.write();
        let before = stored.len();
        stored.retain(|_, p| !query.matches(p));
        Ok(before - stored.len())
    }
}
