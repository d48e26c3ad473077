use crate::error::{GridloadError, Result};
use crate::models::{PointId, TimeRange, TimeSeriesPoint};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Store acknowledgement for one batch write
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchAck {
    /// Points the store accepted
    pub acknowledged: usize,
    /// Identities the store reported as rejected, when it gives per-point detail
    pub failed: Vec<PointId>,
}

impl BatchAck {
    pub fn complete(acknowledged: usize) -> Self {
        Self {
            acknowledged,
            failed: Vec::new(),
        }
    }

    /// A batch succeeds only if every submitted point was acknowledged
    pub fn is_complete(&self, submitted: usize) -> bool {
        self.failed.is_empty() && self.acknowledged == submitted
    }
}

/// Selector over stored points
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointQuery {
    pub measurement: Option<String>,
    pub time_range: Option<TimeRange>,
    /// Every listed tag must match exactly
    pub tags: BTreeMap<String, String>,
}

impl PointQuery {
    pub fn measurement(measurement: impl Into<String>) -> Self {
        Self {
            measurement: Some(measurement.into()),
            ..Self::default()
        }
    }

    pub fn in_range(mut self, time_range: TimeRange) -> Self {
        self.time_range = Some(time_range);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, point: &TimeSeriesPoint) -> bool {
        let measurement_matches = match self.measurement.as_deref() {
            Some(m) => m == point.measurement,
            None => true,
        };
        let time_matches = match self.time_range {
            Some(range) => range.contains(point.timestamp),
            None => true,
        };
        measurement_matches && time_matches && self.tags.iter().all(|(k, v)| point.has_tag(k, v))
    }
}

/// Point write API of the target time-series store
///
/// The store offers no multi-point transactions: a batch can be partially
/// applied, and callers reconcile through the returned [`BatchAck`]. Writing
/// a point whose [`PointId`] already exists overwrites it.
#[async_trait]
pub trait PointStore: Send + Sync {
    /// Write a batch; an `Err` means the call itself failed
    async fn write_batch(&self, points: &[TimeSeriesPoint]) -> Result<BatchAck>;

    /// Lightweight read/write round trip used as a health check
    async fn probe(&self) -> Result<()>;

    async fn query(&self, query: &PointQuery) -> Result<Vec<TimeSeriesPoint>>;

    /// Delete matching points, returning how many were removed
    async fn delete(&self, query: &PointQuery) -> Result<usize>;

    /// Write a single point
    async fn write_point(&self, point: &TimeSeriesPoint) -> Result<()> {
        let ack = self.write_batch(std::slice::from_ref(point)).await?;
        if ack.is_complete(1) {
            Ok(())
        } else {
            Err(GridloadError::transient(
                "point_store",
                format!("point {} not acknowledged", point.point_id()),
            ))
        }
    }

    async fn count(&self, query: &PointQuery) -> Result<usize> {
        Ok(self.query(query).await?.len())
    }
}
