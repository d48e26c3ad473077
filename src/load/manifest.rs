use crate::models::PointId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point that was never acknowledged, even after per-point fallback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedPoint {
    pub point_id: PointId,
    pub measurement: String,
    pub timestamp: DateTime<Utc>,
    pub batch_index: usize,
    pub error: String,
}

/// Input row that could not be converted into a point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedRow {
    pub row_index: usize,
    pub reason: String,
}

/// Everything that did not make it into the store, for reconciliation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureManifest {
    pub failed_points: Vec<FailedPoint>,
    pub rejected_rows: Vec<RejectedRow>,
}

impl FailureManifest {
    pub fn is_empty(&self) -> bool {
        self.failed_points.is_empty() && self.rejected_rows.is_empty()
    }

    pub fn failed_point_ids(&self) -> Vec<&PointId> {
        self.failed_points.iter().map(|p| &p.point_id).collect()
    }

    pub fn merge(&mut self, other: FailureManifest) {
        self.failed_points.extend(other.failed_points);
        self.rejected_rows.extend(other.rejected_rows);
    }
}

/// Accounting for one load run
///
/// `points_written + manifest.failed_points.len() == points_submitted`
/// holds for every report the load stage produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub rows_received: usize,
    pub points_submitted: usize,
    pub points_written: usize,
    pub batches: usize,
    /// Batches that needed per-point fallback
    pub fallback_batches: usize,
    pub manifest: FailureManifest,
}

impl LoadReport {
    pub fn is_partial(&self) -> bool {
        !self.manifest.is_empty()
    }

    pub fn is_balanced(&self) -> bool {
        self.points_written + self.manifest.failed_points.len() == self.points_submitted
    }
}
