//! # Export Validation
//!
//! Compares staged export data against the source: record counts within a
//! relative tolerance, then SHA-256 checksums of evenly spaced sample
//! records.

use super::source::SourceReader;
use super::staging::StagingArea;
use crate::error::{GridloadError, Result};
use crate::models::{CanonicalRow, Checkpoint, SourceSelector};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Hex SHA-256 of a record's canonical JSON encoding
///
/// Columns are held in a sorted map, so equal records always hash equally.
pub fn record_checksum(record: &CanonicalRow) -> Result<String> {
    let bytes = serde_json::to_vec(record)?;
    let hash = Sha256::digest(&bytes);
    Ok(format!("{hash:x}"))
}

/// Outcome of comparing staged data with the source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub source_count: u64,
    pub staged_count: u64,
    pub tolerance: f64,
    /// Record positions that were checksummed
    pub sampled_positions: Vec<u64>,
    /// Sampled positions whose checksums differ (or that are missing)
    pub mismatched_positions: Vec<u64>,
}

impl ValidationReport {
    /// Relative count difference, measured against the source count
    pub fn count_deviation(&self) -> f64 {
        let diff = self.source_count.abs_diff(self.staged_count) as f64;
        diff / self.source_count.max(1) as f64
    }

    pub fn counts_within_tolerance(&self) -> bool {
        self.count_deviation() <= self.tolerance
    }

    /// Why validation failed, or `None` when it passed
    pub fn failure_reason(&self) -> Option<String> {
        if !self.counts_within_tolerance() {
            return Some(format!(
                "record count mismatch: source {} vs staged {} (tolerance {})",
                self.source_count, self.staged_count, self.tolerance
            ));
        }
        if !self.mismatched_positions.is_empty() {
            return Some(format!(
                "checksum mismatch at {} of {} sampled records (first at position {})",
                self.mismatched_positions.len(),
                self.sampled_positions.len(),
                self.mismatched_positions[0]
            ));
        }
        None
    }

    pub fn passed(&self) -> bool {
        self.failure_reason().is_none()
    }
}

/// `count` evenly spaced positions in `0..total`
pub fn sample_positions(total: u64, count: usize) -> Vec<u64> {
    let count = (count as u64).min(total);
    (0..count).map(|i| i * total / count).collect()
}

#[derive(Debug, Clone)]
pub struct ExportValidator {
    tolerance: f64,
    sample_size: usize,
}

impl ExportValidator {
    pub fn new(tolerance: f64, sample_size: usize) -> Self {
        Self {
            tolerance: if tolerance.is_nan() { 0.0 } else { tolerance.max(0.0) },
            sample_size,
        }
    }

    pub async fn validate(
        &self,
        selector: &SourceSelector,
        source: &dyn SourceReader,
        staging: &dyn StagingArea,
        checkpoint: &Checkpoint,
    ) -> Result<ValidationReport> {
        let source_count = source.count(selector).await?;
        let positions = sample_positions(
            source_count.min(checkpoint.records_exported),
            self.sample_size,
        );

        // One pass over the staged chunks: count everything, hash the samples
        let mut staged_hashes: BTreeMap<u64, String> = BTreeMap::new();
        let mut staged_count = 0u64;
        for index in 0..checkpoint.chunks_written {
            let records = staging.read_chunk(&checkpoint.job_id, index).await?;
            let chunk_start = staged_count;
            staged_count += records.len() as u64;
            for &position in positions
                .iter()
                .filter(|&&p| p >= chunk_start && p < staged_count)
            {
                let offset = usize::try_from(position - chunk_start).map_err(|_| {
                    GridloadError::Staging(format!("position {position} out of range"))
                })?;
                staged_hashes.insert(position, record_checksum(&records[offset])?);
            }
        }

        let mut mismatched_positions = Vec::new();
        for &position in &positions {
            let page = source.read_page(selector, position, 1).await?;
            let source_hash = match page.records.first() {
                Some(record) => Some(record_checksum(record)?),
                None => None,
            };
            if source_hash.is_none() || source_hash.as_ref() != staged_hashes.get(&position) {
                debug!(job_id = %checkpoint.job_id, position, "Sampled record checksum differs");
                mismatched_positions.push(position);
            }
        }

        let report = ValidationReport {
            source_count,
            staged_count,
            tolerance: self.tolerance,
            sampled_positions: positions,
            mismatched_positions,
        };

        info!(
            job_id = %checkpoint.job_id,
            source_count = report.source_count,
            staged_count = report.staged_count,
            sampled = report.sampled_positions.len(),
            mismatched = report.mismatched_positions.len(),
            passed = report.passed(),
            "🔎 Export validation finished"
        );
        Ok(report)
    }
}
