use super::batch_writer::{BatchResult, BatchWriter};
use super::manifest::{FailureManifest, LoadReport, RejectedRow};
use super::mapping::MappingTable;
use crate::config::LoadConfig;
use crate::constants::system;
use crate::error::{GridloadError, Result};
use crate::models::{CanonicalRow, DatasetType, TimeSeriesPoint};
use crate::store::PointStore;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rows handed to the load stage for one execution
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub execution_id: String,
    pub dataset_type: DatasetType,
    pub rows: Vec<CanonicalRow>,
    /// Tags stamped on every point, e.g. the source file for provenance
    pub extra_tags: BTreeMap<String, String>,
}

impl LoadRequest {
    pub fn new(
        execution_id: impl Into<String>,
        dataset_type: DatasetType,
        rows: Vec<CanonicalRow>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            dataset_type,
            rows,
            extra_tags: BTreeMap::new(),
        }
    }

    pub fn with_source_file(self, key: impl Into<String>) -> Self {
        self.with_tag(system::DEFAULT_SOURCE_FILE_TAG, key)
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_tags.insert(key.into(), value.into());
        self
    }
}

/// Rows converted to points, plus the ones that could not be
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvertedRows {
    pub points: Vec<TimeSeriesPoint>,
    pub rejected: Vec<RejectedRow>,
}

/// Converts canonical rows to points and batch-writes them to the target store
///
/// Batches are written through a bounded pool of `concurrency` in-flight
/// writes; results are reconciled in batch order before the report is
/// returned.
#[derive(Debug, Clone)]
pub struct LoadStage {
    writer: BatchWriter,
    mappings: MappingTable,
    config: LoadConfig,
}

impl LoadStage {
    pub fn new(store: Arc<dyn PointStore>, config: LoadConfig) -> Self {
        Self {
            writer: BatchWriter::new(store, config.batch_retry.clone()),
            mappings: MappingTable::default(),
            config,
        }
    }

    pub fn with_mappings(mut self, mappings: MappingTable) -> Self {
        self.mappings = mappings;
        self
    }

    pub fn writer(&self) -> &BatchWriter {
        &self.writer
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }

    fn concurrency(&self) -> usize {
        self.config.concurrency.clamp(1, system::MAX_LOAD_CONCURRENCY)
    }

    /// Read/write probe against the target store
    pub async fn health_check(&self) -> Result<()> {
        self.writer.store().probe().await.map_err(|error| {
            warn!(error = %error, "🚫 Target store health check failed");
            match error {
                GridloadError::StoreUnavailable { .. } => error,
                other => GridloadError::store_unavailable(other.to_string()),
            }
        })
    }

    /// Convert rows with the dataset mapping; `row_offset` numbers rejected
    /// rows relative to a larger input
    pub fn convert_rows(
        &self,
        rows: &[CanonicalRow],
        dataset_type: DatasetType,
        extra_tags: &BTreeMap<String, String>,
        row_offset: usize,
    ) -> ConvertedRows {
        let mapping = self.mappings.mapping_for(dataset_type);
        let mut converted = ConvertedRows {
            points: Vec::with_capacity(rows.len()),
            rejected: Vec::new(),
        };
        for (i, row) in rows.iter().enumerate() {
            match mapping.convert_row(row, dataset_type, extra_tags) {
                Ok(point) => converted.points.push(point),
                Err(reason) => converted.rejected.push(RejectedRow {
                    row_index: row_offset + i,
                    reason,
                }),
            }
        }
        converted
    }

    pub async fn run(&self, request: LoadRequest) -> Result<LoadReport> {
        if self.config.health_check_enabled {
            self.health_check().await?;
        }

        let converted = self.convert_rows(
            &request.rows,
            request.dataset_type,
            &request.extra_tags,
            0,
        );
        if !converted.rejected.is_empty() {
            warn!(
                execution_id = %request.execution_id,
                rejected = converted.rejected.len(),
                "⚠️ Rows rejected during conversion"
            );
        }

        let batch_size = self.batch_size();
        let writes = converted
            .points
            .chunks(batch_size)
            .enumerate()
            .map(|(index, batch)| self.writer.write_batch(index, batch))
            .collect::<Vec<_>>();
        let results: Vec<BatchResult> = stream::iter(writes)
            .buffered(self.concurrency())
            .collect()
            .await;

        let mut report = LoadReport {
            rows_received: request.rows.len(),
            points_submitted: converted.points.len(),
            manifest: FailureManifest {
                failed_points: Vec::new(),
                rejected_rows: converted.rejected,
            },
            ..LoadReport::default()
        };
        for result in results {
            report.batches += 1;
            report.points_written += result.written;
            if result.used_fallback {
                report.fallback_batches += 1;
            }
            report.manifest.failed_points.extend(result.failed);
        }

        debug!(
            execution_id = %request.execution_id,
            balanced = report.is_balanced(),
            "Load accounting reconciled"
        );
        info!(
            execution_id = %request.execution_id,
            dataset_type = %request.dataset_type,
            rows = report.rows_received,
            points_written = report.points_written,
            batches = report.batches,
            failed_points = report.manifest.failed_points.len(),
            rejected_rows = report.manifest.rejected_rows.len(),
            "📥 Load stage finished"
        );
        Ok(report)
    }
}
