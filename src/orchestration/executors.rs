//! # Collaborator Contracts
//!
//! The workflow orchestrator drives external executors it does not own:
//! the format-specific processing executor, a reader for the canonical rows
//! it produces, and the downstream indexer. Each is a narrow async trait so
//! deployments can plug in real services and tests can plug in doubles.

use crate::error::Result;
use crate::models::{
    CanonicalRow, DatasetType, ProcessingOutcome, ProcessingPath, ProcessingRequest,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Format-specific converter from a raw file to canonical rows
#[async_trait]
pub trait ProcessingExecutor: Send + Sync {
    /// Run the converter for `request` on the given path
    ///
    /// Errors should already be classified; free-text collaborator failures
    /// can be mapped with `StandardErrorClassifier::classify_message`.
    async fn process(
        &self,
        path: ProcessingPath,
        request: &ProcessingRequest,
    ) -> Result<ProcessingOutcome>;
}

/// Reads the canonical rows a processing executor wrote
#[async_trait]
pub trait RowReader: Send + Sync {
    async fn read_rows(&self, output_location: &str) -> Result<Vec<CanonicalRow>>;
}

/// Request handed to the downstream indexer once points are loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRequest {
    pub execution_id: String,
    pub dataset_type: DatasetType,
    pub output_location: String,
    pub source_key: String,
    pub points_written: usize,
}

#[async_trait]
pub trait IndexExecutor: Send + Sync {
    async fn index(&self, request: &IndexRequest) -> Result<()>;
}

/// Indexer for deployments without a search layer
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopIndexExecutor;

#[async_trait]
impl IndexExecutor for NoopIndexExecutor {
    async fn index(&self, request: &IndexRequest) -> Result<()> {
        debug!(
            execution_id = %request.execution_id,
            points = request.points_written,
            "Index stage skipped (no indexer configured)"
        );
        Ok(())
    }
}
