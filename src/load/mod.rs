//! # Load Stage
//!
//! Turns canonical rows into time-series points through a per-dataset mapping
//! table and writes them to the target store in batches.
//!
//! The write contract: a batch succeeds only when every point is
//! acknowledged. Failed batches are retried as a whole, then salvaged with
//! per-point writes. Points that still fail, and rows that never converted,
//! are reported in a [`FailureManifest`] so that
//! `points_written + failed_points == points_submitted` always holds.

pub mod batch_writer;
pub mod load_stage;
pub mod manifest;
pub mod mapping;

pub use batch_writer::{BatchResult, BatchWriter};
pub use load_stage::{ConvertedRows, LoadRequest, LoadStage};
pub use manifest::{FailedPoint, FailureManifest, LoadReport, RejectedRow};
pub use mapping::{parse_timestamp, DatasetMapping, MappingTable};
