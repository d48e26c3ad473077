use super::file_descriptor::{DatasetType, FileFormat};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a file gets processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessingPath {
    /// Short-lived in-process executor
    Inline,
    /// Long-running batch compute job
    BatchCompute,
}

impl fmt::Display for ProcessingPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => write!(f, "inline"),
            Self::BatchCompute => write!(f, "batchCompute"),
        }
    }
}

/// Executor selection and resource hints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorConfig {
    pub processor: String,
    pub dataset_type: DatasetType,
    pub timeout_seconds: u64,
    pub memory_mb: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputFile {
    pub bucket: String,
    pub key: String,
    pub size_mb: f64,
    pub format: FileFormat,
}

impl InputFile {
    pub fn location(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

/// Routing decision for one file; immutable once the router produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingDescriptor {
    processing_path: ProcessingPath,
    processor_config: ProcessorConfig,
    output_location: String,
    input_file: InputFile,
}

impl ProcessingDescriptor {
    pub(crate) fn new(
        processing_path: ProcessingPath,
        processor_config: ProcessorConfig,
        output_location: String,
        input_file: InputFile,
    ) -> Self {
        Self {
            processing_path,
            processor_config,
            output_location,
            input_file,
        }
    }

    pub fn processing_path(&self) -> ProcessingPath {
        self.processing_path
    }

    pub fn processor_config(&self) -> &ProcessorConfig {
        &self.processor_config
    }

    pub fn output_location(&self) -> &str {
        &self.output_location
    }

    pub fn input_file(&self) -> &InputFile {
        &self.input_file
    }

    pub fn dataset_type(&self) -> DatasetType {
        self.processor_config.dataset_type
    }
}

/// Request handed to the external processing executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingRequest {
    pub execution_id: String,
    pub input_location: String,
    pub output_location: String,
    pub dataset_type: DatasetType,
    pub processor_config: ProcessorConfig,
}

impl ProcessingRequest {
    pub fn from_descriptor(execution_id: impl Into<String>, descriptor: &ProcessingDescriptor) -> Self {
        Self {
            execution_id: execution_id.into(),
            input_location: descriptor.input_file().location(),
            output_location: descriptor.output_location().to_string(),
            dataset_type: descriptor.dataset_type(),
            processor_config: descriptor.processor_config().clone(),
        }
    }
}

/// Result reported by the processing executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOutcome {
    pub row_count: u64,
    pub output_location: String,
}
