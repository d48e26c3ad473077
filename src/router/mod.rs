//! # Router
//!
//! Classifies an uploaded object and picks its processing path.
//!
//! The router is pure: it holds only configuration, performs no I/O, and the
//! same event always yields the same [`ProcessingDescriptor`].
//!
//! ## Rules
//!
//! - Format comes from the key's extension (case-insensitive). Unknown
//!   extensions are rejected with `UnsupportedFormat`. A key without any
//!   extension falls back to the content-type hint.
//! - Files at or above the inline threshold take the batch-compute path.
//! - Unstructured documents (pdf, docx) always take the batch-compute path.
//! - Dataset type is a best-effort keyword match over the key; no match
//!   means `general`.

use crate::config::RouterConfig;
use crate::constants::{dataset_keywords, system};
use crate::error::{GridloadError, Result};
use crate::models::{
    DatasetType, FileDescriptor, FileFormat, FormatFamily, InputFile, ObjectCreatedEvent,
    ProcessingDescriptor, ProcessingPath, ProcessorConfig,
};
use tracing::debug;

/// Classified file plus its routing decision
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedFile {
    pub file: FileDescriptor,
    pub descriptor: ProcessingDescriptor,
}

#[derive(Debug, Clone, Default)]
pub struct Router {
    config: RouterConfig,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Classify an object-created event into a file descriptor
    pub fn describe(&self, event: &ObjectCreatedEvent) -> Result<FileDescriptor> {
        let bucket = required(&event.bucket, "bucket")?;
        let key = required(&event.key, "key")?;
        let size_bytes = event
            .size
            .ok_or_else(|| GridloadError::missing_file_info("size"))?;

        let detected_type = detect_format(key, event.content_type.as_deref())?;

        Ok(FileDescriptor {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size_bytes,
            e_tag: event.e_tag.clone().unwrap_or_default(),
            detected_type,
            dataset_type: infer_dataset_type(key),
        })
    }

    /// Route an event: classify it and build the processing descriptor
    pub fn route(&self, event: &ObjectCreatedEvent) -> Result<RoutedFile> {
        let file = self.describe(event)?;
        let descriptor = self.descriptor_for(&file);

        debug!(
            bucket = %file.bucket,
            key = %file.key,
            format = %file.detected_type,
            dataset_type = %file.dataset_type,
            path = %descriptor.processing_path(),
            "🧭 Routed object"
        );

        Ok(RoutedFile { file, descriptor })
    }

    /// Build the processing descriptor for an already classified file
    pub fn descriptor_for(&self, file: &FileDescriptor) -> ProcessingDescriptor {
        let processing_path = self.select_path(file.detected_type, file.size_bytes);

        let (timeout_seconds, memory_mb) = match processing_path {
            ProcessingPath::Inline => (
                self.config.inline_timeout_seconds,
                self.config.inline_memory_mb,
            ),
            ProcessingPath::BatchCompute => (
                self.config.batch_timeout_seconds,
                self.config.batch_memory_mb,
            ),
        };

        let processor_config = ProcessorConfig {
            processor: format!("{}-processor", file.detected_type),
            dataset_type: file.dataset_type,
            timeout_seconds,
            memory_mb,
        };

        let input_file = InputFile {
            bucket: file.bucket.clone(),
            key: file.key.clone(),
            size_mb: file.size_bytes as f64 / system::BYTES_PER_MB as f64,
            format: file.detected_type,
        };

        ProcessingDescriptor::new(
            processing_path,
            processor_config,
            self.output_location(file),
            input_file,
        )
    }

    /// Pick inline or batch compute for a format and size
    pub fn select_path(&self, format: FileFormat, size_bytes: u64) -> ProcessingPath {
        if format.family() == FormatFamily::UnstructuredDocument {
            return ProcessingPath::BatchCompute;
        }

        let threshold_bytes = self
            .config
            .inline_threshold_mb
            .saturating_mul(system::BYTES_PER_MB);
        if size_bytes >= threshold_bytes {
            ProcessingPath::BatchCompute
        } else {
            ProcessingPath::Inline
        }
    }

    fn output_location(&self, file: &FileDescriptor) -> String {
        let bucket = self
            .config
            .output_bucket
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or(&file.bucket);
        let prefix = self.config.output_prefix.trim_matches('/');

        format!(
            "s3://{bucket}/{prefix}/{}/{}/",
            file.dataset_type,
            key_stem(&file.key)
        )
    }
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GridloadError::missing_file_info(field))
}

fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

fn key_stem(key: &str) -> &str {
    let name = file_name(key);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// Detect the file format from the key, falling back to the content-type hint
pub fn detect_format(key: &str, content_type: Option<&str>) -> Result<FileFormat> {
    let name = file_name(key);
    match name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => FileFormat::from_extension(extension)
            .ok_or_else(|| GridloadError::UnsupportedFormat {
                key: key.to_string(),
                extension: extension.to_string(),
            }),
        _ => content_type
            .and_then(format_from_content_type)
            .ok_or_else(|| GridloadError::UnsupportedFormat {
                key: key.to_string(),
                extension: String::new(),
            }),
    }
}

fn format_from_content_type(content_type: &str) -> Option<FileFormat> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "text/csv" => Some(FileFormat::Csv),
        "text/tab-separated-values" => Some(FileFormat::Tsv),
        "application/json" => Some(FileFormat::Json),
        "application/xml" | "text/xml" => Some(FileFormat::Xml),
        "application/pdf" => Some(FileFormat::Pdf),
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
            Some(FileFormat::Xlsx)
        }
        "application/vnd.ms-excel" => Some(FileFormat::Xls),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
            Some(FileFormat::Docx)
        }
        "application/vnd.apache.parquet" => Some(FileFormat::Parquet),
        _ => None,
    }
}

/// Best-effort dataset type from keywords in the key path
pub fn infer_dataset_type(key: &str) -> DatasetType {
    let lowered = key.to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

    if matches(dataset_keywords::GENERATION) {
        DatasetType::Generation
    } else if matches(dataset_keywords::CONSUMPTION) {
        DatasetType::Consumption
    } else if matches(dataset_keywords::TRANSMISSION) {
        DatasetType::Transmission
    } else {
        DatasetType::General
    }
}
