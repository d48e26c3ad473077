//! # Object Events and File Descriptors
//!
//! Object-created notifications arrive in several envelope shapes. They are
//! normalized once at ingress into [`ObjectCreatedEvent`]s so that routing and
//! orchestration only ever see one canonical input type.

use crate::error::{GridloadError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical object-created event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectCreatedEvent {
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, alias = "etag")]
    pub e_tag: Option<String>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    /// Optional content-type hint from the uploader
    #[serde(default)]
    pub content_type: Option<String>,
}

impl ObjectCreatedEvent {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, size: u64) -> Self {
        Self {
            bucket: Some(bucket.into()),
            key: Some(key.into()),
            size: Some(size),
            e_tag: None,
            time: Some(Utc::now()),
            content_type: None,
        }
    }

    pub fn with_e_tag(mut self, e_tag: impl Into<String>) -> Self {
        self.e_tag = Some(e_tag.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Identity used for redelivery deduplication, if bucket and key are present
    pub fn identity(&self) -> Option<FileIdentity> {
        match (non_empty(&self.bucket), non_empty(&self.key)) {
            (Some(bucket), Some(key)) => Some(FileIdentity {
                bucket: bucket.to_string(),
                key: key.to_string(),
                e_tag: self.e_tag.clone().unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// Storage notification record (`Records[].s3`)
#[derive(Debug, Clone, Deserialize)]
pub struct StorageRecord {
    #[serde(rename = "eventTime", default)]
    pub event_time: Option<DateTime<Utc>>,
    pub s3: StorageEntity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageEntity {
    pub bucket: BucketRef,
    pub object: ObjectRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BucketRef {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectRef {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, alias = "etag")]
    #[serde(rename = "eTag")]
    pub e_tag: Option<String>,
}

/// Event-bus envelope detail
#[derive(Debug, Clone, Deserialize)]
pub struct BusDetail {
    pub bucket: BucketRef,
    pub object: ObjectRef,
}

/// Every envelope shape accepted at ingress
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EventEnvelope {
    StorageNotification {
        #[serde(rename = "Records")]
        records: Vec<StorageRecord>,
    },
    EventBus {
        #[serde(rename = "detail-type")]
        detail_type: String,
        #[serde(default)]
        time: Option<DateTime<Utc>>,
        detail: BusDetail,
    },
    Direct(ObjectCreatedEvent),
}

impl EventEnvelope {
    /// Parse an envelope from raw JSON
    pub fn from_json(raw: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(raw.clone())
            .map_err(|e| GridloadError::missing_file_info(format!("unrecognized envelope: {e}")))
    }

    /// Normalize the envelope into canonical object events
    pub fn into_object_events(self) -> Result<Vec<ObjectCreatedEvent>> {
        let events: Vec<ObjectCreatedEvent> = match self {
            Self::StorageNotification { records } => records
                .into_iter()
                .map(|record| ObjectCreatedEvent {
                    bucket: record.s3.bucket.name,
                    key: record.s3.object.key.map(|k| decode_key(&k)),
                    size: record.s3.object.size,
                    e_tag: record.s3.object.e_tag,
                    time: record.event_time,
                    content_type: None,
                })
                .collect(),
            Self::EventBus { time, detail, .. } => vec![ObjectCreatedEvent {
                bucket: detail.bucket.name,
                key: detail.object.key.map(|k| decode_key(&k)),
                size: detail.object.size,
                e_tag: detail.object.e_tag,
                time,
                content_type: None,
            }],
            Self::Direct(event) => vec![event],
        };

        if events.is_empty() {
            return Err(GridloadError::missing_file_info("records"));
        }
        Ok(events)
    }
}

/// Object keys arrive form-encoded in storage notifications
fn decode_key(key: &str) -> String {
    let bytes = key.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match decoded {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8(out).unwrap_or_else(|_| key.to_string())
}

/// Identity of an uploaded object version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    pub bucket: String,
    pub key: String,
    pub e_tag: String,
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.bucket, self.key, self.e_tag)
    }
}

/// Recognized input formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    Tsv,
    Xlsx,
    Xls,
    Json,
    Parquet,
    Xml,
    Pdf,
    Docx,
}

/// Processor families; unstructured documents need heavier tooling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatFamily {
    Delimited,
    Spreadsheet,
    Structured,
    UnstructuredDocument,
}

impl FileFormat {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "tsv" => Some(Self::Tsv),
            "xlsx" => Some(Self::Xlsx),
            "xls" => Some(Self::Xls),
            "json" => Some(Self::Json),
            "parquet" => Some(Self::Parquet),
            "xml" => Some(Self::Xml),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    pub fn family(&self) -> FormatFamily {
        match self {
            Self::Csv | Self::Tsv => FormatFamily::Delimited,
            Self::Xlsx | Self::Xls => FormatFamily::Spreadsheet,
            Self::Json | Self::Parquet | Self::Xml => FormatFamily::Structured,
            Self::Pdf | Self::Docx => FormatFamily::UnstructuredDocument,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Xlsx => "xlsx",
            Self::Xls => "xls",
            Self::Json => "json",
            Self::Parquet => "parquet",
            Self::Xml => "xml",
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Energy dataset category inferred from the object key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetType {
    Generation,
    Consumption,
    Transmission,
    General,
}

impl DatasetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Consumption => "consumption",
            Self::Transmission => "transmission",
            Self::General => "general",
        }
    }
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classified description of one uploaded object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub bucket: String,
    pub key: String,
    pub size_bytes: u64,
    pub e_tag: String,
    pub detected_type: FileFormat,
    pub dataset_type: DatasetType,
}

impl FileDescriptor {
    pub fn identity(&self) -> FileIdentity {
        FileIdentity {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            e_tag: self.e_tag.clone(),
        }
    }
}
