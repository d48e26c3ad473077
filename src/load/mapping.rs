//! # Dataset Mapping Table
//!
//! Decides, per dataset type, which canonical columns become tags and which
//! become fields, and converts rows into [`TimeSeriesPoint`]s.

use crate::constants::system;
use crate::models::{CanonicalRow, DatasetType, FieldValue, TimeSeriesPoint};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Epoch values above this are taken to be milliseconds
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMapping {
    pub measurement: String,
    pub timestamp_column: String,
    pub tag_columns: Vec<String>,
    /// Explicit field columns; when unset every non-tag, non-timestamp column
    /// becomes a field
    #[serde(default)]
    pub field_columns: Option<Vec<String>>,
}

impl DatasetMapping {
    pub fn new(measurement: impl Into<String>, tag_columns: &[&str]) -> Self {
        Self {
            measurement: measurement.into(),
            timestamp_column: "timestamp".to_string(),
            tag_columns: tag_columns.iter().map(|c| c.to_string()).collect(),
            field_columns: None,
        }
    }

    pub fn with_timestamp_column(mut self, column: impl Into<String>) -> Self {
        self.timestamp_column = column.into();
        self
    }

    pub fn with_field_columns(mut self, columns: &[&str]) -> Self {
        self.field_columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    fn is_field_column(&self, column: &str) -> bool {
        match &self.field_columns {
            Some(fields) => fields.iter().any(|f| f == column),
            None => column != self.timestamp_column && !self.tag_columns.iter().any(|t| t == column),
        }
    }

    /// Convert one row, returning the rejection reason on failure
    pub fn convert_row(
        &self,
        row: &CanonicalRow,
        dataset_type: DatasetType,
        extra_tags: &BTreeMap<String, String>,
    ) -> Result<TimeSeriesPoint, String> {
        let raw_timestamp = row
            .get(&self.timestamp_column)
            .ok_or_else(|| format!("missing timestamp column '{}'", self.timestamp_column))?;
        let timestamp = parse_timestamp(raw_timestamp)
            .ok_or_else(|| format!("unparseable timestamp {raw_timestamp}"))?;

        let mut point = TimeSeriesPoint::new(&self.measurement, timestamp)
            .with_tag(system::DATASET_TYPE_TAG, dataset_type.as_str());

        for column in &self.tag_columns {
            if let Some(tag) = row.get(column).and_then(tag_value) {
                point.tags.insert(column.clone(), tag);
            }
        }
        for (key, value) in extra_tags {
            point.tags.insert(key.clone(), value.clone());
        }

        for (column, value) in row.columns() {
            if !self.is_field_column(column) {
                continue;
            }
            if let Some(field) = field_value(value) {
                point.fields.insert(column.clone(), field);
            }
        }

        if point.fields.is_empty() {
            return Err("row has no field values".to_string());
        }
        Ok(point)
    }
}

/// Mapping per dataset type; unknown types fall back to `general`
#[derive(Debug, Clone, PartialEq)]
pub struct MappingTable {
    mappings: HashMap<DatasetType, DatasetMapping>,
    general: DatasetMapping,
}

impl Default for MappingTable {
    fn default() -> Self {
        let mut mappings = HashMap::new();
        mappings.insert(
            DatasetType::Generation,
            DatasetMapping::new(
                "energy_generation",
                &["plant_id", "plant_name", "fuel_type", "region", "state"],
            ),
        );
        mappings.insert(
            DatasetType::Consumption,
            DatasetMapping::new(
                "energy_consumption",
                &["region", "sector", "customer_class", "state"],
            ),
        );
        mappings.insert(
            DatasetType::Transmission,
            DatasetMapping::new(
                "energy_transmission",
                &["line_id", "from_node", "to_node", "voltage_class", "region"],
            ),
        );
        Self {
            mappings,
            general: DatasetMapping::new("energy_data", &["region", "source"]),
        }
    }
}

impl MappingTable {
    pub fn with_mapping(mut self, dataset_type: DatasetType, mapping: DatasetMapping) -> Self {
        match dataset_type {
            DatasetType::General => self.general = mapping,
            other => {
                self.mappings.insert(other, mapping);
            }
        }
        self
    }

    pub fn mapping_for(&self, dataset_type: DatasetType) -> &DatasetMapping {
        self.mappings.get(&dataset_type).unwrap_or(&self.general)
    }
}

fn tag_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn field_value(value: &Value) -> Option<FieldValue> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(FieldValue::Integer(i)),
            None => n.as_f64().map(FieldValue::Float),
        },
        Value::Bool(b) => Some(FieldValue::Integer(i64::from(*b))),
        Value::String(s) if !s.is_empty() => Some(match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() => FieldValue::Float(f),
            _ => FieldValue::Text(s.clone()),
        }),
        _ => None,
    }
}

/// Parse a timestamp cell
///
/// Accepts RFC 3339, `%Y-%m-%d %H:%M:%S`, `%Y-%m-%dT%H:%M:%S`, `%Y-%m-%d`
/// (all naive forms read as UTC), and numeric epoch seconds or milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|d| Utc.from_utc_datetime(&d));
    }
    s.parse::<f64>().ok().and_then(from_epoch)
}

fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    let millis = if value.abs() >= EPOCH_MILLIS_THRESHOLD {
        value
    } else {
        value * 1000.0
    };
    Utc.timestamp_millis_opt(millis as i64).single()
}
