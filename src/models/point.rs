//! # Time-Series Points
//!
//! A [`TimeSeriesPoint`] is one line-protocol observation: a measurement, a
//! tag set identifying the series, a field set holding values, and a
//! timestamp. Tags and fields are kept in ordered maps so that encoding and
//! point identities are deterministic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field value; numbers or strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(_) => None,
        }
    }

    /// Line-protocol field value encoding
    fn encode(&self, out: &mut String) {
        match self {
            Self::Integer(i) => {
                out.push_str(&i.to_string());
                out.push('i');
            }
            Self::Float(f) => out.push_str(&f.to_string()),
            Self::Text(s) => {
                out.push('"');
                for c in s.chars() {
                    if c == '"' || c == '\\' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push('"');
            }
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

/// Stable identity of a point: its series key plus timestamp
///
/// Two points with the same id overwrite each other in the target store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PointId(String);

impl PointId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TimeSeriesPoint {
    pub fn new(measurement: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Series key in line-protocol form (`measurement,tag=value,...`)
    pub fn series_key(&self) -> String {
        let mut out = String::new();
        escape_into(&self.measurement, &[',', ' '], &mut out);
        for (key, value) in &self.tags {
            out.push(',');
            escape_into(key, &[',', '=', ' '], &mut out);
            out.push('=');
            escape_into(value, &[',', '=', ' '], &mut out);
        }
        out
    }

    pub fn timestamp_nanos(&self) -> i64 {
        self.timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.timestamp.timestamp_micros().saturating_mul(1000))
    }

    pub fn point_id(&self) -> PointId {
        PointId(format!("{} {}", self.series_key(), self.timestamp_nanos()))
    }

    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.tags.get(key).is_some_and(|v| v == value)
    }

    /// Encode as a single line-protocol line with nanosecond precision
    pub fn to_line_protocol(&self) -> String {
        let mut out = self.series_key();
        out.push(' ');
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            escape_into(key, &[',', '=', ' '], &mut out);
            out.push('=');
            value.encode(&mut out);
        }
        out.push(' ');
        out.push_str(&self.timestamp_nanos().to_string());
        out
    }
}

fn escape_into(raw: &str, special: &[char], out: &mut String) {
    for c in raw.chars() {
        if special.contains(&c) || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
}
