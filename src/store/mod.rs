//! # Target Store
//!
//! The point-write API of the time-series store the pipeline loads into,
//! line-protocol encoding, and an in-process implementation.

pub mod in_memory;
pub mod traits;

use crate::models::TimeSeriesPoint;

pub use in_memory::InMemoryPointStore;
pub use traits::{BatchAck, PointQuery, PointStore};

/// Encode a batch as newline-separated line protocol
pub fn encode_line_protocol(points: &[TimeSeriesPoint]) -> String {
    let mut body = String::with_capacity(points.len() * 96);
    for (i, point) in points.iter().enumerate() {
        if i > 0 {
            body.push('\n');
        }
        body.push_str(&point.to_line_protocol());
    }
    body
}
