//! Proptest strategies for routing and loading inputs

use super::fixtures::MB;
use proptest::prelude::*;

pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "csv", "tsv", "xlsx", "xls", "json", "parquet", "xml", "pdf", "docx",
];

pub const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "docx"];

/// A supported extension in random letter case
pub fn supported_extension_strategy() -> impl Strategy<Value = String> {
    (prop::sample::select(SUPPORTED_EXTENSIONS), any::<u16>()).prop_map(|(ext, mask)| {
        ext.chars()
            .enumerate()
            .map(|(i, c)| {
                if mask & (1 << (i % 16)) != 0 {
                    c.to_ascii_uppercase()
                } else {
                    c
                }
            })
            .collect()
    })
}

/// Tabular (non-document) extensions only
pub fn tabular_extension_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(
        SUPPORTED_EXTENSIONS
            .iter()
            .copied()
            .filter(|ext| !DOCUMENT_EXTENSIONS.contains(ext))
            .collect::<Vec<_>>(),
    )
}

/// Extensions the router must reject
pub fn unsupported_extension_strategy() -> impl Strategy<Value = String> {
    "[a-z]{2,5}".prop_filter("must not be a supported extension", |ext| {
        !SUPPORTED_EXTENSIONS.contains(&ext.as_str())
    })
}

/// Slash-separated key path without an extension
pub fn key_path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z0-9_]{1,12}", 1..4).prop_map(|parts| parts.join("/"))
}

/// Sizes clustered around the default 100 MB inline threshold
pub fn file_size_strategy() -> impl Strategy<Value = u64> {
    prop_oneof![
        0u64..(10 * MB),
        (99 * MB)..(101 * MB),
        (100 * MB - 2)..(100 * MB + 2),
        (101 * MB)..(2048 * MB),
    ]
}

/// Row and batch size pairs for batch accounting
pub fn batching_strategy() -> impl Strategy<Value = (usize, usize)> {
    (0usize..600, 1usize..150)
}
