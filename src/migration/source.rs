use crate::error::{GridloadError, Result};
use crate::load::parse_timestamp;
use crate::models::{CanonicalRow, SourceSelector};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One page read through the source cursor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcePage {
    pub records: Vec<CanonicalRow>,
    /// Offset of the next page; `None` once the cursor is exhausted
    pub next_offset: Option<u64>,
}

/// Paginated reader over the source time-series backend
///
/// Records are returned in a stable cursor order so that an offset saved in
/// a checkpoint identifies the same position on a later read.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Best-effort record count used for progress reporting
    async fn estimate_count(&self, selector: &SourceSelector) -> Result<u64>;

    /// Exact record count used by export validation
    async fn count(&self, selector: &SourceSelector) -> Result<u64>;

    async fn read_page(
        &self,
        selector: &SourceSelector,
        offset: u64,
        limit: usize,
    ) -> Result<SourcePage>;
}

/// Source backend held in memory, keyed by database and table
#[derive(Debug)]
pub struct InMemorySource {
    tables: RwLock<HashMap<(String, String), Vec<CanonicalRow>>>,
    timestamp_column: String,
    failing_reads: AtomicUsize,
    /// Fail every read at or after this offset until cleared
    fail_from_offset: Mutex<Option<u64>>,
    read_offsets: Mutex<Vec<u64>>,
}

impl Default for InMemorySource {
    fn default() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            timestamp_column: "timestamp".to_string(),
            failing_reads: AtomicUsize::new(0),
            fail_from_offset: Mutex::new(None),
            read_offsets: Mutex::new(Vec::new()),
        }
    }
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(
        self,
        database: impl Into<String>,
        table: impl Into<String>,
        records: Vec<CanonicalRow>,
    ) -> Self {
        self.insert_table(database, table, records);
        self
    }

    pub fn insert_table(
        &self,
        database: impl Into<String>,
        table: impl Into<String>,
        records: Vec<CanonicalRow>,
    ) {
        self.tables
            .write()
            .insert((database.into(), table.into()), records);
    }

    /// Fail the next `count` page reads with a transient error
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Fail every page read at or beyond `offset`; `None` clears it
    pub fn fail_from_offset(&self, offset: Option<u64>) {
        *self.fail_from_offset.lock() = offset;
    }

    /// Offsets of every page read, in order
    pub fn read_offsets(&self) -> Vec<u64> {
        self.read_offsets.lock().clone()
    }

    fn selected(&self, selector: &SourceSelector) -> Result<Vec<CanonicalRow>> {
        let tables = self.tables.read();
        let records = tables
            .get(&(selector.database.clone(), selector.table.clone()))
            .ok_or_else(|| {
                GridloadError::not_found(
                    "source table",
                    format!("{}.{}", selector.database, selector.table),
                )
            })?;

        Ok(records
            .iter()
            .filter(|row| {
                row.get(&self.timestamp_column)
                    .and_then(parse_timestamp)
                    .is_some_and(|ts| selector.time_range.contains(ts))
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SourceReader for InMemorySource {
    async fn estimate_count(&self, selector: &SourceSelector) -> Result<u64> {
        self.count(selector).await
    }

    async fn count(&self, selector: &SourceSelector) -> Result<u64> {
        Ok(self.selected(selector)?.len() as u64)
    }

    async fn read_page(
        &self,
        selector: &SourceSelector,
        offset: u64,
        limit: usize,
    ) -> Result<SourcePage> {
        self.read_offsets.lock().push(offset);

        let injected = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let past_fault = matches!(*self.fail_from_offset.lock(), Some(from) if offset >= from);
        if injected || past_fault {
            return Err(GridloadError::transient("source_reader", "cursor read timed out"));
        }

        let selected = self.selected(selector)?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(selected.len());
        let end = start.saturating_add(limit.max(1)).min(selected.len());
        let records = selected[start..end].to_vec();
        let next_offset = (end < selected.len()).then_some(end as u64);

        Ok(SourcePage {
            records,
            next_offset,
        })
    }
}
