//! Row store: single-table-style persistence keyed by an auto-assigned id.
//!
//! [`RowStore`] is the contract the record manager consumes. [`LogStore`] is
//! the durable implementation; other media plug in through
//! [`StoreProvider`].

mod log;
mod table;

pub use log::{LogStore, LogStoreProvider};
pub use table::{ColumnDef, Order, Row, RowId, Table, TableSchema, Tables, Values};

use crate::error::Result;
use std::path::Path;

/// Outcome of a compaction run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub entries_before: u64,
    pub entries_after: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// An opened row store.
pub trait RowStore: Send {
    /// Create a table if it does not exist yet.
    ///
    /// Returns `true` if the table was created, `false` if an identical one
    /// already existed.
    fn create_table(&mut self, schema: &TableSchema) -> Result<bool>;

    /// Select the given columns of every row.
    fn query(&self, table: &str, columns: &[&str], order: Order) -> Result<Vec<Row>>;

    /// Insert a row, returning the id the store assigned.
    fn insert(&mut self, table: &str, values: Values) -> Result<RowId>;

    /// Overwrite columns of the row with `id`. Returns the affected row count.
    fn update(&mut self, table: &str, values: Values, id: RowId) -> Result<usize>;

    /// Remove the row with `id`. Returns the affected row count.
    fn delete(&mut self, table: &str, id: RowId) -> Result<usize>;

    /// Drop obsolete history from the medium.
    fn compact(&mut self) -> Result<CompactionStats>;

    /// Flush pending writes to the medium.
    fn sync(&mut self) -> Result<()>;

    /// Release the handle.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Opens row stores at a resolved location.
pub trait StoreProvider: Send + Sync {
    fn open(&self, location: &Path) -> Result<Box<dyn RowStore>>;
}
