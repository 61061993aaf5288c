use async_trait::async_trait;
use tally_types::CellWrite;
use thiserror::Error;

mod grid;
pub use grid::Grid;

pub mod mem;
pub use mem::InMemoryLedger;

pub mod file;
pub use file::FileLedger;

pub mod sheets;
pub use sheets::{column_letters, SheetsLedger, DEFAULT_API_BASE};

#[derive(Debug, Error)]
#[error("ledger error: {message}")]
pub struct LedgerError {
    pub message: String,
}

impl LedgerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The observation ledger: a rate-limited grid addressed by 1-indexed (row, column).
///
/// Every method is a single round trip against the backing store. Callers are
/// expected to batch: one read for the header, one for the date column, one for
/// the previous row and one write per phase.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Bulk-read rows `first..=last`. Always returns `last - first + 1` rows;
    /// rows may be shorter than the grid (trailing blanks are dropped).
    async fn read_rows(&self, first: u32, last: u32) -> Result<Vec<Vec<String>>, LedgerError>;

    /// Bulk-read one column. Index 0 holds row 1; trailing blanks are dropped.
    async fn read_column(&self, col: u32) -> Result<Vec<String>, LedgerError>;

    /// Write a sparse set of cells in one request.
    async fn write_cells(&self, cells: Vec<CellWrite>) -> Result<(), LedgerError>;

    async fn read_row(&self, row: u32) -> Result<Vec<String>, LedgerError> {
        let mut rows = self.read_rows(row, row).await?;
        Ok(rows.pop().unwrap_or_default())
    }
}
