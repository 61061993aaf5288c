use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tally_types::CellWrite;
use tokio::sync::Mutex;

use crate::{Grid, Ledger, LedgerError};

/// In-memory ledger.
///
/// Counts round trips and keeps every write batch so tests can check the
/// request budget of a run.
///
/// NOTE: not durable.
pub struct InMemoryLedger {
    grid: Mutex<Grid>,
    reads: AtomicUsize,
    write_log: Mutex<Vec<Vec<CellWrite>>>,
    fail_writes: bool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::with_grid(Grid::new())
    }

    pub fn with_grid(grid: Grid) -> Self {
        Self {
            grid: Mutex::new(grid),
            reads: AtomicUsize::new(0),
            write_log: Mutex::new(Vec::new()),
            fail_writes: false,
        }
    }

    /// A ledger that rejects every write; reads still succeed.
    pub fn read_only(grid: Grid) -> Self {
        Self {
            fail_writes: true,
            ..Self::with_grid(grid)
        }
    }

    pub async fn cell(&self, row: u32, col: u32) -> Option<String> {
        self.grid.lock().await.cell(row, col).map(str::to_string)
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Write batches in arrival order (best-effort debug hook).
    pub async fn write_batches(&self) -> Vec<Vec<CellWrite>> {
        self.write_log.lock().await.clone()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn read_rows(&self, first: u32, last: u32) -> Result<Vec<Vec<String>>, LedgerError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.grid.lock().await.read_rows(first, last)
    }

    async fn read_column(&self, col: u32) -> Result<Vec<String>, LedgerError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.grid.lock().await.read_column(col)
    }

    async fn write_cells(&self, cells: Vec<CellWrite>) -> Result<(), LedgerError> {
        if self.fail_writes {
            return Err(LedgerError::new("ledger is read-only"));
        }
        self.grid.lock().await.apply(&cells)?;
        self.write_log.lock().await.push(cells);
        Ok(())
    }
}
