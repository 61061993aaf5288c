use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tally_types::CellWrite;
use tokio::sync::Mutex;

use crate::{Grid, Ledger, LedgerError};

/// Ledger kept as a JSON grid on local disk.
///
/// Every call re-reads the file, so edits made between runs are picked up.
/// Writes go to a sibling temp file first and are renamed into place.
pub struct FileLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileLedger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Grid, LedgerError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(Grid::new()),
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                LedgerError::new(format!("parse {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Grid::new()),
            Err(e) => Err(LedgerError::new(format!("read {}: {e}", self.path.display()))),
        }
    }

    async fn store(&self, grid: &Grid) -> Result<(), LedgerError> {
        let body = serde_json::to_string_pretty(grid)
            .map_err(|e| LedgerError::new(format!("encode ledger: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| LedgerError::new(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| LedgerError::new(format!("replace {}: {e}", self.path.display())))
    }
}

#[async_trait]
impl Ledger for FileLedger {
    async fn read_rows(&self, first: u32, last: u32) -> Result<Vec<Vec<String>>, LedgerError> {
        let _guard = self.lock.lock().await;
        self.load().await?.read_rows(first, last)
    }

    async fn read_column(&self, col: u32) -> Result<Vec<String>, LedgerError> {
        let _guard = self.lock.lock().await;
        self.load().await?.read_column(col)
    }

    async fn write_cells(&self, cells: Vec<CellWrite>) -> Result<(), LedgerError> {
        let _guard = self.lock.lock().await;
        let mut grid = self.load().await?;
        grid.apply(&cells)?;
        self.store(&grid).await?;
        tracing::debug!(path = %self.path.display(), cells = cells.len(), "ledger file updated");
        Ok(())
    }
}
