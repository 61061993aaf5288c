use serde::{Deserialize, Serialize};
use tally_types::CellWrite;

use crate::LedgerError;

/// Plain row-major cell grid shared by the local ledger backends.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    #[serde(default)]
    rows: Vec<Vec<String>>,
}

impl Grid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a grid from literal rows, starting at row 1.
    pub fn from_rows<R, C>(rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
        }
    }

    pub fn cell(&self, row: u32, col: u32) -> Option<&str> {
        let r = self.rows.get(row.checked_sub(1)? as usize)?;
        let value = r.get(col.checked_sub(1)? as usize)?;
        if value.is_empty() {
            None
        } else {
            Some(value.as_str())
        }
    }

    pub fn read_rows(&self, first: u32, last: u32) -> Result<Vec<Vec<String>>, LedgerError> {
        if first == 0 || last < first {
            return Err(LedgerError::new(format!("invalid row range {first}..={last}")));
        }
        Ok((first..=last)
            .map(|row| {
                let mut cells = self
                    .rows
                    .get(row as usize - 1)
                    .cloned()
                    .unwrap_or_default();
                trim_trailing_blanks(&mut cells);
                cells
            })
            .collect())
    }

    pub fn read_column(&self, col: u32) -> Result<Vec<String>, LedgerError> {
        if col == 0 {
            return Err(LedgerError::new("column index must be at least 1"));
        }
        let idx = col as usize - 1;
        let mut cells: Vec<String> = self
            .rows
            .iter()
            .map(|row| row.get(idx).cloned().unwrap_or_default())
            .collect();
        trim_trailing_blanks(&mut cells);
        Ok(cells)
    }

    /// Apply a batch atomically: either every cell is in range or nothing changes.
    pub fn apply(&mut self, cells: &[CellWrite]) -> Result<(), LedgerError> {
        if let Some(bad) = cells.iter().find(|c| c.row == 0 || c.col == 0) {
            return Err(LedgerError::new(format!(
                "cell ({}, {}) is outside the 1-indexed grid",
                bad.row, bad.col
            )));
        }
        for c in cells {
            let (r, k) = (c.row as usize - 1, c.col as usize - 1);
            if self.rows.len() <= r {
                self.rows.resize_with(r + 1, Vec::new);
            }
            let row = &mut self.rows[r];
            if row.len() <= k {
                row.resize(k + 1, String::new());
            }
            row[k] = c.value.to_string();
        }
        Ok(())
    }
}

fn trim_trailing_blanks(cells: &mut Vec<String>) {
    while cells.last().is_some_and(|c| c.trim().is_empty()) {
        cells.pop();
    }
}
