use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("date column has an empty cell at row {empty_row} before filled row {filled_row}")]
    Gap { empty_row: u32, filled_row: u32 },
}

/// Where the next run writes, and which row it compares against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cursor {
    pub next_row: u32,
    pub previous_row: Option<u32>,
}

impl Cursor {
    /// Locate the first empty data row from the bulk-read date column.
    ///
    /// `dates[0]` is grid row 1. Rows above `data_start_row` are header and ignored.
    pub fn from_column(dates: &[String], data_start_row: u32) -> Result<Self, CursorError> {
        let skip = data_start_row.saturating_sub(1) as usize;
        let data = dates.get(skip..).unwrap_or(&[]);

        let filled = data
            .iter()
            .rposition(|cell| !cell.trim().is_empty())
            .map(|i| i as u32);
        let Some(last) = filled else {
            return Ok(Self {
                next_row: data_start_row,
                previous_row: None,
            });
        };

        if let Some(hole) = data[..last as usize]
            .iter()
            .position(|cell| cell.trim().is_empty())
        {
            return Err(CursorError::Gap {
                empty_row: data_start_row + hole as u32,
                filled_row: data_start_row + last,
            });
        }

        let previous = data_start_row + last;
        Ok(Self {
            next_row: previous + 1,
            previous_row: Some(previous),
        })
    }
}
