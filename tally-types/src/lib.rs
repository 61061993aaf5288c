use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Offset from an entity's value column to the column holding its delta.
///
/// Value columns sit at even positions, so deltas always land on the odd
/// column to their right and never on the date column.
pub const DELTA_OFFSET: u32 = 1;

/// Counts observed in one row, keyed by the entity's value column.
pub type Observations = BTreeMap<u32, i64>;

/// A monitored subject discovered from the ledger header.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TrackedEntity {
    /// Identity key appended to the source base URL.
    pub key: String,
    pub name: String,
    /// 1-indexed ledger column holding the observed values.
    pub value_col: u32,
}

impl TrackedEntity {
    pub fn new(key: impl Into<String>, name: impl Into<String>, value_col: u32) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            value_col,
        }
    }

    pub fn delta_col(&self) -> u32 {
        self.value_col + DELTA_OFFSET
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("layout field `{0}` must be at least 1")]
    ZeroIndex(&'static str),
    #[error("name_row and key_row must differ (both {0})")]
    SharedHeaderRow(u32),
    #[error("data_start_row {data_start_row} must come after the header rows")]
    DataOverlapsHeader { data_start_row: u32 },
    #[error("entity_stride {0} leaves no room for the delta column")]
    StrideTooSmall(u32),
    #[error("first_entity_col {first_entity_col} must come after date_col {date_col}")]
    EntityBeforeDate { first_entity_col: u32, date_col: u32 },
}

/// Row and column coordinates of the ledger grid (1-indexed).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerLayout {
    pub name_row: u32,
    pub key_row: u32,
    pub date_col: u32,
    pub data_start_row: u32,
    pub first_entity_col: u32,
    pub entity_stride: u32,
}

impl Default for LedgerLayout {
    fn default() -> Self {
        Self {
            name_row: 1,
            key_row: 2,
            date_col: 1,
            data_start_row: 3,
            first_entity_col: 2,
            entity_stride: 2,
        }
    }
}

impl LedgerLayout {
    pub fn validate(&self) -> Result<(), LayoutError> {
        for (field, value) in [
            ("name_row", self.name_row),
            ("key_row", self.key_row),
            ("date_col", self.date_col),
            ("data_start_row", self.data_start_row),
            ("first_entity_col", self.first_entity_col),
        ] {
            if value == 0 {
                return Err(LayoutError::ZeroIndex(field));
            }
        }
        if self.name_row == self.key_row {
            return Err(LayoutError::SharedHeaderRow(self.name_row));
        }
        if self.data_start_row <= self.name_row.max(self.key_row) {
            return Err(LayoutError::DataOverlapsHeader {
                data_start_row: self.data_start_row,
            });
        }
        if self.entity_stride <= DELTA_OFFSET {
            return Err(LayoutError::StrideTooSmall(self.entity_stride));
        }
        if self.first_entity_col <= self.date_col {
            return Err(LayoutError::EntityBeforeDate {
                first_entity_col: self.first_entity_col,
                date_col: self.date_col,
            });
        }
        Ok(())
    }

    /// First and last header row, in grid order.
    pub fn header_span(&self) -> (u32, u32) {
        (
            self.name_row.min(self.key_row),
            self.name_row.max(self.key_row),
        )
    }

    /// Candidate value columns for a header `width` cells wide.
    pub fn entity_columns(&self, width: u32) -> impl Iterator<Item = u32> {
        (self.first_entity_col..=width).step_by(self.entity_stride.max(1) as usize)
    }
}

/// A value to be written into one ledger cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CellValue {
    Text(String),
    Integer(i64),
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s) => f.write_str(s),
            CellValue::Integer(n) => write!(f, "{n}"),
        }
    }
}

/// One entry of a sparse bulk write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellWrite {
    pub row: u32,
    pub col: u32,
    pub value: CellValue,
}

impl CellWrite {
    pub fn text(row: u32, col: u32, value: impl Into<String>) -> Self {
        Self {
            row,
            col,
            value: CellValue::Text(value.into()),
        }
    }

    pub fn integer(row: u32, col: u32, value: i64) -> Self {
        Self {
            row,
            col,
            value: CellValue::Integer(value),
        }
    }
}

/// An entity left out of a run because its fetch never produced a value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchFailure {
    pub key: String,
    pub name: String,
    pub reason: String,
}

/// Cell text at a 1-indexed column of a bulk-read row.
pub fn cell_at(cells: &[String], col: u32) -> &str {
    col.checked_sub(1)
        .and_then(|idx| cells.get(idx as usize))
        .map(|s| s.trim())
        .unwrap_or("")
}

/// Parse a stored count, tolerating thousands separators and integral floats.
///
/// Anything else is treated as absent.
pub fn parse_count(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(n) = cleaned.parse::<i64>() {
        return Some(n);
    }
    let f = cleaned.parse::<f64>().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_count_accepts_stored_forms() {
        assert_eq!(parse_count("12,345"), Some(12345));
        assert_eq!(parse_count(" 150 "), Some(150));
        assert_eq!(parse_count("-20"), Some(-20));
        assert_eq!(parse_count("3200.0"), Some(3200));
    }

    #[test]
    fn parse_count_rejects_malformed_cells() {
        assert_eq!(parse_count(""), None);
        assert_eq!(parse_count("n/a"), None);
        assert_eq!(parse_count("12.5"), None);
        assert_eq!(parse_count("#REF!"), None);
    }

    #[test]
    fn default_layout_is_valid() {
        let layout = LedgerLayout::default();
        assert_eq!(layout.validate(), Ok(()));
        let cols: Vec<u32> = layout.entity_columns(7).collect();
        assert_eq!(cols, vec![2, 4, 6]);
    }

    #[test]
    fn layout_rejects_stride_without_delta_room() {
        let layout = LedgerLayout {
            entity_stride: 1,
            ..LedgerLayout::default()
        };
        assert_eq!(layout.validate(), Err(LayoutError::StrideTooSmall(1)));
    }

    #[test]
    fn layout_rejects_data_inside_header() {
        let layout = LedgerLayout {
            data_start_row: 2,
            ..LedgerLayout::default()
        };
        assert!(matches!(
            layout.validate(),
            Err(LayoutError::DataOverlapsHeader { .. })
        ));
    }

    #[test]
    fn delta_column_sits_right_of_value() {
        let entity = TrackedEntity::new("_abc", "Shop", 4);
        assert_eq!(entity.delta_col(), 5);
    }

    #[test]
    fn cell_at_is_one_indexed_and_total() {
        let row = vec!["2026-01-16".to_string(), " 10 ".to_string()];
        assert_eq!(cell_at(&row, 1), "2026-01-16");
        assert_eq!(cell_at(&row, 2), "10");
        assert_eq!(cell_at(&row, 9), "");
        assert_eq!(cell_at(&row, 0), "");
    }
}
