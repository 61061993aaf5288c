use std::collections::HashMap;

use tally_types::{cell_at, CellWrite, LedgerLayout, TrackedEntity};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("no tracked entities found in header row {key_row}")]
    NoEntities { key_row: u32 },
    #[error("column {col} names `{name}` but has no identity key in row {key_row}")]
    MissingKey { col: u32, name: String, key_row: u32 },
    #[error("column {col}: identity key `{key}` must not contain whitespace, '/', '?' or '#'")]
    InvalidKey { col: u32, key: String },
    #[error("identity key `{key}` appears in both column {first} and column {second}")]
    DuplicateKey { key: String, first: u32, second: u32 },
}

/// Turn the bulk-read header rows into the tracked entity list.
///
/// `rows` starts at the first header row of `layout`. Columns that are blank in
/// both header rows are skipped; anything half-filled or ambiguous is rejected.
pub fn parse_header(
    rows: &[Vec<String>],
    layout: &LedgerLayout,
) -> Result<Vec<TrackedEntity>, HeaderError> {
    let (first_row, _) = layout.header_span();
    let empty = Vec::new();
    let row = |n: u32| rows.get((n - first_row) as usize).unwrap_or(&empty);
    let names = row(layout.name_row);
    let keys = row(layout.key_row);
    let width = names.len().max(keys.len()) as u32;

    let mut entities = Vec::new();
    let mut seen: HashMap<String, u32> = HashMap::new();
    for col in layout.entity_columns(width) {
        let key = cell_at(keys, col);
        let name = cell_at(names, col);
        if key.is_empty() {
            if name.is_empty() {
                continue;
            }
            return Err(HeaderError::MissingKey {
                col,
                name: name.to_string(),
                key_row: layout.key_row,
            });
        }
        if key
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#'))
        {
            return Err(HeaderError::InvalidKey {
                col,
                key: key.to_string(),
            });
        }
        if let Some(&first) = seen.get(key) {
            return Err(HeaderError::DuplicateKey {
                key: key.to_string(),
                first,
                second: col,
            });
        }
        seen.insert(key.to_string(), col);

        let display = if name.is_empty() { key } else { name };
        entities.push(TrackedEntity::new(key, display, col));
    }

    if entities.is_empty() {
        return Err(HeaderError::NoEntities {
            key_row: layout.key_row,
        });
    }
    Ok(entities)
}

/// Header cells for a fresh ledger: `(key, name)` pairs laid out left to right
/// from the first entity column, plus a label over the date column.
pub fn header_writes(layout: &LedgerLayout, entities: &[(String, String)]) -> Vec<CellWrite> {
    let mut cells = vec![CellWrite::text(layout.name_row, layout.date_col, "date")];
    let mut col = layout.first_entity_col;
    for (key, name) in entities {
        cells.push(CellWrite::text(layout.name_row, col, name.as_str()));
        cells.push(CellWrite::text(layout.key_row, col, key.as_str()));
        col += layout.entity_stride;
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(names: &[&str], keys: &[&str]) -> Vec<Vec<String>> {
        vec![
            names.iter().map(|s| s.to_string()).collect(),
            keys.iter().map(|s| s.to_string()).collect(),
        ]
    }

    #[test]
    fn reads_even_columns_only() {
        let header = rows(
            &["date", "Alpha", "Δ", "Beta", "Δ", ""],
            &["", "_alpha", "", "_beta", "", ""],
        );
        let entities = parse_header(&header, &LedgerLayout::default()).unwrap();
        assert_eq!(
            entities,
            vec![
                TrackedEntity::new("_alpha", "Alpha", 2),
                TrackedEntity::new("_beta", "Beta", 4),
            ]
        );
    }

    #[test]
    fn blank_gaps_between_entities_are_skipped() {
        let header = rows(&["", "Alpha", "", "", "", "Gamma"], &["", "_a", "", "", "", "_g"]);
        let entities = parse_header(&header, &LedgerLayout::default()).unwrap();
        let cols: Vec<u32> = entities.iter().map(|e| e.value_col).collect();
        assert_eq!(cols, vec![2, 6]);
    }

    #[test]
    fn key_without_name_uses_key() {
        let header = rows(&[], &["", "_solo"]);
        let entities = parse_header(&header, &LedgerLayout::default()).unwrap();
        assert_eq!(entities[0].name, "_solo");
    }

    #[test]
    fn name_without_key_is_rejected() {
        let header = rows(&["", "Alpha", "", "Beta"], &["", "_a"]);
        assert_eq!(
            parse_header(&header, &LedgerLayout::default()),
            Err(HeaderError::MissingKey {
                col: 4,
                name: "Beta".into(),
                key_row: 2
            })
        );
    }

    #[test]
    fn duplicate_and_invalid_keys_are_rejected() {
        let dup = rows(&["", "A", "", "B"], &["", "_a", "", "_a"]);
        assert!(matches!(
            parse_header(&dup, &LedgerLayout::default()),
            Err(HeaderError::DuplicateKey { first: 2, second: 4, .. })
        ));

        for bad in ["_a b", "_a/b", "_a?x=1", "_a#top"] {
            let header = rows(&["", "A"], &["", bad]);
            assert!(
                matches!(
                    parse_header(&header, &LedgerLayout::default()),
                    Err(HeaderError::InvalidKey { col: 2, .. })
                ),
                "{bad}"
            );
        }
    }

    #[test]
    fn empty_header_has_no_entities() {
        assert_eq!(
            parse_header(&[], &LedgerLayout::default()),
            Err(HeaderError::NoEntities { key_row: 2 })
        );
    }

    #[test]
    fn swapped_header_rows_follow_layout() {
        let layout = LedgerLayout {
            name_row: 2,
            key_row: 1,
            ..LedgerLayout::default()
        };
        // rows[0] is grid row 1 (keys), rows[1] is grid row 2 (names)
        let header = rows(&["", "_a"], &["", "Alpha"]);
        let entities = parse_header(&header, &layout).unwrap();
        assert_eq!(entities, vec![TrackedEntity::new("_a", "Alpha", 2)]);
    }

    #[test]
    fn written_header_parses_back() {
        let layout = LedgerLayout::default();
        let writes = header_writes(
            &layout,
            &[("_a".into(), "Alpha".into()), ("_b".into(), "Beta".into())],
        );
        let mut header = vec![Vec::new(), Vec::new()];
        for w in writes {
            let row: &mut Vec<String> = &mut header[(w.row - 1) as usize];
            if row.len() < w.col as usize {
                row.resize(w.col as usize, String::new());
            }
            row[(w.col - 1) as usize] = w.value.to_string();
        }
        assert_eq!(header[0][0], "date");
        assert_eq!(
            parse_header(&header, &layout).unwrap(),
            vec![
                TrackedEntity::new("_a", "Alpha", 2),
                TrackedEntity::new("_b", "Beta", 4),
            ]
        );
    }
}
