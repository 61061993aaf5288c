use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tally_types::{CellValue, CellWrite};

use crate::{Ledger, LedgerError};

pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com/v4";

/// Google Sheets-backed ledger using the v4 values API.
///
/// Authentication is out of scope: the caller supplies an already-issued
/// OAuth bearer token.
pub struct SheetsLedger {
    client: reqwest::Client,
    api_base: String,
    spreadsheet_id: String,
    worksheet: String,
    access_token: String,
}

impl SheetsLedger {
    /// Every request, read or write, is bounded by `timeout`.
    pub fn new(
        api_base: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        worksheet: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::new(format!("sheets client: {e}")))?;
        Ok(Self {
            client,
            api_base: api_base.into(),
            spreadsheet_id: spreadsheet_id.into(),
            worksheet: worksheet.into(),
            access_token: access_token.into(),
        })
    }

    /// A1 range on the configured worksheet, quoted so any tab name works.
    fn range(&self, a1: &str) -> String {
        format!("'{}'!{}", self.worksheet.replace('\'', "''"), a1)
    }

    fn url(&self, tail: &[&str]) -> Result<reqwest::Url, LedgerError> {
        let mut url = reqwest::Url::parse(&self.api_base)
            .map_err(|e| LedgerError::new(format!("sheets api base: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| LedgerError::new("sheets api base cannot take a path"))?
            .pop_if_empty()
            .extend(["spreadsheets", self.spreadsheet_id.as_str()])
            .extend(tail);
        Ok(url)
    }

    async fn get_values(&self, a1: &str, dimension: &str) -> Result<ValueRange, LedgerError> {
        let range = self.range(a1);
        let url = self.url(&["values", range.as_str()])?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&[("majorDimension", dimension)])
            .send()
            .await
            .map_err(|e| LedgerError::new(format!("sheets read error: {e}")))?;
        if !resp.status().is_success() {
            return Err(LedgerError::new(format!(
                "sheets read {range} status: {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| LedgerError::new(format!("sheets parse error: {e}")))
    }
}

#[derive(Deserialize, Debug, Default)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateRequest {
    value_input_option: &'static str,
    data: Vec<RangeWrite>,
}

#[derive(Serialize)]
struct RangeWrite {
    range: String,
    values: Vec<Vec<serde_json::Value>>,
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn cell_json(value: &CellValue) -> serde_json::Value {
    match value {
        CellValue::Text(s) => serde_json::Value::String(s.clone()),
        CellValue::Integer(n) => serde_json::Value::from(*n),
    }
}

/// Spreadsheet column letters for a 1-indexed column (1 -> A, 27 -> AA).
pub fn column_letters(col: u32) -> String {
    let mut n = col;
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[async_trait]
impl Ledger for SheetsLedger {
    async fn read_rows(&self, first: u32, last: u32) -> Result<Vec<Vec<String>>, LedgerError> {
        if first == 0 || last < first {
            return Err(LedgerError::new(format!("invalid row range {first}..={last}")));
        }
        let parsed = self.get_values(&format!("{first}:{last}"), "ROWS").await?;
        let mut rows: Vec<Vec<String>> = parsed
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect();
        // The API omits trailing empty rows.
        rows.resize_with((last - first + 1) as usize, Vec::new);
        Ok(rows)
    }

    async fn read_column(&self, col: u32) -> Result<Vec<String>, LedgerError> {
        if col == 0 {
            return Err(LedgerError::new("column index must be at least 1"));
        }
        let letters = column_letters(col);
        let parsed = self
            .get_values(&format!("{letters}:{letters}"), "COLUMNS")
            .await?;
        Ok(parsed
            .values
            .first()
            .map(|column| column.iter().map(cell_text).collect())
            .unwrap_or_default())
    }

    async fn write_cells(&self, cells: Vec<CellWrite>) -> Result<(), LedgerError> {
        if cells.is_empty() {
            return Ok(());
        }
        let data = cells
            .iter()
            .map(|c| RangeWrite {
                range: self.range(&format!("{}{}", column_letters(c.col), c.row)),
                values: vec![vec![cell_json(&c.value)]],
            })
            .collect();
        let body = BatchUpdateRequest {
            value_input_option: "USER_ENTERED",
            data,
        };

        let url = self.url(&["values:batchUpdate"])?;
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::new(format!("sheets write error: {e}")))?;
        if !resp.status().is_success() {
            return Err(LedgerError::new(format!(
                "sheets write status: {}",
                resp.status()
            )));
        }
        tracing::debug!(cells = cells.len(), "sheets batch update applied");
        Ok(())
    }
}
