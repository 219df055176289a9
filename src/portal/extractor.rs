//! Reads the rendered result grid.
//!
//! Grid rows are non-semantic `div`s; each cell carries a `data-field`
//! attribute, so cells are looked up by field name instead of by position.

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::{DriverError, Locator, Portal, PortalSession};
use crate::record::PortalRecord;

/// `data-field` names read from every row.
pub const ROW_FIELDS: [&str; 5] = ["createdAt", "id", "orderNumber", "companyName", "statusName"];

/// Returns a JSON object keyed by field name; absent cells map to `null`.
pub const ROW_SCRIPT: &str = r#"function() {
    const fields = ["createdAt", "id", "orderNumber", "companyName", "statusName"];
    const out = {};
    for (const field of fields) {
        const cell = this.querySelector('[data-field="' + field + '"]');
        out[field] = cell ? cell.innerText : null;
    }
    return JSON.stringify(out);
}"#;

/// A row that could not be turned into a record. Skipped, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("row {row}: missing field '{field}'")]
    MissingField { row: usize, field: &'static str },

    #[error("row {row}: unreadable cell data ({reason})")]
    Malformed { row: usize, reason: String },
}

#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(rename = "createdAt")]
    created_at: Option<String>,
    id: Option<String>,
    #[serde(rename = "orderNumber")]
    order_number: Option<String>,
    #[serde(rename = "companyName")]
    company_name: Option<String>,
    #[serde(rename = "statusName")]
    status_name: Option<String>,
}

/// Read every row currently rendered on the page.
pub fn extract_page<S: PortalSession>(portal: &Portal<S>) -> Result<Vec<Result<PortalRecord, RowError>>, DriverError> {
    let rows = Locator::css(&portal.selectors().result_row_css);
    let raw = portal.run_script(&rows, ROW_SCRIPT)?;
    debug!("Result grid has {} rendered rows", raw.len());

    Ok(raw
        .iter()
        .enumerate()
        .map(|(index, json)| parse_row(index, json))
        .collect())
}

/// Turn one row's script output into a record.
pub fn parse_row(row: usize, json: &str) -> Result<PortalRecord, RowError> {
    let raw: RawRow = serde_json::from_str(json).map_err(|e| RowError::Malformed {
        row,
        reason: e.to_string(),
    })?;

    let take = |value: Option<String>, field: &'static str| -> Result<String, RowError> {
        value
            .map(|v| v.trim().to_string())
            .ok_or(RowError::MissingField { row, field })
    };

    Ok(PortalRecord {
        created_at: take(raw.created_at, "createdAt")?,
        // The grid renders ids with thousands separators.
        record_id: take(raw.id, "id")?.replace('.', ""),
        order_number: take(raw.order_number, "orderNumber")?,
        company_name: take(raw.company_name, "companyName")?,
        status_name: take(raw.status_name, "statusName")?,
    })
}
