//! Project identifier input.
//!
//! Reads the first worksheet of a spreadsheet (or a CSV file), finds the
//! header containing the marker text and returns that column's cells.
//!
//! Supports:
//! - `.xlsx`, `.xlsm`, `.xls`, `.ods` through calamine
//! - `.csv` with `,` or `;` delimiters

use calamine::{open_workbook_auto, Data, Reader};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::identifier::{normalize_column, CellValue, ProjectId};

#[derive(Error, Debug)]
pub enum InputError {
    #[error("Input file not found: {0}")]
    NotFound(PathBuf),

    #[error("Unsupported input file type: {0}. Expected .xlsx, .xlsm, .xls, .ods or .csv")]
    UnsupportedFormat(PathBuf),

    #[error("Failed to read spreadsheet {path}: {reason}")]
    Spreadsheet { path: PathBuf, reason: String },

    #[error("Spreadsheet {0} has no worksheets")]
    NoWorksheet(PathBuf),

    #[error("No column header containing '{marker}' found in {path}")]
    MissingColumn { marker: String, path: PathBuf },

    #[error("Failed to read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to read input file: {0}")]
    Io(#[from] std::io::Error),
}

/// Input format for identifier files
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputFormat {
    Spreadsheet,
    Csv,
}

impl InputFormat {
    /// Detect format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()).as_deref() {
            Some("xlsx" | "xlsm" | "xls" | "xlsb" | "ods") => Some(Self::Spreadsheet),
            Some("csv") => Some(Self::Csv),
            _ => None,
        }
    }
}

/// The marker column as read from the file.
#[derive(Debug, Clone, PartialEq)]
pub struct InputColumn {
    /// Header text as it appears in the file
    pub header: String,
    /// Cells below the header, in file order
    pub cells: Vec<CellValue>,
}

impl InputColumn {
    /// Normalized identifiers, first appearance order, duplicates removed.
    pub fn identifiers(&self) -> Vec<ProjectId> {
        normalize_column(&self.cells)
    }
}

/// Read the column whose header contains `marker` (case-insensitive).
pub fn read_identifier_column(path: &Path, marker: &str) -> Result<InputColumn, InputError> {
    if !path.exists() {
        return Err(InputError::NotFound(path.to_path_buf()));
    }
    let format = InputFormat::from_path(path).ok_or_else(|| InputError::UnsupportedFormat(path.to_path_buf()))?;

    let column = match format {
        InputFormat::Spreadsheet => read_spreadsheet(path, marker)?,
        InputFormat::Csv => read_csv(path, marker)?,
    };
    debug!(
        "Read {} cells from column '{}' of {}",
        column.cells.len(),
        column.header,
        path.display()
    );
    Ok(column)
}

/// Read and normalize the identifier column in one step.
pub fn load_identifiers(path: &Path, marker: &str) -> Result<Vec<ProjectId>, InputError> {
    Ok(read_identifier_column(path, marker)?.identifiers())
}

fn header_matches(header: &str, marker: &str) -> bool {
    header.to_uppercase().contains(&marker.to_uppercase())
}

fn read_spreadsheet(path: &Path, marker: &str) -> Result<InputColumn, InputError> {
    let spreadsheet_error = |reason: String| InputError::Spreadsheet {
        path: path.to_path_buf(),
        reason,
    };

    let mut workbook = open_workbook_auto(path).map_err(|e| spreadsheet_error(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| InputError::NoWorksheet(path.to_path_buf()))?
        .map_err(|e| spreadsheet_error(e.to_string()))?;

    let mut rows = range.rows();
    let header_row = rows.next().ok_or_else(|| InputError::MissingColumn {
        marker: marker.to_string(),
        path: path.to_path_buf(),
    })?;

    let (index, header) = header_row
        .iter()
        .enumerate()
        .map(|(i, cell)| (i, cell.to_string()))
        .find(|(_, text)| header_matches(text, marker))
        .ok_or_else(|| InputError::MissingColumn {
            marker: marker.to_string(),
            path: path.to_path_buf(),
        })?;

    let cells = rows
        .map(|row| row.get(index).map(cell_value).unwrap_or(CellValue::Empty))
        .collect();

    Ok(InputColumn { header, cells })
}

fn cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Int(i) => CellValue::Int(*i),
        Data::Float(f) => CellValue::Float(*f),
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Empty | Data::Error(_) => CellValue::Empty,
        other => CellValue::Text(other.to_string()),
    }
}

fn read_csv(path: &Path, marker: &str) -> Result<InputColumn, InputError> {
    let content = fs::read(path)?;
    parse_csv_column(&content, marker).ok_or_else(|| InputError::MissingColumn {
        marker: marker.to_string(),
        path: path.to_path_buf(),
    })
}

/// Parse CSV bytes. `None` when no header contains the marker.
///
/// Spreadsheets exported with a comma decimal separator use `;` between
/// fields, so the delimiter is picked from the header line. Excel writes
/// CSV in the system code page rather than UTF-8; identifiers are ASCII,
/// so every field is decoded lossily instead of rejecting the file.
pub fn parse_csv_column(content: &[u8], marker: &str) -> Option<InputColumn> {
    let first_line = content.split(|&b| b == b'\n').next().unwrap_or_default();
    let delimiter = if first_line.contains(&b';') && !first_line.contains(&b',') {
        b';'
    } else {
        b','
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(content);

    let headers = reader.byte_headers().ok()?.clone();
    let (index, header) = headers
        .iter()
        .map(String::from_utf8_lossy)
        .enumerate()
        .find(|(_, h)| header_matches(h, marker))
        .map(|(i, h)| (i, h.into_owned()))?;

    let cells = reader
        .byte_records()
        .filter_map(|record| record.ok())
        .map(|record| {
            let text = record.get(index).map(String::from_utf8_lossy).unwrap_or_default();
            match text.trim() {
                "" => CellValue::Empty,
                trimmed => CellValue::Text(trimmed.to_string()),
            }
        })
        .collect();

    Some(InputColumn { header, cells })
}
