//! Project identifier normalization.
//!
//! Spreadsheet cells arrive as integers, floats (`12345.0` once a column has
//! blanks in it) or free text. The portal search only matches the
//! 10-character zero-padded form.

use std::collections::HashSet;
use std::fmt;

/// Width of a canonical project identifier.
pub const IDENTIFIER_WIDTH: usize = 10;

/// Raw spreadsheet cell content, as handed over by the input reader.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Int(i64),
    Float(f64),
    Text(String),
    Empty,
}

impl CellValue {
    /// Render the cell the way the source spreadsheets print it: whole floats
    /// keep their `.0` suffix.
    pub fn to_raw_string(&self) -> String {
        match self {
            CellValue::Int(i) => i.to_string(),
            CellValue::Float(f) if f.is_nan() => "nan".to_string(),
            CellValue::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{:.1}", f),
            CellValue::Float(f) => f.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Empty => String::new(),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<i64> for CellValue {
    fn from(i: i64) -> Self {
        CellValue::Int(i)
    }
}

impl From<f64> for CellValue {
    fn from(f: f64) -> Self {
        CellValue::Float(f)
    }
}

/// Canonical, fixed-width project identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ProjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize one cell. Returns `None` for blank cells and the `nan`
/// missing-value sentinel.
pub fn normalize(cell: &CellValue) -> Option<ProjectId> {
    normalize_str(&cell.to_raw_string())
}

/// Normalize already-stringified cell content.
pub fn normalize_str(raw: &str) -> Option<ProjectId> {
    let trimmed = raw.trim();
    let stripped = trimmed.strip_suffix(".0").unwrap_or(trimmed);

    if stripped.is_empty() || stripped.eq_ignore_ascii_case("nan") {
        return None;
    }

    let digits: String = stripped.chars().filter(|c| *c != '.').collect();
    if digits.is_empty() {
        return None;
    }

    Some(ProjectId(format!("{:0>width$}", digits, width = IDENTIFIER_WIDTH)))
}

/// Normalize a whole column, keeping first-appearance order and dropping
/// duplicates of the normalized form.
pub fn normalize_column<'a, I>(cells: I) -> Vec<ProjectId>
where
    I: IntoIterator<Item = &'a CellValue>,
{
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for cell in cells {
        if let Some(id) = normalize(cell) {
            if seen.insert(id.clone()) {
                ids.push(id);
            }
        }
    }
    ids
}
