use chrono::{Duration, NaiveDate, NaiveDateTime};

/// Days an APR stays valid after its creation date.
pub const VALIDITY_DAYS: i64 = 45;

/// Display format used by the portal and the output spreadsheet.
pub const DATE_FORMAT: &str = "%d/%m/%Y";

/// End of the validity window for a portal `createdAt` value
/// (`DD/MM/YYYY` optionally followed by a time). `None` when the date is
/// missing or not a real calendar date.
pub fn compute_validity(created_at: &str) -> Option<NaiveDate> {
    let date_part = created_at.split_whitespace().next()?;

    // chrono's %Y accepts any width; the portal always prints four digits.
    let year = date_part.rsplit('/').next()?;
    if year.len() != 4 {
        return None;
    }

    let created = NaiveDate::parse_from_str(date_part, DATE_FORMAT).ok()?;
    created.checked_add_signed(Duration::days(VALIDITY_DAYS))
}

/// A window is still open while `now` is strictly before the end date's midnight.
pub fn is_active(validity_end: NaiveDate, now: NaiveDateTime) -> bool {
    validity_end
        .and_hms_opt(0, 0, 0)
        .map_or(false, |end| now < end)
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}
