use crate::record::{Region, ResultRow};
use crate::scan::{QueryOutcome, ScanOutcome};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::ValueEnum;
use csv::Writer;
use rust_xlsxwriter::{Format, Workbook};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Output file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Xlsx,
    Csv,
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Xlsx => "xlsx",
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
        }
    }
}

/// `APR_<region>_<DDMMYYYY>.<ext>`
pub fn output_filename(region: Region, date: NaiveDate, format: OutputFormat) -> String {
    format!("APR_{}_{}.{}", region.label(), date.format("%d%m%Y"), format.extension())
}

/// Write the scan's rows into `output_dir`. Returns `None` without touching
/// the filesystem when there is nothing to write.
pub fn write_results(outcome: &ScanOutcome, output_dir: &Path, format: OutputFormat) -> Result<Option<PathBuf>> {
    if outcome.rows.is_empty() {
        debug!("No active rows; skipping export");
        return Ok(None);
    }

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;
    let path = output_dir.join(output_filename(outcome.region, outcome.started_at.date(), format));
    export_rows(&outcome.rows, outcome.region, &path, format)?;
    Ok(Some(path))
}

pub fn export_rows(rows: &[ResultRow], region: Region, output_path: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Xlsx => export_xlsx(rows, output_path),
        OutputFormat::Csv => export_csv(rows, output_path),
        OutputFormat::Json => export_json(rows, region, output_path),
    }
    .with_context(|| format!("Failed to write {}", output_path.display()))
}

pub fn export_xlsx(rows: &[ResultRow], output_path: &Path) -> Result<()> {
    debug!("Exporting {} rows to XLSX: {}", rows.len(), output_path.display());

    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("APR")?;

    for (col, header) in ResultRow::COLUMNS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *header, &header_format)?;
    }
    for (index, row) in rows.iter().enumerate() {
        let line = index as u32 + 1;
        for (col, value) in row.values().iter().enumerate() {
            worksheet.write_string(line, col as u16, *value)?;
        }
    }

    workbook.save(output_path)?;
    info!("Successfully exported {} rows to XLSX: {}", rows.len(), output_path.display());
    Ok(())
}

pub fn export_csv(rows: &[ResultRow], output_path: &Path) -> Result<()> {
    debug!("Exporting {} rows to CSV: {}", rows.len(), output_path.display());

    let file = File::create(output_path)?;
    let mut wtr = Writer::from_writer(file);
    wtr.write_record(ResultRow::COLUMNS)?;
    for row in rows {
        wtr.write_record(row.values())?;
    }
    wtr.flush()?;

    info!("Successfully exported {} rows to CSV: {}", rows.len(), output_path.display());
    Ok(())
}

pub fn export_json(rows: &[ResultRow], region: Region, output_path: &Path) -> Result<()> {
    debug!("Exporting {} rows to JSON: {}", rows.len(), output_path.display());

    let json_output = JsonExport {
        summary: ExportSummary {
            region: region.label(),
            active_records: rows.len(),
            generated_at: Utc::now().to_rfc3339(),
        },
        records: rows,
    };

    let json_string = serde_json::to_string_pretty(&json_output)?;
    let mut file = File::create(output_path)?;
    file.write_all(json_string.as_bytes())?;

    info!("Successfully exported {} rows to JSON: {}", rows.len(), output_path.display());
    Ok(())
}

#[derive(serde::Serialize)]
struct JsonExport<'a> {
    summary: ExportSummary,
    records: &'a [ResultRow],
}

#[derive(serde::Serialize)]
struct ExportSummary {
    region: &'static str,
    active_records: usize,
    generated_at: String,
}

pub fn print_scan_summary(outcome: &ScanOutcome, output: Option<&Path>) {
    println!("\n=== Scan Summary ===");
    println!("Region: {}", outcome.region);
    println!("Identifiers queried: {}", outcome.queried_count());
    if outcome.resumed > 0 {
        println!("Restored from checkpoint: {}", outcome.resumed);
    }
    println!("Identifiers skipped: {}", outcome.skipped_count());
    println!("Active records: {}", outcome.rows.len());

    let skipped: Vec<_> = outcome
        .reports
        .iter()
        .filter_map(|report| match &report.outcome {
            QueryOutcome::Skipped { reason } => Some((&report.id, reason)),
            QueryOutcome::Matched { .. } => None,
        })
        .collect();
    if !skipped.is_empty() {
        println!("\nSkipped identifiers:");
        for (id, reason) in skipped {
            println!("  {} - {}", id, reason);
        }
    }

    match output {
        Some(path) => println!("\nResults written to: {}", path.display()),
        None => println!("\nNo active records found; no file written."),
    }
    println!("====================\n");
}
