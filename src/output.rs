//! Rendering and persistence of search results and ingest statistics.
//!
//! Supports plain-text rows, JSON serialization, and CSV append.

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::feed::IngestStats;
use crate::search::{LineResult, SearchOutcome, SearchReport};
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// The rider-facing headline, e.g. `0.123 – 3 min`.
pub fn format_row(row: &LineResult) -> String {
    format!("{} – {} min", row.line, row.minutes)
}

/// Secondary line with the numbers behind the headline.
pub fn format_details(row: &LineResult) -> String {
    let mut parts = Vec::new();
    match row.stops_remaining {
        Some(0) => parts.push("at your stop".to_string()),
        Some(1) => parts.push("1 stop away".to_string()),
        Some(n) => parts.push(format!("{n} stops away")),
        None => {}
    }
    parts.push(format!("{:.0} m", row.distance_m));
    parts.push(format!("{} confidence", row.confidence));
    if let Some(stop) = row.target_stop.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("stop: {stop}"));
    }
    if !row.upcoming.is_empty() {
        parts.push(format!("next: {}", row.upcoming.join(", ")));
    }
    parts.join(" · ")
}

pub fn format_outcome(outcome: &SearchOutcome) -> String {
    match outcome {
        SearchOutcome::NotReady(reason) => format!("Data is still loading ({reason}). Try again shortly."),
        SearchOutcome::NoResults => "No buses found near you right now.".to_string(),
        SearchOutcome::Found(report) => {
            let mut lines = Vec::with_capacity(report.rows.len() * 2 + 1);
            for row in &report.rows {
                lines.push(format_row(row));
                lines.push(format!("  {}", format_details(row)));
            }
            if report.suppressed_lines > 0 {
                lines.push(format!("+{} more lines", report.suppressed_lines));
            }
            lines.join("\n")
        }
    }
}

pub fn print_pretty(outcome: &SearchOutcome) {
    debug!("{:#?}", outcome);
    println!("{}", format_outcome(outcome));
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One CSV line per result row.
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    generated_at: String,
    traffic_period: String,
    traffic_factor: f64,
    line: &'a str,
    device_id: &'a str,
    distance_m: f64,
    stops_remaining: Option<u32>,
    stop_count_method: Option<&'static str>,
    confidence: String,
    minutes: u32,
    target_stop_id: Option<&'a str>,
    target_stop: Option<&'a str>,
    upcoming: String,
}

impl<'a> CsvRow<'a> {
    fn new(report: &SearchReport, row: &'a LineResult) -> Self {
        CsvRow {
            generated_at: report.generated_at.to_rfc3339(),
            traffic_period: report.traffic.period.to_string(),
            traffic_factor: report.traffic.factor,
            line: &row.line,
            device_id: &row.device_id,
            distance_m: (row.distance_m * 10.0).round() / 10.0,
            stops_remaining: row.stops_remaining,
            stop_count_method: row.stop_count_method.map(|m| m.describe()),
            confidence: row.confidence.to_string(),
            minutes: row.minutes,
            target_stop_id: row.target_stop_id.as_deref(),
            target_stop: row.target_stop.as_deref(),
            upcoming: row.upcoming.join(" "),
        }
    }
}

fn open_append(path: &str) -> Result<csv::Writer<std::fs::File>> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending CSV records");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    Ok(WriterBuilder::new()
        .has_headers(!file_exists) // header only on a fresh file
        .from_writer(file))
}

/// Appends every row of `report`. Creates the file with headers if needed.
pub fn append_rows(path: &str, report: &SearchReport) -> Result<usize> {
    let mut writer = open_append(path)?;
    for row in &report.rows {
        writer.serialize(CsvRow::new(report, row))?;
    }
    writer.flush()?;
    Ok(report.rows.len())
}

/// Appends an [`IngestStats`] record as a row to a CSV file.
pub fn append_stats(path: &str, stats: &IngestStats) -> Result<()> {
    let mut writer = open_append(path)?;
    writer.serialize(stats)?;
    writer.flush()?;
    Ok(())
}
