use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;

use super::AnalysisError;
use crate::models::Entry;

const CSV_HEADERS: [&str; 9] = [
    "id", "date", "timestamp", "category", "mood", "metrics", "note", "raw_input", "created_at",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = AnalysisError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(AnalysisError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Write `entries` to `path`. Returns the number of entries written.
pub fn export_entries(
    entries: &[Entry],
    format: ExportFormat,
    path: &Path,
) -> Result<usize, AnalysisError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| AnalysisError::io(path, e))?;
    }
    let file = File::create(path).map_err(|e| AnalysisError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    match format {
        ExportFormat::Csv => write_csv(entries, &mut writer)?,
        ExportFormat::Json => write_json(entries, &mut writer)?,
    }
    writer.flush().map_err(|e| AnalysisError::io(path, e))?;

    tracing::info!(rows = entries.len(), path = %path.display(), ?format, "Entries exported");
    Ok(entries.len())
}

pub fn write_csv<W: Write>(entries: &[Entry], writer: W) -> Result<(), AnalysisError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer
        .write_record(CSV_HEADERS)
        .map_err(|e| AnalysisError::Export(e.to_string()))?;

    for entry in entries {
        let metrics = serde_json::to_string(&entry.metrics)
            .map_err(|e| AnalysisError::Serialization(e.to_string()))?;
        csv_writer
            .write_record([
                entry.id.to_string(),
                entry.date.to_string(),
                entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                entry.category.to_string(),
                entry.mood.to_string(),
                metrics,
                escape_csv_cell(entry.note.as_deref().unwrap_or("")),
                escape_csv_cell(&entry.raw_input),
                entry.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ])
            .map_err(|e| AnalysisError::Export(e.to_string()))?;
    }

    csv_writer
        .flush()
        .map_err(|e| AnalysisError::Export(e.to_string()))
}

pub fn write_json<W: Write>(entries: &[Entry], writer: W) -> Result<(), AnalysisError> {
    serde_json::to_writer_pretty(writer, entries)
        .map_err(|e| AnalysisError::Serialization(e.to_string()))
}

/// User-typed text could start a spreadsheet formula.
fn escape_csv_cell(value: &str) -> String {
    match value.chars().next() {
        Some('=' | '+' | '-' | '@') => format!("'{value}"),
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::time_series::tests::entry;
    use crate::models::{Category, Mood};

    fn sample() -> Vec<Entry> {
        let mut first = entry("2024-03-04", Category::Exercise, Mood::Positive, &[("distance_km", 5.0)]);
        first.id = 1;
        first.raw_input = "ran 5km, felt great".into();
        let mut second = entry("2024-03-05", Category::Diet, Mood::Neutral, &[]);
        second.id = 2;
        second.raw_input = "=cmd|' /C calc'!A0".into();
        second.note = Some("with friends".into());
        vec![first, second]
    }

    #[test]
    fn csv_has_header_and_one_row_per_entry() {
        let mut buffer = Vec::new();
        write_csv(&sample(), &mut buffer).unwrap();

        let mut reader = csv::Reader::from_reader(buffer.as_slice());
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), CSV_HEADERS.to_vec());

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][3], "exercise");
        assert_eq!(&rows[0][5], r#"{"distance_km":5.0}"#);
        assert_eq!(&rows[0][7], "ran 5km, felt great");
        assert_eq!(&rows[1][6], "with friends");
    }

    #[test]
    fn csv_escapes_formula_prefixed_text() {
        let mut buffer = Vec::new();
        write_csv(&sample(), &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("'=cmd"));
    }

    #[test]
    fn json_export_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("entries.json");

        let written = export_entries(&sample(), ExportFormat::Json, &path).unwrap();
        assert_eq!(written, 2);

        let back: Vec<Entry> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn csv_export_to_file_counts_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entries.csv");
        assert_eq!(export_entries(&sample(), ExportFormat::Csv, &path).unwrap(), 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[test]
    fn parses_format_names() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!(" json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("xlsx".parse::<ExportFormat>().is_err());
    }
}
