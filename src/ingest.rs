//! CSV ingestion and export
//!
//! Reads a header-first CSV into a [`Frame`]. The header decides the layout:
//! one timestamp column, an optional batch/tank column, optional `strain` /
//! `style` metadata, and every other column as a numeric channel. Channel
//! names are kept as written; run [`SchemaMapper`](crate::preprocessing::SchemaMapper)
//! afterwards to map telemetry names to canonical channels.
//!
//! Timestamps accept RFC 3339, `%Y-%m-%d %H:%M:%S` (UTC), and Unix epoch
//! seconds or milliseconds. Empty, `nan`, `null` and `-` cells are missing.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::preprocessing::schema::GROUP_COLUMNS;
use crate::types::{Frame, Reading};

/// Header names accepted for the timestamp column (case-insensitive)
pub const TIMESTAMP_COLUMNS: [&str; 4] = ["timestamp", "timestamp_index", "datetime", "time"];

/// Epoch values above this are taken as milliseconds
const EPOCH_MILLIS_CUTOFF: i64 = 10_000_000_000;

/// Only the first few row errors are logged individually
const MAX_LOGGED_ERRORS: usize = 10;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("empty file: {0}")]
    Empty(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("header has no timestamp column (expected one of: {})", TIMESTAMP_COLUMNS.join(", "))]
    NoTimestampColumn,

    #[error("no valid rows in {source_name}: {errors} errors")]
    NoRows { source_name: String, errors: usize },
}

// ============================================================================
// CSV Quote-Aware Parsing
// ============================================================================

/// Split a CSV line, honouring quoted fields and `""` escapes
pub fn csv_split(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

fn csv_quote(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

// ============================================================================
// Column Layout
// ============================================================================

/// Column positions resolved from the header row
#[derive(Debug, Clone, PartialEq)]
pub struct CsvLayout {
    pub timestamp: usize,
    pub group: Option<usize>,
    pub strain: Option<usize>,
    pub style: Option<usize>,
    /// (column index, channel name)
    pub channels: Vec<(usize, String)>,
}

impl CsvLayout {
    pub fn from_header(header: &str) -> Result<Self, IngestError> {
        let columns: Vec<String> = csv_split(header.trim_start_matches('\u{feff}'))
            .into_iter()
            .map(|c| c.trim().to_string())
            .collect();
        let find = |names: &[&str]| {
            names
                .iter()
                .find_map(|n| columns.iter().position(|c| c.eq_ignore_ascii_case(n)))
        };

        let timestamp = find(&TIMESTAMP_COLUMNS).ok_or(IngestError::NoTimestampColumn)?;
        let group = find(&GROUP_COLUMNS);
        let strain = find(&["strain"]);
        let style = find(&["style"]);

        let reserved = [Some(timestamp), group, strain, style];
        let channels = columns
            .iter()
            .enumerate()
            .filter(|(i, name)| !name.is_empty() && !reserved.contains(&Some(*i)))
            .map(|(i, name)| (i, name.clone()))
            .collect();

        Ok(Self {
            timestamp,
            group,
            strain,
            style,
            channels,
        })
    }
}

/// Parse a timestamp in any of the accepted formats
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim().trim_matches('"');
    if is_missing(s) {
        return None;
    }
    if let Ok(epoch) = s.parse::<i64>() {
        return if epoch > EPOCH_MILLIS_CUTOFF {
            DateTime::from_timestamp_millis(epoch)
        } else {
            DateTime::from_timestamp(epoch, 0)
        };
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn is_missing(s: &str) -> bool {
    s.is_empty() || s.eq_ignore_ascii_case("nan") || s.eq_ignore_ascii_case("null") || s == "-"
}

/// Numeric cell; missing markers and unparsable text give `None`
fn get_f64(fields: &[String], idx: usize) -> Option<f64> {
    let s = fields.get(idx)?.trim();
    if is_missing(s) {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn get_text(fields: &[String], idx: Option<usize>) -> Option<String> {
    let s = fields.get(idx?)?.trim();
    (!is_missing(s)).then(|| s.to_string())
}

fn parse_row(fields: &[String], layout: &CsvLayout) -> Result<Reading, String> {
    let raw_ts = fields.get(layout.timestamp).map(String::as_str).unwrap_or("");
    let timestamp = parse_timestamp(raw_ts).ok_or_else(|| format!("unparsable timestamp '{raw_ts}'"))?;

    let mut reading = Reading::new(timestamp);
    reading.group = get_text(fields, layout.group);
    reading.strain = get_text(fields, layout.strain);
    reading.style = get_text(fields, layout.style);
    for (idx, name) in &layout.channels {
        reading.set_value(name, get_f64(fields, *idx));
    }
    Ok(reading)
}

// ============================================================================
// Reading / Writing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestSummary {
    pub source: String,
    pub rows: usize,
    pub error_rows: usize,
    pub channels: Vec<String>,
    pub groups: usize,
}

/// Parse CSV text from any reader; `source` names it in logs and errors
pub fn parse_csv(reader: impl BufRead, source: &str) -> Result<(Frame, IngestSummary), IngestError> {
    let mut lines = reader.lines();
    let header = lines.next().ok_or_else(|| IngestError::Empty(source.to_string()))??;
    let layout = CsvLayout::from_header(&header)?;

    let mut frame = Frame::default();
    let mut errors = 0usize;
    for (n, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_row(&csv_split(&line), &layout) {
            Ok(reading) => frame.push(reading),
            Err(e) => {
                if errors < MAX_LOGGED_ERRORS {
                    warn!(source, line = n + 2, error = %e, "Skipping CSV row");
                }
                errors += 1;
            }
        }
    }

    if frame.is_empty() {
        return Err(IngestError::NoRows {
            source_name: source.to_string(),
            errors,
        });
    }

    let summary = IngestSummary {
        source: source.to_string(),
        rows: frame.len(),
        error_rows: errors,
        channels: layout.channels.iter().map(|(_, name)| name.clone()).collect(),
        groups: frame.group_indices().len(),
    };
    info!(
        source,
        rows = summary.rows,
        errors = summary.error_rows,
        channels = summary.channels.len(),
        groups = summary.groups,
        "CSV loaded"
    );
    Ok((frame, summary))
}

pub fn read_csv(path: impl AsRef<Path>) -> Result<(Frame, IngestSummary), IngestError> {
    let path = path.as_ref();
    let path_str = path.display().to_string();
    let file = File::open(path).map_err(|source| IngestError::Open {
        path: path_str.clone(),
        source,
    })?;
    parse_csv(BufReader::new(file), &path_str)
}

/// Write a frame as CSV: timestamp (RFC 3339), then group / strain / style
/// when any row carries them, then every channel in name order
pub fn write_csv(frame: &Frame, mut out: impl Write) -> io::Result<()> {
    let channels = frame.channel_names();
    let with_group = frame.has_groups();
    let with_meta = frame.iter().any(|r| r.strain.is_some() || r.style.is_some());

    let mut header = vec!["timestamp".to_string()];
    if with_group {
        header.push("batch_id".to_string());
    }
    if with_meta {
        header.extend(["strain".to_string(), "style".to_string()]);
    }
    header.extend(channels.iter().cloned());
    writeln!(out, "{}", header.iter().map(|h| csv_quote(h)).collect::<Vec<_>>().join(","))?;

    for r in frame {
        let mut fields = vec![r.timestamp.to_rfc3339()];
        if with_group {
            fields.push(r.group.clone().unwrap_or_default());
        }
        if with_meta {
            fields.push(r.strain.clone().unwrap_or_default());
            fields.push(r.style.clone().unwrap_or_default());
        }
        fields.extend(channels.iter().map(|c| r.value(c).map(|v| v.to_string()).unwrap_or_default()));
        writeln!(out, "{}", fields.iter().map(|f| csv_quote(f)).collect::<Vec<_>>().join(","))?;
    }
    Ok(())
}

pub fn write_csv_file(frame: &Frame, path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = io::BufWriter::new(File::create(path)?);
    write_csv(frame, &mut writer)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_csv_split_quotes() {
        assert_eq!(csv_split(r#"a,"b,c",d"#), vec!["a", "b,c", "d"]);
        assert_eq!(csv_split(r#""say ""hi""",x"#), vec![r#"say "hi""#, "x"]);
        assert_eq!(csv_split("a,,"), vec!["a", "", ""]);
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-01T12:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T14:30:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01 12:30:00"), Some(expected));
        assert_eq!(parse_timestamp("1709296200"), Some(expected));
        assert_eq!(parse_timestamp("1709296200000"), Some(expected));
        assert_eq!(parse_timestamp("nan"), None);
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_layout_from_header() {
        let layout = CsvLayout::from_header("Timestamp,tank_id,strain,style,co2_ppm,pressure_bar").unwrap();
        assert_eq!(layout.timestamp, 0);
        assert_eq!(layout.group, Some(1));
        assert_eq!(layout.strain, Some(2));
        assert_eq!(layout.style, Some(3));
        assert_eq!(
            layout.channels,
            vec![(4, "co2_ppm".to_string()), (5, "pressure_bar".to_string())]
        );

        assert!(matches!(
            CsvLayout::from_header("when,co2_ppm"),
            Err(IngestError::NoTimestampColumn)
        ));
    }

    #[test]
    fn test_parse_csv_missing_cells_and_bad_rows() {
        let text = "timestamp,batch_id,co2_ppm,o2_pct\n\
                    2024-03-01 00:00:00,B1,100,8.0\n\
                    2024-03-01 00:05:00,B1,,null\n\
                    garbage,B1,1,1\n\
                    \n\
                    2024-03-01 00:10:00,B2,nan,7.5\n";
        let (frame, summary) = parse_csv(text.as_bytes(), "inline").unwrap();

        assert_eq!(frame.len(), 3);
        assert_eq!(summary.error_rows, 1);
        assert_eq!(summary.groups, 2);
        assert_eq!(frame.column("co2_ppm"), vec![Some(100.0), None, None]);
        assert_eq!(frame.column("o2_pct"), vec![Some(8.0), None, Some(7.5)]);
        assert_eq!(frame.readings()[2].group.as_deref(), Some("B2"));
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(parse_csv("".as_bytes(), "inline"), Err(IngestError::Empty(_))));
        assert!(matches!(
            parse_csv("timestamp,co2_ppm\n".as_bytes(), "inline"),
            Err(IngestError::NoRows { errors: 0, .. })
        ));
    }

    #[test]
    fn test_write_then_read_back() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let frame: Frame = vec![
            Reading::new(t).with_group("B,1").with_metadata("ale", "ipa").with_channel("co2_ppm", 12.5),
            Reading::new(t + chrono::Duration::minutes(5))
                .with_group("B,1")
                .with_metadata("ale", "ipa")
                .with_missing("co2_ppm"),
        ]
        .into_iter()
        .collect();

        let mut buf = Vec::new();
        write_csv(&frame, &mut buf).unwrap();
        let (back, _) = parse_csv(buf.as_slice(), "buffer").unwrap();

        assert_eq!(back.column("co2_ppm"), vec![Some(12.5), None]);
        assert_eq!(back.readings()[0].group.as_deref(), Some("B,1"));
        assert_eq!(back.readings()[1].profile_key(), Some(("ale", "ipa")));
        assert_eq!(back.timestamps(), frame.timestamps());
    }
}
