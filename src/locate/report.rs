// src/locate/report.rs
// =============================================================================
// Writes centroids as CSV (default) or JSON.
//
// CSV layout, one header line then one row per PoP:
//
//   server,cities,names,lat,lon
//   172.217.5.0,12,California;Oregon,37.41,-122.07
//
// Region names come from the GeoIP database and may contain characters
// the stream cannot carry. Non-ASCII characters are dropped, and a label
// with nothing left is left out of its row (with a warning). A label that
// contains a delimiter or control character fails only its own row, which
// is logged and skipped while the rest of the report is written.
// =============================================================================

use super::centroid::Centroid;
use std::io::{self, Write};
use thiserror::Error;
use tracing::warn;

pub const CSV_HEADER: &str = "server,cities,names,lat,lon";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("label {label:?} cannot be written to the output stream")]
    Label { label: String },
}

/// Rows written vs rows skipped because of unencodable labels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub rows: usize,
    pub skipped: usize,
}

// Makes a region name safe for the CSV stream.
//
// Returns:
//   Ok(Some(label)) - the ASCII-only form of the label
//   Ok(None)        - no ASCII characters at all (e.g. "東京都")
//   Err(Label)      - it would break the row structure
pub fn encode_label(label: &str) -> Result<Option<String>, ReportError> {
    let ascii: String = label.chars().filter(char::is_ascii).collect();
    let broken = ascii
        .chars()
        .any(|c| c == ',' || c == ';' || c.is_ascii_control());
    if broken {
        return Err(ReportError::Label {
            label: label.to_string(),
        });
    }
    if ascii.is_empty() {
        return Ok(None);
    }
    Ok(Some(ascii))
}

pub fn format_row(centroid: &Centroid) -> Result<String, ReportError> {
    let mut labels = Vec::with_capacity(centroid.labels.len());
    for label in &centroid.labels {
        match encode_label(label)? {
            Some(encoded) => labels.push(encoded),
            // The row is still useful without this one name
            None => warn!(pop = %centroid.pop, label = %label, "dropping label with no ASCII characters"),
        }
    }

    Ok(format!(
        "{},{},{},{},{}",
        centroid.pop,
        centroid.sample_count,
        labels.join(";"),
        centroid.lat,
        centroid.lon
    ))
}

pub fn write_csv<W: Write>(out: &mut W, centroids: &[Centroid]) -> io::Result<ReportSummary> {
    writeln!(out, "{CSV_HEADER}")?;

    let mut summary = ReportSummary::default();
    for centroid in centroids {
        match format_row(centroid) {
            Ok(row) => {
                writeln!(out, "{row}")?;
                summary.rows += 1;
            }
            Err(e) => {
                warn!(pop = %centroid.pop, error = %e, "skipping row");
                summary.skipped += 1;
            }
        }
    }
    Ok(summary)
}

pub fn write_json<W: Write>(out: &mut W, centroids: &[Centroid]) -> serde_json::Result<ReportSummary> {
    serde_json::to_writer_pretty(&mut *out, centroids)?;
    writeln!(out).map_err(serde_json::Error::io)?;
    Ok(ReportSummary {
        rows: centroids.len(),
        skipped: 0,
    })
}
