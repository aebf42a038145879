//! CSV and JSON rendering of export rows

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::errors::DashboardError;
use crate::projection::ExportRow;

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Header line plus one line per row, every field JSON-encoded
    Csv,
    /// Pretty-printed JSON array
    #[default]
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
        }
    }

    /// Suggested download name
    pub fn file_name(&self) -> String {
        format!("pothole_data.{}", self.extension())
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(DashboardError::InvalidExportFormat(other.to_string())),
        }
    }
}

/// Render rows in the requested format
pub fn render(rows: &[ExportRow], format: ExportFormat) -> Result<String, DashboardError> {
    match format {
        ExportFormat::Csv => render_csv(rows),
        ExportFormat::Json => Ok(serde_json::to_string_pretty(rows)?),
    }
}

/// Each field is encoded independently as JSON, so strings come out quoted
/// with embedded commas, quotes and newlines escaped.
fn render_csv(rows: &[ExportRow]) -> Result<String, DashboardError> {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(ExportRow::FIELDS.join(","));

    for row in rows {
        let value = serde_json::to_value(row)?;
        let fields = ExportRow::FIELDS
            .iter()
            .map(|field| serde_json::to_string(value.get(field).unwrap_or(&Value::Null)))
            .collect::<Result<Vec<_>, _>>()?;
        lines.push(fields.join(","));
    }

    Ok(lines.join("\n"))
}

/// Render rows and write them to `path`, returning the number of rows written
pub fn write_export(
    rows: &[ExportRow],
    format: ExportFormat,
    path: &Path,
) -> Result<usize, DashboardError> {
    if rows.is_empty() {
        return Err(DashboardError::NothingToExport);
    }

    let content = render(rows, format)?;
    std::fs::write(path, content)?;
    info!(
        "Exported {} rows as {} ({}) to {}",
        rows.len(),
        format,
        format.mime_type(),
        path.display()
    );
    Ok(rows.len())
}
