use std::fmt;
use std::str::FromStr;

use csv::WriterBuilder;

use crate::grid::Grid;
use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug)]
pub enum ExportError {
    UnknownFormat(String),
    Csv(String),
    Json(serde_json::Error),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::UnknownFormat(s) => write!(f, "unknown export format: {s}"),
            ExportError::Csv(e) => write!(f, "csv export failed: {e}"),
            ExportError::Json(e) => write!(f, "json export failed: {e}"),
        }
    }
}

impl std::error::Error for ExportError {}

pub fn export(grid: &Grid, format: ExportFormat) -> Result<String, ExportError> {
    match format {
        ExportFormat::Csv => grid_to_csv(grid),
        ExportFormat::Json => grid_to_json(grid),
    }
}

/// `Time,Monday,...,Friday` header, then one row per period with cell labels.
pub fn grid_to_csv(grid: &Grid) -> Result<String, ExportError> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(Vec::new());

    let mut header = vec!["Time"];
    header.extend_from_slice(&grid.days);
    writer
        .write_record(&header)
        .map_err(|e| ExportError::Csv(e.to_string()))?;

    for (period, row) in Period::all().zip(&grid.rows) {
        let mut record = vec![row.time.to_string()];
        record.extend(grid.row_labels(period));
        writer
            .write_record(&record)
            .map_err(|e| ExportError::Csv(e.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Csv(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ExportError::Csv(e.to_string()))
}

pub fn grid_to_json(grid: &Grid) -> Result<String, ExportError> {
    serde_json::to_string(grid).map_err(ExportError::Json)
}
