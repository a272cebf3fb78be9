//! Prediction table writers.

use std::fmt;
use std::fs::{File, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::cv::{PredictionTable, RowOrder};

pub const COLUMNAR_FORMAT_VERSION: i64 = 1;
const FOLD_COLUMN: &str = "fold";

/// Output format of a prediction file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Csv,
    Jsonl,
    /// Directory of little-endian column blobs. Requires canonical row order.
    Columnar,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Jsonl => "jsonl",
            OutputFormat::Columnar => "columnar",
        }
    }

    /// Whether files of this format must follow an externally recorded row order.
    pub fn requires_canonical_order(self) -> bool {
        matches!(self, OutputFormat::Columnar)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = ExportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "jsonl" => Ok(OutputFormat::Jsonl),
            "columnar" => Ok(OutputFormat::Columnar),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

/// Errors returned when writing predictions.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown output format {0}")]
    UnknownFormat(String),
    #[error("{0} output requires predictions restored to a canonical order")]
    CanonicalOrderRequired(OutputFormat),
}

/// Column entry of a columnar `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnEntry {
    pub name: String,
    /// `i64le` for key and fold columns, `f64le` otherwise.
    pub dtype: String,
    pub file: String,
    pub blake3: String,
}

/// Contents of a columnar output's `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnarManifest {
    pub format_version: i64,
    pub rows: usize,
    pub columns: Vec<ColumnEntry>,
}

/// Write `table` to `path`. Columns: keys, `fold`, scores, then passthrough columns.
pub fn write_predictions(
    table: &PredictionTable,
    path: &Path,
    format: OutputFormat,
) -> Result<(), ExportError> {
    if format.requires_canonical_order() && table.order() != RowOrder::Canonical {
        return Err(ExportError::CanonicalOrderRequired(format));
    }
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        create_dir_all(parent)?;
    }
    match format {
        OutputFormat::Csv => write_csv(table, path)?,
        OutputFormat::Jsonl => write_jsonl(table, path)?,
        OutputFormat::Columnar => write_columnar(table, path)?,
    }
    info!("Wrote {} predictions to {}", table.len(), path.display());
    Ok(())
}

fn header(table: &PredictionTable) -> Vec<&str> {
    table
        .key_columns()
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(FOLD_COLUMN))
        .chain(table.score_columns().iter().map(String::as_str))
        .chain(table.passthrough_columns().iter().map(String::as_str))
        .collect()
}

fn csv_field(name: &str) -> String {
    if name.contains([',', '"', '\n']) {
        format!("\"{}\"", name.replace('"', "\"\""))
    } else {
        name.to_string()
    }
}

fn write_csv(table: &PredictionTable, path: &Path) -> Result<(), ExportError> {
    let mut out = BufWriter::new(File::create(path)?);
    let names: Vec<String> = header(table).into_iter().map(csv_field).collect();
    writeln!(out, "{}", names.join(","))?;
    for row in table.rows() {
        let fields: Vec<String> = row
            .key
            .parts()
            .iter()
            .map(|part| part.to_string())
            .chain(std::iter::once(row.fold.to_string()))
            .chain(row.scores.iter().chain(row.passthrough.iter()).map(|v| v.to_string()))
            .collect();
        writeln!(out, "{}", fields.join(","))?;
    }
    out.flush()?;
    Ok(())
}

fn write_jsonl(table: &PredictionTable, path: &Path) -> Result<(), ExportError> {
    let mut out = BufWriter::new(File::create(path)?);
    for row in table.rows() {
        let mut record = serde_json::Map::new();
        for (name, part) in table.key_columns().iter().zip(row.key.parts()) {
            record.insert(name.clone(), (*part).into());
        }
        record.insert(FOLD_COLUMN.to_string(), row.fold.0.into());
        let values = table
            .score_columns()
            .iter()
            .zip(&row.scores)
            .chain(table.passthrough_columns().iter().zip(&row.passthrough));
        for (name, value) in values {
            // NaN and infinities are written as null.
            record.insert(name.clone(), serde_json::json!(value));
        }
        serde_json::to_writer(&mut out, &record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn write_columnar(table: &PredictionTable, dir: &Path) -> Result<(), ExportError> {
    create_dir_all(dir)?;
    let mut columns = Vec::new();
    let mut write_blob = |name: &str, dtype: &str, bytes: Vec<u8>| -> Result<(), ExportError> {
        let file = format!("{:03}_{}.{dtype}", columns.len(), sanitize(name));
        std::fs::write(dir.join(&file), &bytes)?;
        columns.push(ColumnEntry {
            name: name.to_string(),
            dtype: dtype.to_string(),
            file,
            blake3: blake3::hash(&bytes).to_hex().to_string(),
        });
        Ok(())
    };

    for (idx, name) in table.key_columns().iter().enumerate() {
        let bytes = table
            .rows()
            .iter()
            .flat_map(|row| row.key.parts()[idx].to_le_bytes())
            .collect();
        write_blob(name, "i64le", bytes)?;
    }
    let folds = table
        .rows()
        .iter()
        .flat_map(|row| i64::from(row.fold.0).to_le_bytes())
        .collect();
    write_blob(FOLD_COLUMN, "i64le", folds)?;
    for (idx, name) in table.score_columns().iter().enumerate() {
        let bytes = table
            .rows()
            .iter()
            .flat_map(|row| row.scores[idx].to_le_bytes())
            .collect();
        write_blob(name, "f64le", bytes)?;
    }
    for (idx, name) in table.passthrough_columns().iter().enumerate() {
        let bytes = table
            .rows()
            .iter()
            .flat_map(|row| row.passthrough[idx].to_le_bytes())
            .collect();
        write_blob(name, "f64le", bytes)?;
    }

    let manifest = ColumnarManifest {
        format_version: COLUMNAR_FORMAT_VERSION,
        rows: table.len(),
        columns,
    };
    let mut out = BufWriter::new(File::create(dir.join("manifest.json"))?);
    serde_json::to_writer_pretty(&mut out, &manifest)?;
    out.flush()?;
    Ok(())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
