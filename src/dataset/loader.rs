//! Loader for dataset directories: a `manifest.json` naming one JSONL file per column group.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::table::{RecordKey, RecordTable, TableError, integral_value};

pub const MANIFEST_FILE_NAME: &str = "manifest.json";
pub const DATASET_FORMAT_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum DatasetLoadError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    #[error("invalid rows in {group}: {message}")]
    InvalidRows { group: String, message: String },
    #[error("none of the requested groups {0:?} is present")]
    NoGroups(Vec<String>),
    #[error("no group holds all key columns {0:?}")]
    MissingKeyColumns(Vec<String>),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Parsed contents of `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Dataset format version.
    pub format_version: i64,
    /// Group name to JSONL file (relative to the dataset directory).
    pub groups: BTreeMap<String, String>,
}

impl Manifest {
    pub fn load(dir: &Path) -> Result<Self, DatasetLoadError> {
        let mut bytes = Vec::new();
        File::open(dir.join(MANIFEST_FILE_NAME))?.read_to_end(&mut bytes)?;
        let manifest: Manifest = serde_json::from_slice(&bytes)?;
        if manifest.format_version != DATASET_FORMAT_VERSION {
            return Err(DatasetLoadError::InvalidManifest(format!(
                "unsupported format_version {}",
                manifest.format_version
            )));
        }
        Ok(manifest)
    }
}

/// Load the requested column groups of a dataset directory into one table.
///
/// Groups absent from the manifest are skipped. Groups must be row-aligned and must not
/// repeat column names. Identity keys come from `key_columns`, or from row positions when
/// it is empty.
pub fn load_record_table(
    dir: &Path,
    groups: &[&str],
    key_columns: &[String],
) -> Result<RecordTable, DatasetLoadError> {
    let manifest = Manifest::load(dir)?;
    let mut loaded = Vec::new();
    for &group in groups {
        let Some(file) = manifest.groups.get(group) else {
            debug!("Group {group} not in {}, skipping", dir.display());
            continue;
        };
        loaded.push(load_group(&dir.join(file), group)?);
    }
    let Some(rows) = loaded.first().map(|(rows, _)| *rows) else {
        return Err(DatasetLoadError::NoGroups(
            groups.iter().map(|group| group.to_string()).collect(),
        ));
    };
    let mut table = RecordTable::with_row_keys(rows);
    for (_, columns) in loaded {
        for (name, values) in columns {
            table.push_column(name, values)?;
        }
    }
    if !key_columns.is_empty() {
        table.rekey(key_columns)?;
    }
    debug!(
        "Loaded {} records with {} columns from {}",
        table.len(),
        table.column_names().len(),
        dir.display()
    );
    Ok(table)
}

/// Identity keys of a dataset directory in file order.
///
/// Keys are read from the first group, by group name, that holds every key column.
pub fn read_key_order(
    dir: &Path,
    key_columns: &[String],
) -> Result<Vec<RecordKey>, DatasetLoadError> {
    let manifest = Manifest::load(dir)?;
    for (group, file) in &manifest.groups {
        let (rows, columns) = load_group(&dir.join(file), group)?;
        let sources = key_columns
            .iter()
            .map(|key| columns.get(key))
            .collect::<Option<Vec<_>>>();
        let Some(sources) = sources else {
            continue;
        };
        let mut keys = Vec::with_capacity(rows);
        for row in 0..rows {
            let parts = sources
                .iter()
                .zip(key_columns)
                .map(|(values, column)| {
                    integral_value(values[row]).ok_or_else(|| TableError::NonIntegralKey {
                        column: column.clone(),
                        value: values[row],
                        row,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            keys.push(RecordKey::new(parts));
        }
        return Ok(keys);
    }
    Err(DatasetLoadError::MissingKeyColumns(key_columns.to_vec()))
}

type GroupColumns = BTreeMap<String, Vec<f64>>;

fn load_group(path: &Path, group: &str) -> Result<(usize, GroupColumns), DatasetLoadError> {
    let reader = BufReader::new(File::open(path)?);
    let mut columns: GroupColumns = BTreeMap::new();
    let mut rows = 0usize;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let invalid = |message: String| DatasetLoadError::InvalidRows {
            group: group.to_string(),
            message: format!("line {}: {message}", idx + 1),
        };
        let record: BTreeMap<String, Value> =
            serde_json::from_str(&line).map_err(|err| invalid(err.to_string()))?;
        for (name, value) in &record {
            let value = match value {
                Value::Number(number) => number.as_f64().unwrap_or(f64::NAN),
                Value::Null => f64::NAN,
                Value::Bool(flag) => f64::from(u8::from(*flag)),
                other => return Err(invalid(format!("column {name} holds {other}"))),
            };
            columns
                .entry(name.clone())
                .or_insert_with(|| vec![f64::NAN; rows])
                .push(value);
        }
        rows += 1;
        for values in columns.values_mut() {
            if values.len() < rows {
                values.push(f64::NAN);
            }
        }
    }
    Ok((rows, columns))
}
