//! Column-oriented record table shared by training and inference.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity key of a record, one integer per key column (e.g. `(evt, run)`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(Vec<i64>);

impl RecordKey {
    pub fn new(parts: Vec<i64>) -> Self {
        Self(parts)
    }

    /// Two-part key, the common `(event, run)` shape.
    pub fn pair(first: i64, second: i64) -> Self {
        Self(vec![first, second])
    }

    pub fn parts(&self) -> &[i64] {
        &self.0
    }
}

impl From<(i64, i64)> for RecordKey {
    fn from((first, second): (i64, i64)) -> Self {
        Self::pair(first, second)
    }
}

impl From<i64> for RecordKey {
    fn from(value: i64) -> Self {
        Self(vec![value])
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (idx, part) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{part}")?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("column {0} appears more than once")]
    DuplicateColumn(String),
    #[error("column {name} has {len} rows but the table has {rows}")]
    RowCountMismatch { name: String, len: usize, rows: usize },
    #[error("unknown column {0}")]
    UnknownColumn(String),
    #[error("key column {column} holds non-integral value {value} at row {row}")]
    NonIntegralKey {
        column: String,
        value: f64,
        row: usize,
    },
}

/// Convert a value to `i64` when it is finite, integral and in range.
pub fn integral_value(value: f64) -> Option<i64> {
    if !value.is_finite() || value.fract() != 0.0 {
        return None;
    }
    if value < i64::MIN as f64 || value >= i64::MAX as f64 {
        return None;
    }
    Some(value as i64)
}

/// Named `f64` columns with one identity key per row.
#[derive(Debug, Clone, Default)]
pub struct RecordTable {
    key_names: Vec<String>,
    keys: Vec<RecordKey>,
    names: Vec<String>,
    index: HashMap<String, usize>,
    columns: Vec<Vec<f64>>,
}

impl RecordTable {
    /// Empty table with explicit identity keys; columns are added with [`push_column`].
    ///
    /// [`push_column`]: RecordTable::push_column
    pub fn new(key_names: Vec<String>, keys: Vec<RecordKey>) -> Self {
        Self {
            key_names,
            keys,
            ..Self::default()
        }
    }

    /// Empty table keyed by row position.
    pub fn with_row_keys(rows: usize) -> Self {
        let keys = (0..rows as i64).map(RecordKey::from).collect();
        Self::new(vec!["row".to_string()], keys)
    }

    /// Build a table from named columns, deriving identity keys from `key_columns`.
    ///
    /// With no key columns every row is keyed by its position.
    pub fn from_columns(
        columns: Vec<(String, Vec<f64>)>,
        key_columns: &[String],
    ) -> Result<Self, TableError> {
        let rows = columns.first().map(|(_, values)| values.len()).unwrap_or(0);
        let mut table = Self::with_row_keys(rows);
        for (name, values) in columns {
            table.push_column(name, values)?;
        }
        if !key_columns.is_empty() {
            table.rekey(key_columns)?;
        }
        Ok(table)
    }

    /// Append a column; its length must match the row count.
    pub fn push_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<(), TableError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(TableError::DuplicateColumn(name));
        }
        if values.len() != self.keys.len() {
            return Err(TableError::RowCountMismatch {
                name,
                len: values.len(),
                rows: self.keys.len(),
            });
        }
        self.index.insert(name.clone(), self.columns.len());
        self.names.push(name);
        self.columns.push(values);
        Ok(())
    }

    /// Replace the identity keys with values read from integral key columns.
    pub fn rekey(&mut self, key_columns: &[String]) -> Result<(), TableError> {
        let sources = key_columns
            .iter()
            .map(|name| {
                self.column(name)
                    .map(|values| (name, values))
                    .ok_or_else(|| TableError::UnknownColumn(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut keys = Vec::with_capacity(self.keys.len());
        for row in 0..self.keys.len() {
            let mut parts = Vec::with_capacity(sources.len());
            for (name, values) in &sources {
                let value = values[row];
                let part = integral_value(value).ok_or_else(|| TableError::NonIntegralKey {
                    column: (*name).clone(),
                    value,
                    row,
                })?;
                parts.push(part);
            }
            keys.push(RecordKey::new(parts));
        }
        self.keys = keys;
        self.key_names = key_columns.to_vec();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key_names(&self) -> &[String] {
        &self.key_names
    }

    pub fn keys(&self) -> &[RecordKey] {
        &self.keys
    }

    pub fn key(&self, row: usize) -> &RecordKey {
        &self.keys[row]
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.column_index(name).map(|idx| self.columns[idx].as_slice())
    }

    /// Value at `row` of the column at position `column`.
    pub fn value(&self, row: usize, column: usize) -> f64 {
        self.columns[column][row]
    }
}
