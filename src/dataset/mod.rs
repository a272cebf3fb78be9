//! Tabular input and prediction output.

pub mod export;
pub mod loader;
mod table;

pub use export::{ColumnarManifest, ExportError, OutputFormat, write_predictions};
pub use loader::{DatasetLoadError, Manifest, load_record_table, read_key_order};
pub use table::{RecordKey, RecordTable, TableError, integral_value};
