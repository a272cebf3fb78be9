//! Experiment tracking.
//!
//! A run is an explicit value threaded through training and prediction. [`FsRun`] persists
//! params, per-step metrics, models and artifacts under a run directory and is finalized on
//! every exit path: [`FsRun::finish`] commits, dropping an unfinished run marks it failed.

mod fs;
mod memory;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fs::{FsRun, FsTrackingStore, RunMeta, RunStatus};
pub use memory::{LoggedMetric, LoggedModel, RecordingTracker};

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("run not found at {0}")]
    RunNotFound(PathBuf),
    #[error("run {0} is marked failed and cannot be resumed")]
    RunFailed(String),
    #[error("param {key} already logged as {existing}, refusing to overwrite with {new}")]
    ParamConflict {
        key: String,
        existing: String,
        new: String,
    },
    #[error("invalid run: {0}")]
    InvalidRun(String),
}

impl TrackingError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Input/output contract recorded with each logged model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSignature {
    /// Ordered input feature names.
    pub inputs: Vec<String>,
    /// Number of scores produced per row.
    pub outputs: usize,
}

/// Sink for run parameters, metrics, models and artifacts.
pub trait Tracker {
    fn run_id(&self) -> &str;

    fn log_params(&mut self, params: &BTreeMap<String, String>) -> Result<(), TrackingError>;

    fn log_metric(&mut self, name: &str, value: f64, step: u64) -> Result<(), TrackingError>;

    fn log_model(
        &mut self,
        name: &str,
        model: &serde_json::Value,
        signature: &ModelSignature,
        input_example: &[f64],
    ) -> Result<(), TrackingError>;

    /// Copy a file into the run under `artifact_dir`.
    fn log_artifact(&mut self, path: &Path, artifact_dir: &str) -> Result<(), TrackingError>;
}

pub(crate) fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
