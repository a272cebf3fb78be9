//! End-to-end training and prediction sessions over a filesystem tracking store.
//!
//! Each session opens exactly one run and finalizes it on every exit path: a
//! successful session finishes the run, a failed one aborts it.

mod ensemble;
mod predict;
mod train;

use thiserror::Error;

use crate::config::ConfigError;
use crate::cv::CvError;
use crate::dataset::{DatasetLoadError, ExportError};
use crate::tracking::TrackingError;

pub use ensemble::{LoadedEnsemble, load_ensemble};
pub use predict::{SampleOutcome, predict_sample, run_prediction, run_prediction_with};
pub use train::{TrainingSummary, run_training, run_training_with};

/// Column groups read from every dataset directory.
pub const INPUT_GROUPS: [&str; 4] = ["cont_features", "cat_features", "misc_features", "targets"];

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("dataset {path}: {source}")]
    Dataset {
        path: std::path::PathBuf,
        source: DatasetLoadError,
    },
    #[error(transparent)]
    Cv(#[from] CvError),
    #[error(transparent)]
    Tracking(#[from] TrackingError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("no run id given in the config or on the command line")]
    MissingRunId,
}

impl PipelineError {
    pub(crate) fn dataset(path: &std::path::Path, source: DatasetLoadError) -> Self {
        Self::Dataset {
            path: path.to_path_buf(),
            source,
        }
    }
}
