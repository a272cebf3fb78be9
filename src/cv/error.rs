use thiserror::Error;

use super::FoldId;
use crate::ml::FitError;
use crate::tracking::TrackingError;

/// Failures of the cross-validation engine. Every variant is fatal to the current run.
#[derive(Debug, Error)]
pub enum CvError {
    /// Invalid or missing setting, e.g. a non-positive `n_splits`.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Malformed input values, e.g. a non-integral grouping feature.
    #[error("data error: {0}")]
    Data(String),
    /// Fold sizes diverge beyond the allowed relative deviation.
    #[error(
        "observed {ratio:.4} relative deviation in number of entries across folds (limit {limit}), counts {counts:?}; check that the split feature distributes evenly"
    )]
    ImbalancedSplit {
        ratio: f64,
        limit: f64,
        counts: Vec<usize>,
    },
    /// Fold bookkeeping disagrees with itself; indicates a grouping/index misalignment.
    #[error("internal consistency error: {0}")]
    InternalConsistency(String),
    /// No model was trained for the fold a record routes to.
    #[error("no model available for fold {0}")]
    MissingModel(FoldId),
    /// A model's feature set cannot be satisfied by the input.
    #[error("schema mismatch for fold {fold}: {detail}")]
    SchemaMismatch { fold: FoldId, detail: String },
    /// Canonical ordering keys do not match the prediction keys exactly.
    #[error("canonical order does not match predictions: {0}")]
    OrderMismatch(String),
    /// Fitting one fold failed; the ensemble is discarded.
    #[error("fitting fold {fold} failed: {source}")]
    Fit {
        fold: FoldId,
        #[source]
        source: FitError,
    },
    /// The tracking run could not record a fold.
    #[error("tracking error: {0}")]
    Tracking(#[from] TrackingError),
}
