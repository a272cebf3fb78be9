//! Fold-consistent cross-validation for boosted-tree ensembles.
//!
//! Records are split into folds by a grouping feature, one model is trained per
//! left-out fold, and at inference every record is scored by the model that never
//! saw it. Predictions can be restored to an externally recorded key order.

/// Process-level directories (logs, default tracking store).
pub mod app_dirs;
/// TOML settings for the training and prediction programs.
pub mod config;
/// Fold assignment, split planning, fold training, routing and aggregation.
pub mod cv;
/// Record tables, dataset loading and prediction writers.
pub mod dataset;
/// Tracing subscriber setup for the binaries.
pub mod logging;
/// Model fitting capability and bundled models.
pub mod ml;
/// Training and prediction sessions tying the pieces together.
pub mod pipeline;
/// Experiment tracking runs.
pub mod tracking;
