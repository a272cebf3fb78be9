//! Deterministic weighted gradient-boosted decision stumps.
//!
//! Supports:
//! - L2 regression, binary log loss and multi-class softmax objectives.
//! - Per-row weights and categorical features (one-category-versus-rest splits).
//! - Per-iteration evaluation on named validation sets.
//! - Reproducible JSON model export/load.

mod model;
mod train;

pub use model::{GbdtModel, Objective, SplitRule, Stump, sigmoid, softmax};
pub use train::{GbdtFitter, GbdtParams, train_gbdt};
