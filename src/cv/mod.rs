//! Fold-consistent cross-validation engine.
//!
//! Training path: [`assign_folds`] → [`plan_splits`] → [`train_folds`] produces one model per
//! fold. Inference path: [`assign_folds`] (reapplied without the balance check) →
//! [`FoldEnsemble::route`] → [`aggregate`] → [`restore_order`].
//!
//! The leakage guarantee is that a record with fold id `f` is only ever scored by the model
//! that excluded fold `f` from its training set.

mod aggregate;
mod error;
mod fold;
mod order;
mod plan;
mod route;
mod train;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use aggregate::{PredictionRow, PredictionTable, RowOrder, Scoring, aggregate};
pub use error::CvError;
pub use fold::{
    BalanceCheck, MAX_FOLD_IMBALANCE, assign_folds, check_balance, fold_counts, fold_for_value,
    relative_imbalance,
};
pub use order::restore_order;
pub use plan::{DEFAULT_HOLDOUT_SEED, Split, SplitPlan, plan_splits};
pub use route::{FoldEnsemble, FoldModel};
pub use train::{FeatureSpec, build_dataset, train_folds};

/// Fold identifier in `[0, n_splits)`; always `0` for a single holdout split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FoldId(pub u32);

impl FoldId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FoldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
