//! Split planning: leave-one-fold-out or a single seeded holdout.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CvError, FoldId};

/// Seed used for the holdout sampler when none is configured.
pub const DEFAULT_HOLDOUT_SEED: u64 = 1357;

/// How records are divided into training and validation sets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SplitPlan {
    /// One split per fold id; each validates on its fold and trains on the rest.
    KFold { n_splits: usize },
    /// A single random train/validation sample. Not a true fold partition.
    Holdout { train_fraction: f64, seed: u64 },
}

impl SplitPlan {
    /// Resolve the plan from the `n_splits` / `train_size` settings.
    pub fn from_settings(
        n_splits: i64,
        train_fraction: Option<f64>,
        seed: u64,
    ) -> Result<Self, CvError> {
        match n_splits {
            n if n > 1 => Ok(Self::KFold {
                n_splits: n as usize,
            }),
            1 => {
                let train_fraction = train_fraction.ok_or_else(|| {
                    CvError::Configuration(
                        "train_size is required when n_splits == 1".to_string(),
                    )
                })?;
                if !(train_fraction > 0.0 && train_fraction < 1.0) {
                    return Err(CvError::Configuration(format!(
                        "train_size should be in (0, 1), got {train_fraction}"
                    )));
                }
                Ok(Self::Holdout {
                    train_fraction,
                    seed,
                })
            }
            n => Err(CvError::Configuration(format!(
                "n_splits should be a positive integer, got {n}"
            ))),
        }
    }

    /// Number of folds; `1` for a holdout.
    pub fn n_splits(&self) -> usize {
        match self {
            Self::KFold { n_splits } => *n_splits,
            Self::Holdout { .. } => 1,
        }
    }

    pub fn is_holdout(&self) -> bool {
        matches!(self, Self::Holdout { .. })
    }
}

/// One planned split. Index sets refer to rows of the record table and are sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    /// Fold validated by this split (equivalently, excluded from its training set).
    pub fold: FoldId,
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Plan the ordered sequence of splits for `fold_ids`.
///
/// K-fold splits come out in ascending fold order. Every split is checked so that its
/// validation partition holds exactly its own fold id.
pub fn plan_splits(fold_ids: &[FoldId], plan: &SplitPlan) -> Result<Vec<Split>, CvError> {
    let splits = match *plan {
        SplitPlan::KFold { n_splits } => kfold_splits(fold_ids, n_splits)?,
        SplitPlan::Holdout {
            train_fraction,
            seed,
        } => vec![holdout_split(fold_ids.len(), train_fraction, seed)?],
    };
    for split in &splits {
        verify_validation_folds(split, fold_ids)?;
        debug!(
            fold = split.fold.0,
            train = split.train.len(),
            validation = split.validation.len(),
            "planned split"
        );
    }
    Ok(splits)
}

fn kfold_splits(fold_ids: &[FoldId], n_splits: usize) -> Result<Vec<Split>, CvError> {
    if n_splits < 2 {
        return Err(CvError::Configuration(format!(
            "k-fold planning needs at least 2 splits, got {n_splits}"
        )));
    }
    if let Some((row, fold)) = fold_ids
        .iter()
        .enumerate()
        .find(|(_, fold)| fold.index() >= n_splits)
    {
        return Err(CvError::InternalConsistency(format!(
            "record {row} has fold id {fold} outside [0, {n_splits})"
        )));
    }
    let splits = (0..n_splits as u32)
        .map(FoldId)
        .map(|fold| {
            let (validation, train): (Vec<usize>, Vec<usize>) =
                (0..fold_ids.len()).partition(|&row| fold_ids[row] == fold);
            Split {
                fold,
                train,
                validation,
            }
        })
        .collect();
    Ok(splits)
}

fn holdout_split(rows: usize, train_fraction: f64, seed: u64) -> Result<Split, CvError> {
    let n_train = (train_fraction * rows as f64).floor() as usize;
    if n_train == 0 || n_train >= rows {
        return Err(CvError::Configuration(format!(
            "train_size {train_fraction} leaves an empty training or validation set for {rows} records"
        )));
    }
    let mut order: Vec<usize> = (0..rows).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    let mut train = order[..n_train].to_vec();
    let mut validation = order[n_train..].to_vec();
    train.sort_unstable();
    validation.sort_unstable();
    Ok(Split {
        fold: FoldId(0),
        train,
        validation,
    })
}

fn verify_validation_folds(split: &Split, fold_ids: &[FoldId]) -> Result<(), CvError> {
    let found: BTreeSet<FoldId> = split
        .validation
        .iter()
        .map(|&row| {
            fold_ids.get(row).copied().ok_or_else(|| {
                CvError::InternalConsistency(format!(
                    "validation index {row} is outside the record set"
                ))
            })
        })
        .collect::<Result<_, _>>()?;
    if found.len() != 1 || !found.contains(&split.fold) {
        return Err(CvError::InternalConsistency(format!(
            "split for fold {} has validation fold ids {:?}",
            split.fold,
            found.iter().map(|f| f.0).collect::<Vec<_>>()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folds(raw: &[u32]) -> Vec<FoldId> {
        raw.iter().copied().map(FoldId).collect()
    }

    #[test]
    fn settings_select_plan_variant() {
        assert_eq!(
            SplitPlan::from_settings(5, None, 1).unwrap(),
            SplitPlan::KFold { n_splits: 5 }
        );
        assert!(SplitPlan::from_settings(1, Some(0.8), 1).unwrap().is_holdout());
        assert!(matches!(
            SplitPlan::from_settings(0, None, 1),
            Err(CvError::Configuration(_))
        ));
        assert!(matches!(
            SplitPlan::from_settings(-2, None, 1),
            Err(CvError::Configuration(_))
        ));
        assert!(matches!(
            SplitPlan::from_settings(1, None, 1),
            Err(CvError::Configuration(_))
        ));
        assert!(matches!(
            SplitPlan::from_settings(1, Some(1.0), 1),
            Err(CvError::Configuration(_))
        ));
    }

    #[test]
    fn kfold_leaves_each_fold_out_in_order() {
        let fold_ids = folds(&[0, 1, 2, 0, 1, 2, 0]);
        let splits = plan_splits(&fold_ids, &SplitPlan::KFold { n_splits: 3 }).unwrap();
        assert_eq!(splits.len(), 3);
        assert_eq!(splits[0].fold, FoldId(0));
        assert_eq!(splits[0].validation, vec![0, 3, 6]);
        assert_eq!(splits[0].train, vec![1, 2, 4, 5]);
        assert_eq!(splits[2].validation, vec![2, 5]);
    }

    #[test]
    fn kfold_with_empty_fold_fails_consistency_check() {
        let fold_ids = folds(&[0, 1, 0, 1]);
        let err = plan_splits(&fold_ids, &SplitPlan::KFold { n_splits: 3 }).unwrap_err();
        assert!(matches!(err, CvError::InternalConsistency(_)));
    }

    #[test]
    fn out_of_range_fold_fails_consistency_check() {
        let fold_ids = folds(&[0, 1, 5]);
        let err = plan_splits(&fold_ids, &SplitPlan::KFold { n_splits: 2 }).unwrap_err();
        assert!(matches!(err, CvError::InternalConsistency(_)));
    }

    #[test]
    fn holdout_is_seeded_and_disjoint() {
        let fold_ids = vec![FoldId(0); 10];
        let plan = SplitPlan::Holdout {
            train_fraction: 0.7,
            seed: DEFAULT_HOLDOUT_SEED,
        };
        let first = plan_splits(&fold_ids, &plan).unwrap();
        let second = plan_splits(&fold_ids, &plan).unwrap();
        assert_eq!(first, second);
        let split = &first[0];
        assert_eq!(split.fold, FoldId(0));
        assert_eq!(split.train.len(), 7);
        assert_eq!(split.validation.len(), 3);
        assert!(split.train.iter().all(|row| !split.validation.contains(row)));
    }

    #[test]
    fn holdout_rejects_degenerate_sizes() {
        let fold_ids = vec![FoldId(0); 2];
        let plan = SplitPlan::Holdout {
            train_fraction: 0.3,
            seed: 1,
        };
        assert!(matches!(
            plan_splits(&fold_ids, &plan),
            Err(CvError::Configuration(_))
        ));
    }
}
