//! Fold-indexed model ensemble and inference-time routing.

use std::collections::BTreeMap;

use super::{CvError, FoldId, Scoring, SplitPlan};
use crate::ml::Predictor;

/// A trained model tagged with the fold it excluded from training.
#[derive(Debug, Clone)]
pub struct FoldModel<M> {
    pub excluded_fold: FoldId,
    pub model: M,
}

/// One model per fold id, built under a single [`SplitPlan`].
#[derive(Debug, Clone)]
pub struct FoldEnsemble<M> {
    plan: SplitPlan,
    models: BTreeMap<FoldId, FoldModel<M>>,
}

impl<M: Predictor> FoldEnsemble<M> {
    /// Assemble an ensemble; models are keyed by their excluded fold regardless of input order.
    ///
    /// An ensemble without any model cannot score fold 0 and is rejected up front.
    pub fn new(plan: SplitPlan, models: Vec<FoldModel<M>>) -> Result<Self, CvError> {
        let n_splits = plan.n_splits();
        let mut map = BTreeMap::new();
        for fold_model in models {
            let fold = fold_model.excluded_fold;
            if fold.index() >= n_splits {
                return Err(CvError::InternalConsistency(format!(
                    "model for fold {fold} is outside [0, {n_splits})"
                )));
            }
            if map.insert(fold, fold_model).is_some() {
                return Err(CvError::InternalConsistency(format!(
                    "more than one model excludes fold {fold}"
                )));
            }
        }
        if map.is_empty() || (plan.is_holdout() && !map.contains_key(&FoldId(0))) {
            return Err(CvError::MissingModel(FoldId(0)));
        }
        Ok(Self { plan, models: map })
    }

    /// The model that must score a record with fold id `fold`.
    ///
    /// Holdout ensembles hold a single model that scores every record, including the ones
    /// it was trained on.
    pub fn route(&self, fold: FoldId) -> Result<&FoldModel<M>, CvError> {
        let key = if self.plan.is_holdout() { FoldId(0) } else { fold };
        self.models.get(&key).ok_or(CvError::MissingModel(fold))
    }

    pub fn plan(&self) -> &SplitPlan {
        &self.plan
    }

    pub fn scoring(&self) -> Scoring {
        if self.plan.is_holdout() {
            Scoring::Holdout
        } else {
            Scoring::CrossFold
        }
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn get(&self, fold: FoldId) -> Option<&FoldModel<M>> {
        self.models.get(&fold)
    }

    /// Models in ascending fold order.
    pub fn models(&self) -> impl Iterator<Item = &FoldModel<M>> {
        self.models.values()
    }

    /// Whether every fold in `0..n_splits` has a model.
    pub fn is_complete(&self) -> bool {
        self.models.len() == self.plan.n_splits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::mean::MeanModel;

    fn model(fold: u32) -> FoldModel<MeanModel> {
        FoldModel {
            excluded_fold: FoldId(fold),
            model: MeanModel {
                feature_names: vec!["x".into()],
                mean: fold as f64,
            },
        }
    }

    #[test]
    fn routes_to_model_excluding_the_fold() {
        let plan = SplitPlan::KFold { n_splits: 3 };
        let ensemble = FoldEnsemble::new(plan, vec![model(2), model(0), model(1)]).unwrap();
        for fold in 0..3 {
            let routed = ensemble.route(FoldId(fold)).unwrap();
            assert_eq!(routed.excluded_fold, FoldId(fold));
            assert_eq!(routed.model.mean, fold as f64);
        }
        assert!(ensemble.is_complete());
    }

    #[test]
    fn missing_fold_is_reported() {
        let plan = SplitPlan::KFold { n_splits: 3 };
        let ensemble = FoldEnsemble::new(plan, vec![model(0), model(2)]).unwrap();
        assert!(matches!(
            ensemble.route(FoldId(1)),
            Err(CvError::MissingModel(FoldId(1)))
        ));
        assert!(!ensemble.is_complete());
    }

    #[test]
    fn duplicate_or_out_of_range_models_are_rejected() {
        let plan = SplitPlan::KFold { n_splits: 2 };
        assert!(matches!(
            FoldEnsemble::new(plan, vec![model(0), model(0)]),
            Err(CvError::InternalConsistency(_))
        ));
        assert!(matches!(
            FoldEnsemble::new(plan, vec![model(5)]),
            Err(CvError::InternalConsistency(_))
        ));
    }

    #[test]
    fn empty_ensemble_is_missing_fold_zero() {
        let plan = SplitPlan::KFold { n_splits: 3 };
        assert!(matches!(
            FoldEnsemble::<MeanModel>::new(plan, Vec::new()),
            Err(CvError::MissingModel(FoldId(0)))
        ));
    }

    #[test]
    fn holdout_routes_everything_to_single_model() {
        let plan = SplitPlan::Holdout {
            train_fraction: 0.8,
            seed: 1,
        };
        let ensemble = FoldEnsemble::new(plan, vec![model(0)]).unwrap();
        assert_eq!(ensemble.route(FoldId(4)).unwrap().excluded_fold, FoldId(0));
        assert_eq!(ensemble.scoring(), Scoring::Holdout);
    }
}
