//! Leave-one-fold-out training.

use serde::Serialize;
use tracing::info;

use super::{CvError, FoldEnsemble, FoldModel, Split, SplitPlan};
use crate::dataset::RecordTable;
use crate::ml::{EvalSet, ModelFitter, Predictor, TrainDataset};
use crate::tracking::{ModelSignature, Tracker};

/// Columns that make up a training dataset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureSpec {
    pub continuous: Vec<String>,
    pub categorical: Vec<String>,
    /// Per-record weight column; unit weights when absent.
    pub weight: Option<String>,
    pub target: String,
}

impl FeatureSpec {
    /// Model inputs: continuous features first, then categorical ones.
    pub fn feature_names(&self) -> Vec<String> {
        self.continuous
            .iter()
            .chain(self.categorical.iter())
            .cloned()
            .collect()
    }

    /// Positions of the categorical features within [`feature_names`](Self::feature_names).
    pub fn categorical_indices(&self) -> Vec<usize> {
        (self.continuous.len()..self.continuous.len() + self.categorical.len()).collect()
    }
}

/// Gather the rows at `rows` into a fitter-ready dataset.
pub fn build_dataset(
    table: &RecordTable,
    rows: &[usize],
    spec: &FeatureSpec,
) -> Result<TrainDataset, CvError> {
    let feature_names = spec.feature_names();
    if feature_names.is_empty() {
        return Err(CvError::Configuration(
            "both continuous and categorical feature lists are empty".to_string(),
        ));
    }
    let column = |name: &str, role: &str| {
        table.column(name).ok_or_else(|| {
            CvError::Configuration(format!("{role} column {name} is not present in the input"))
        })
    };
    let features = feature_names
        .iter()
        .map(|name| column(name.as_str(), "feature"))
        .collect::<Result<Vec<_>, _>>()?;
    let target = column(spec.target.as_str(), "target")?;
    let weight = spec
        .weight
        .as_deref()
        .map(|name| column(name, "weight"))
        .transpose()?;

    Ok(TrainDataset {
        feature_names,
        categorical: spec.categorical_indices(),
        x: rows
            .iter()
            .map(|&row| features.iter().map(|values| values[row]).collect())
            .collect(),
        y: rows.iter().map(|&row| target[row]).collect(),
        weight: rows
            .iter()
            .map(|&row| weight.map_or(1.0, |values| values[row]))
            .collect(),
    })
}

/// Fit one model per split, in split order, and assemble the fold ensemble.
///
/// Each fold's evaluation history is logged to `tracker` as `train_{fold}-{metric}` and
/// `valid_{fold}-{metric}`. Models are logged as `model_{fold}` only after every fold has
/// fitted, so the first failing fold aborts training without persisting any model.
pub fn train_folds<F>(
    table: &RecordTable,
    splits: &[Split],
    plan: &SplitPlan,
    spec: &FeatureSpec,
    fitter: &F,
    tracker: &mut dyn Tracker,
) -> Result<FoldEnsemble<F::Model>, CvError>
where
    F: ModelFitter,
    F::Model: Serialize,
{
    if splits.len() != plan.n_splits() {
        return Err(CvError::InternalConsistency(format!(
            "{} planned splits for n_splits = {}",
            splits.len(),
            plan.n_splits()
        )));
    }

    let mut fitted = Vec::with_capacity(splits.len());
    for split in splits {
        let fold = split.fold;
        info!("Leaving fold {fold} out");
        let train = build_dataset(table, &split.train, spec)?;
        let valid = build_dataset(table, &split.validation, spec)?;
        let train_name = format!("train_{fold}");
        let valid_name = format!("valid_{fold}");
        let outcome = fitter
            .fit(
                &train,
                &[
                    EvalSet {
                        name: &train_name,
                        data: &train,
                    },
                    EvalSet {
                        name: &valid_name,
                        data: &valid,
                    },
                ],
            )
            .map_err(|source| CvError::Fit { fold, source })?;

        for series in &outcome.history {
            let name = format!("{}-{}", series.dataset, series.metric);
            for (step, &value) in series.values.iter().enumerate() {
                tracker.log_metric(&name, value, step as u64)?;
            }
            if let Some(last) = series.values.last() {
                info!("fold {fold}: {name} = {last:.6}");
            }
        }

        let example = train.x.first().cloned().unwrap_or_default();
        fitted.push((fold, outcome.model, example));
    }

    // Models are persisted only once every fold has fitted.
    let mut models = Vec::with_capacity(fitted.len());
    for (fold, model, example) in fitted {
        let signature = ModelSignature {
            inputs: model.feature_names().to_vec(),
            outputs: model.n_outputs(),
        };
        let serialized = serde_json::to_value(&model).map_err(|err| {
            CvError::InternalConsistency(format!("model for fold {fold} cannot be serialized: {err}"))
        })?;
        tracker.log_model(&format!("model_{fold}"), &serialized, &signature, &example)?;
        models.push(FoldModel {
            excluded_fold: fold,
            model,
        });
    }

    let ensemble = FoldEnsemble::new(*plan, models)?;
    if !ensemble.is_complete() {
        return Err(CvError::InternalConsistency(format!(
            "trained {} models for {} folds",
            ensemble.len(),
            plan.n_splits()
        )));
    }
    info!("Trained {} fold models", ensemble.len());
    Ok(ensemble)
}
