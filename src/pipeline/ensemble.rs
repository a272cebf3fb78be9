use serde::de::DeserializeOwned;
use tracing::info;

use super::PipelineError;
use crate::cv::{CvError, FoldEnsemble, FoldId, FoldModel, SplitPlan};
use crate::ml::Predictor;
use crate::tracking::{FsRun, ModelSignature};

/// Fold ensemble of a finished training run plus the grouping feature it was split on.
#[derive(Debug, Clone)]
pub struct LoadedEnsemble<M> {
    pub ensemble: FoldEnsemble<M>,
    pub split_feature: String,
    pub signature: ModelSignature,
}

/// Rebuild the fold ensemble logged by a training run.
///
/// Every fold in `0..n_splits` must have a model and all models must share one signature.
pub fn load_ensemble<M>(run: &FsRun) -> Result<LoadedEnsemble<M>, PipelineError>
where
    M: Predictor + DeserializeOwned,
{
    let params = run.params()?;
    let param = |key: &str| {
        params.get(key).cloned().ok_or_else(|| {
            CvError::Configuration(format!(
                "run {} has no {key} param; was it produced by crossfold-train?",
                run.dir().display()
            ))
        })
    };
    let n_splits = param("n_splits")?;
    let n_splits: i64 = n_splits.parse().map_err(|_| {
        CvError::Configuration(format!("logged n_splits {n_splits} is not an integer"))
    })?;
    let train_size = match params.get("train_size") {
        Some(value) => Some(value.parse::<f64>().map_err(|_| {
            CvError::Configuration(format!("logged train_size {value} is not a number"))
        })?),
        None => None,
    };
    let seed = match params.get("split_seed") {
        Some(value) => value.parse::<u64>().map_err(|_| {
            CvError::Configuration(format!("logged split_seed {value} is not an integer"))
        })?,
        None => crate::cv::DEFAULT_HOLDOUT_SEED,
    };
    let plan = SplitPlan::from_settings(n_splits, train_size, seed)?;
    let split_feature = param("xtrain_split_feature")?;

    let mut models = Vec::with_capacity(plan.n_splits());
    let mut reference: Option<ModelSignature> = None;
    for fold in (0..plan.n_splits() as u32).map(FoldId) {
        let name = format!("model_{fold}");
        if !run.has_model(&name) {
            return Err(CvError::MissingModel(fold).into());
        }
        let (model, signature): (M, ModelSignature) = run.read_model(&name)?;
        model.validate().map_err(|detail| CvError::SchemaMismatch {
            fold,
            detail: format!("{name} is malformed: {detail}"),
        })?;
        if model.feature_names() != signature.inputs.as_slice()
            || model.n_outputs() != signature.outputs
        {
            return Err(CvError::SchemaMismatch {
                fold,
                detail: format!("{name} does not match its logged signature"),
            }
            .into());
        }
        match &reference {
            Some(expected) if *expected != signature => {
                return Err(CvError::SchemaMismatch {
                    fold,
                    detail: format!(
                        "{name} expects inputs {:?} with {} outputs, model_0 expects {:?} with {}",
                        signature.inputs, signature.outputs, expected.inputs, expected.outputs
                    ),
                }
                .into());
            }
            Some(_) => {}
            None => reference = Some(signature),
        }
        models.push(FoldModel {
            excluded_fold: fold,
            model,
        });
    }
    let signature = reference.ok_or_else(|| CvError::MissingModel(FoldId(0)))?;
    let ensemble = FoldEnsemble::new(plan, models)?;
    info!(
        "Loaded {} fold models split on {split_feature} from {}",
        ensemble.len(),
        run.dir().display()
    );
    Ok(LoadedEnsemble {
        ensemble,
        split_feature,
        signature,
    })
}
