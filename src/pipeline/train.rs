use std::path::PathBuf;

use serde::Serialize;
use tracing::{error, info};

use super::{INPUT_GROUPS, PipelineError};
use crate::config::TrainConfig;
use crate::cv::{
    BalanceCheck, CvError, FoldId, Split, SplitPlan, assign_folds, fold_counts, plan_splits,
    train_folds,
};
use crate::dataset::{RecordTable, load_record_table};
use crate::ml::ModelFitter;
use crate::ml::gbdt::GbdtFitter;
use crate::tracking::{FsRun, FsTrackingStore, Tracker};

#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub n_models: usize,
}

/// Records with their fold ids and planned splits, ready to train.
struct PreparedTraining {
    table: RecordTable,
    fold_ids: Vec<FoldId>,
    plan: SplitPlan,
    splits: Vec<Split>,
}

/// Train the boosted-stump fold ensemble described by `config`.
pub fn run_training(config: &TrainConfig) -> Result<TrainingSummary, PipelineError> {
    let params = config.model_params()?;
    params
        .validate()
        .map_err(|err| CvError::Configuration(format!("model_param: {err}")))?;
    let fitter = GbdtFitter::new(params);
    run_training_with(config, &fitter, fitter.params().param_map())
}

/// Train with any fitter; `model_params` are logged with the run as `model_param.<key>`.
///
/// Data loading, fold assignment and split planning happen before the run is opened, so
/// a bad dataset never leaves a run behind.
pub fn run_training_with<F>(
    config: &TrainConfig,
    fitter: &F,
    model_params: impl IntoIterator<Item = (String, String)>,
) -> Result<TrainingSummary, PipelineError>
where
    F: ModelFitter,
    F::Model: Serialize,
{
    let prepared = prepare(config)?;
    let store = FsTrackingStore::new(config.tracking_root()?);
    let mut run = store.start_run(&config.experiment_id)?;
    match train_in_run(config, &prepared, fitter, model_params, &mut run) {
        Ok(n_models) => {
            let summary = TrainingSummary {
                run_id: run.run_id().to_string(),
                run_dir: run.dir().to_path_buf(),
                n_models,
            };
            run.finish()?;
            info!("Run {} finished with {n_models} models", summary.run_id);
            Ok(summary)
        }
        Err(err) => {
            error!("Training run {} failed: {err}", run.run_id());
            run.abort()?;
            Err(err)
        }
    }
}

fn prepare(config: &TrainConfig) -> Result<PreparedTraining, PipelineError> {
    let plan = config.split_plan()?;
    let table = load_record_table(&config.train_file, &INPUT_GROUPS, &config.key_columns)
        .map_err(|err| PipelineError::dataset(&config.train_file, err))?;
    info!(
        "Loaded {} training records from {}",
        table.len(),
        config.train_file.display()
    );
    if plan.is_holdout() {
        info!(
            "Training a single model on {} of the records, the rest is used for validation",
            config.train_size.unwrap_or_default()
        );
    } else {
        info!(
            "Splitting into {} folds over values of {} for cross-training",
            plan.n_splits(),
            config.xtrain_split_feature
        );
    }
    let fold_ids = assign_folds(
        &table,
        &config.xtrain_split_feature,
        plan.n_splits(),
        BalanceCheck::Enforce,
    )?;
    let splits = plan_splits(&fold_ids, &plan)?;
    Ok(PreparedTraining {
        table,
        fold_ids,
        plan,
        splits,
    })
}

fn train_in_run<F>(
    config: &TrainConfig,
    prepared: &PreparedTraining,
    fitter: &F,
    model_params: impl IntoIterator<Item = (String, String)>,
    run: &mut FsRun,
) -> Result<usize, PipelineError>
where
    F: ModelFitter,
    F::Model: Serialize,
{
    let mut params = config.tracking_params();
    params.insert("run_id".to_string(), run.run_id().to_string());
    params.extend(
        model_params
            .into_iter()
            .map(|(key, value)| (format!("model_param.{key}"), value)),
    );
    run.log_params(&params)?;
    let counts = fold_counts(&prepared.fold_ids, prepared.plan.n_splits());
    for (fold, count) in counts.iter().enumerate() {
        run.log_metric("fold_size", *count as f64, fold as u64)?;
    }
    let ensemble = train_folds(
        &prepared.table,
        &prepared.splits,
        &prepared.plan,
        &config.feature_spec(),
        fitter,
        run,
    )?;
    Ok(ensemble.len())
}
