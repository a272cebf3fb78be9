use std::path::PathBuf;

use serde::de::DeserializeOwned;
use tracing::{error, info};

use super::{INPUT_GROUPS, LoadedEnsemble, PipelineError, load_ensemble};
use crate::config::PredictConfig;
use crate::cv::{
    BalanceCheck, CvError, PredictionTable, Scoring, aggregate, assign_folds, restore_order,
};
use crate::dataset::{RecordKey, RecordTable, load_record_table, read_key_order, write_predictions};
use crate::ml::Predictor;
use crate::ml::gbdt::GbdtModel;
use crate::tracking::{FsRun, FsTrackingStore, Tracker};

/// Artifact directory receiving prediction files.
const PREDICTION_ARTIFACT_DIR: &str = "pred";

#[derive(Debug, Clone)]
pub struct SampleOutcome {
    pub sample: String,
    pub rows: usize,
    pub output: PathBuf,
    pub scoring: Scoring,
}

/// Score one record table with its fold-routed models.
///
/// Fold ids are reassigned from the grouping feature without the balance check. With a
/// canonical key order the result follows it exactly.
pub fn predict_sample<M: Predictor>(
    table: &RecordTable,
    loaded: &LoadedEnsemble<M>,
    passthrough: &[String],
    canonical: Option<&[RecordKey]>,
) -> Result<PredictionTable, CvError> {
    let fold_ids = assign_folds(
        table,
        &loaded.split_feature,
        loaded.ensemble.plan().n_splits(),
        BalanceCheck::Skip,
    )?;
    let predictions = aggregate(table, &fold_ids, &loaded.ensemble, passthrough)?;
    restore_order(predictions, canonical)
}

/// Predict every configured sample with the boosted-stump models of a training run.
pub fn run_prediction(
    config: &PredictConfig,
    run_id: Option<&str>,
) -> Result<Vec<SampleOutcome>, PipelineError> {
    run_prediction_with::<GbdtModel>(config, run_id)
}

/// Predict every configured sample with models of type `M` logged by a training run.
///
/// `run_id` takes precedence over the configured one. Outputs are logged to the run as
/// artifacts under `pred/`.
pub fn run_prediction_with<M>(
    config: &PredictConfig,
    run_id: Option<&str>,
) -> Result<Vec<SampleOutcome>, PipelineError>
where
    M: Predictor + DeserializeOwned,
{
    let run_id = run_id
        .or(config.run_id.as_deref())
        .ok_or(PipelineError::MissingRunId)?;
    let store = FsTrackingStore::new(config.tracking_root()?);
    let mut run = store.open_run(&config.experiment_id, run_id)?;
    match predict_in_run::<M>(config, &mut run) {
        Ok(outcomes) => {
            run.finish()?;
            Ok(outcomes)
        }
        Err(err) => {
            error!("Prediction with run {run_id} failed: {err}");
            run.abort()?;
            Err(err)
        }
    }
}

fn predict_in_run<M>(
    config: &PredictConfig,
    run: &mut FsRun,
) -> Result<Vec<SampleOutcome>, PipelineError>
where
    M: Predictor + DeserializeOwned,
{
    let loaded = load_ensemble::<M>(run)?;
    let passthrough: Vec<String> = config
        .misc_features
        .iter()
        .filter(|name| !config.key_columns.contains(name))
        .cloned()
        .collect();

    let mut outcomes = Vec::with_capacity(config.input_samples.len());
    for sample in &config.input_samples {
        info!("Predicting {sample}");
        let input_dir = config.input_dir(sample);
        let table = load_record_table(&input_dir, &INPUT_GROUPS, &config.key_columns)
            .map_err(|err| PipelineError::dataset(&input_dir, err))?;
        let canonical = match config.original_dir(sample) {
            Some(dir) => Some(
                read_key_order(&dir, &config.key_columns)
                    .map_err(|err| PipelineError::dataset(&dir, err))?,
            ),
            None => None,
        };
        let predictions = predict_sample(&table, &loaded, &passthrough, canonical.as_deref())?;

        let output = config.output_file(sample);
        write_predictions(&predictions, &output, config.output_format)?;
        run.log_artifact(&output, PREDICTION_ARTIFACT_DIR)?;
        outcomes.push(SampleOutcome {
            sample: sample.clone(),
            rows: predictions.len(),
            output,
            scoring: predictions.scoring(),
        });
    }
    Ok(outcomes)
}
