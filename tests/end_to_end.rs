mod support;

use std::path::{Path, PathBuf};

use crossfold::config::{PredictConfig, TrainConfig, load_predict_config, load_train_config};
use crossfold::cv::{
    BalanceCheck, CvError, FeatureSpec, FoldId, Scoring, SplitPlan, aggregate, assign_folds,
    plan_splits, train_folds,
};
use crossfold::dataset::{ColumnarManifest, RecordTable};
use crossfold::ml::mean::{MeanFitter, MeanModel};
use crossfold::ml::{EvalSet, FitError, FitOutcome, ModelFitter, TrainDataset};
use crossfold::pipeline::{
    PipelineError, run_prediction, run_prediction_with, run_training, run_training_with,
};
use crossfold::tracking::{RecordingTracker, RunMeta, RunStatus, TrackingError};
use support::crossfold_env::CrossfoldEnvGuard;
use support::datasets::Events;
use tempfile::tempdir;

const N_EVENTS: usize = 200;

fn write_train_config(root: &Path, n_splits: i64, extra: &str) -> PathBuf {
    let path = root.join("train.toml");
    let text = format!(
        r#"
train_file = '{train}'
tracking_root = '{mlruns}'
cont_features = ["x"]
cat_features = ["flavour"]
weight_name = "weight"
xtrain_split_feature = "evt"
n_splits = {n_splits}
key_columns = ["evt", "run"]
{extra}

[model_param]
objective = "binary"
num_iterations = 10
"#,
        train = root.join("train").display(),
        mlruns = root.join("mlruns").display(),
    );
    std::fs::write(&path, text).unwrap();
    path
}

fn write_predict_config(root: &Path, format: &str, with_original: bool) -> PathBuf {
    let path = root.join("predict.toml");
    let original = if with_original {
        format!("original_path = '{}'", root.join("original").join("{sample_name}").display())
    } else {
        String::new()
    };
    let text = format!(
        r#"
tracking_root = '{mlruns}'
input_path = '{skims}'
input_samples = ["sig"]
output_path = '{out}'
output_format = "{format}"
key_columns = ["evt", "run"]
misc_features = ["evt", "run", "mass"]
{original}
"#,
        mlruns = root.join("mlruns").display(),
        skims = root.join("skims").display(),
        out = root.join("out").display(),
    );
    std::fs::write(&path, text).unwrap();
    path
}

/// Training data in file order, the sample reversed, the canonical order rotated.
fn write_datasets(root: &Path, events: &Events) -> Vec<usize> {
    let rows: Vec<usize> = (0..events.len()).collect();
    events.write(&root.join("train"), &rows);
    let reversed: Vec<usize> = rows.iter().rev().copied().collect();
    events.write(&root.join("skims").join("sig"), &reversed);
    let canonical: Vec<usize> = rows.iter().map(|&row| (row + 17) % events.len()).collect();
    events.write(&root.join("original").join("sig"), &canonical);
    canonical
}

fn read_meta(run_dir: &Path) -> RunMeta {
    serde_json::from_slice(&std::fs::read(run_dir.join("meta.json")).unwrap()).unwrap()
}

fn read_i64_column(dir: &Path, manifest: &ColumnarManifest, name: &str) -> Vec<i64> {
    let entry = manifest.columns.iter().find(|c| c.name == name).unwrap();
    assert_eq!(entry.dtype, "i64le");
    std::fs::read(dir.join(&entry.file))
        .unwrap()
        .chunks_exact(8)
        .map(|chunk| i64::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

fn read_f64_column(dir: &Path, manifest: &ColumnarManifest, name: &str) -> Vec<f64> {
    let entry = manifest.columns.iter().find(|c| c.name == name).unwrap();
    assert_eq!(entry.dtype, "f64le");
    std::fs::read(dir.join(&entry.file))
        .unwrap()
        .chunks_exact(8)
        .map(|chunk| f64::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

#[test]
fn fold_models_differ_from_a_single_full_dataset_model() {
    let n = 300;
    let groups: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let targets: Vec<f64> = (0..n).map(|i| (i % 5) as f64 * 2.0 + (i % 7) as f64).collect();
    let table = RecordTable::from_columns(
        vec![
            ("evt".into(), groups),
            ("x".into(), (0..n).map(|i| (i % 11) as f64).collect()),
            ("target".into(), targets.clone()),
        ],
        &[],
    )
    .unwrap();
    let spec = FeatureSpec {
        continuous: vec!["x".into()],
        target: "target".into(),
        ..FeatureSpec::default()
    };

    let plan = SplitPlan::KFold { n_splits: 5 };
    let fold_ids = assign_folds(&table, "evt", 5, BalanceCheck::Enforce).unwrap();
    let splits = plan_splits(&fold_ids, &plan).unwrap();
    let mut tracker = RecordingTracker::new("unit");
    let ensemble = train_folds(&table, &splits, &plan, &spec, &MeanFitter, &mut tracker).unwrap();
    assert_eq!(ensemble.len(), 5);
    for fold in 0..5 {
        assert!(tracker.model(&format!("model_{fold}")).is_some());
        assert_eq!(tracker.metric_series(&format!("valid_{fold}-l2")).len(), 1);
    }

    let full_mean = targets.iter().sum::<f64>() / n as f64;
    let predictions = aggregate(&table, &fold_ids, &ensemble, &[]).unwrap();
    assert_eq!(predictions.len(), n);
    for (row, key) in table.keys().iter().enumerate() {
        let fold = fold_ids[row];
        let (sum, count) = targets
            .iter()
            .enumerate()
            .filter(|(other, _)| fold_ids[*other] != fold)
            .fold((0.0, 0usize), |(sum, count), (_, t)| (sum + t, count + 1));
        let expected = sum / count as f64;
        let score = predictions.get(key).unwrap().scores[0];
        assert!((score - expected).abs() < 1e-9);
    }
    assert!(predictions
        .rows()
        .iter()
        .any(|row| (row.scores[0] - full_mean).abs() > 1e-6));
}

#[test]
fn trains_and_predicts_columnar_in_canonical_order() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let events = Events::generate(N_EVENTS);
    let canonical = write_datasets(root, &events);

    let config = load_train_config(&write_train_config(root, 4, "")).unwrap();
    let summary = run_training(&config).unwrap();
    assert_eq!(summary.n_models, 4);
    assert_eq!(read_meta(&summary.run_dir).status, RunStatus::Finished);
    for fold in 0..4 {
        let model_dir = summary.run_dir.join("artifacts").join(format!("model_{fold}"));
        assert!(model_dir.join("MLmodel.json").is_file());
        assert!(model_dir.join("model.json").is_file());
    }
    let metrics = std::fs::read_to_string(summary.run_dir.join("metrics.jsonl")).unwrap();
    assert!(metrics.contains("valid_3-binary_logloss"));
    assert!(metrics.contains("fold_size"));

    let predict = load_predict_config(&write_predict_config(root, "columnar", true)).unwrap();
    let outcomes = run_prediction(&predict, Some(summary.run_id.as_str())).unwrap();
    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert_eq!(outcome.rows, N_EVENTS);
    assert_eq!(outcome.scoring, Scoring::CrossFold);
    assert_eq!(outcome.output, root.join("out").join("sig_pred.columnar"));

    let manifest: ColumnarManifest = serde_json::from_slice(
        &std::fs::read(outcome.output.join("manifest.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(manifest.rows, N_EVENTS);
    let names: Vec<&str> = manifest.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["evt", "run", "fold", "pred", "mass"]);

    let evt = read_i64_column(&outcome.output, &manifest, "evt");
    let expected_evt: Vec<i64> = canonical.iter().map(|&row| row as i64).collect();
    assert_eq!(evt, expected_evt);
    let folds = read_i64_column(&outcome.output, &manifest, "fold");
    assert!(evt.iter().zip(&folds).all(|(e, f)| e % 4 == *f));
    let pred = read_f64_column(&outcome.output, &manifest, "pred");
    assert!(pred.iter().all(|p| (0.0..=1.0).contains(p)));
    let mass = read_f64_column(&outcome.output, &manifest, "mass");
    assert!(evt
        .iter()
        .zip(&mass)
        .all(|(e, m)| *m == events.mass[*e as usize]));

    let logged = summary.run_dir.join("artifacts").join("pred").join("sig_pred.columnar");
    assert!(logged.join("manifest.json").is_file());
    assert_eq!(read_meta(&summary.run_dir).status, RunStatus::Finished);
}

#[test]
fn mean_models_round_trip_through_the_tracking_store() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let events = Events::generate(N_EVENTS);
    write_datasets(root, &events);

    let config: TrainConfig = load_train_config(&write_train_config(root, 4, "")).unwrap();
    let summary = run_training_with(&config, &MeanFitter, Vec::new()).unwrap();
    assert_eq!(summary.n_models, 4);

    let mut predict: PredictConfig =
        load_predict_config(&write_predict_config(root, "csv", false)).unwrap();
    predict.run_id = Some(summary.run_id.clone());
    let outcomes = run_prediction_with::<MeanModel>(&predict, None).unwrap();
    let text = std::fs::read_to_string(&outcomes[0].output).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("evt,run,fold,pred,mass"));

    let mut expected = [0.0f64; 4];
    for (fold, slot) in expected.iter_mut().enumerate() {
        let kept: Vec<f64> = (0..N_EVENTS)
            .filter(|evt| evt % 4 != fold)
            .map(|evt| events.target[evt])
            .collect();
        *slot = kept.iter().sum::<f64>() / kept.len() as f64;
    }
    let mut rows = 0;
    for line in lines {
        let fields: Vec<&str> = line.split(',').collect();
        let evt: usize = fields[0].parse().unwrap();
        let fold: usize = fields[2].parse().unwrap();
        let pred: f64 = fields[3].parse().unwrap();
        assert_eq!(fold, evt % 4);
        assert!((pred - expected[fold]).abs() < 1e-9);
        rows += 1;
    }
    assert_eq!(rows, N_EVENTS);
}

#[test]
fn missing_fold_model_fails_the_prediction_run() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write_datasets(root, &Events::generate(N_EVENTS));

    let config = load_train_config(&write_train_config(root, 4, "")).unwrap();
    let summary = run_training_with(&config, &MeanFitter, Vec::new()).unwrap();
    std::fs::remove_dir_all(summary.run_dir.join("artifacts").join("model_2")).unwrap();

    let predict = load_predict_config(&write_predict_config(root, "jsonl", false)).unwrap();
    let err =
        run_prediction_with::<MeanModel>(&predict, Some(summary.run_id.as_str())).unwrap_err();
    assert!(
        matches!(err, PipelineError::Cv(CvError::MissingModel(FoldId(2)))),
        "{err}"
    );
    assert_eq!(read_meta(&summary.run_dir).status, RunStatus::Failed);
    assert!(!root.join("out").join("sig_pred.jsonl").exists());
}

/// Fits like [`MeanFitter`] except on the fold whose validation set is `fail_on`.
struct FailingFitter {
    fail_on: &'static str,
}

impl ModelFitter for FailingFitter {
    type Model = MeanModel;

    fn fit(
        &self,
        train: &TrainDataset,
        eval_sets: &[EvalSet<'_>],
    ) -> Result<FitOutcome<Self::Model>, FitError> {
        if eval_sets.iter().any(|set| set.name == self.fail_on) {
            return Err(FitError::new("boom"));
        }
        MeanFitter.fit(train, eval_sets)
    }
}

#[test]
fn failed_fold_leaves_no_models_and_a_failed_run() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write_datasets(root, &Events::generate(N_EVENTS));

    let config = load_train_config(&write_train_config(root, 4, "")).unwrap();
    let err = run_training_with(&config, &FailingFitter { fail_on: "valid_1" }, Vec::new())
        .unwrap_err();
    assert!(
        matches!(err, PipelineError::Cv(CvError::Fit { fold: FoldId(1), .. })),
        "{err}"
    );

    let experiment = root.join("mlruns").join("0");
    let runs: Vec<PathBuf> = std::fs::read_dir(&experiment)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(runs.len(), 1);
    let run_dir = &runs[0];
    assert_eq!(read_meta(run_dir).status, RunStatus::Failed);
    let models: Vec<_> = std::fs::read_dir(run_dir.join("artifacts"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("model_"))
        .collect();
    assert!(models.is_empty(), "{models:?}");

    let run_id = run_dir.file_name().unwrap().to_string_lossy().into_owned();
    let predict = load_predict_config(&write_predict_config(root, "jsonl", false)).unwrap();
    let err = run_prediction_with::<MeanModel>(&predict, Some(run_id.as_str())).unwrap_err();
    assert!(
        matches!(err, PipelineError::Tracking(TrackingError::RunFailed(_))),
        "{err}"
    );
    assert_eq!(read_meta(run_dir).status, RunStatus::Failed);
}

#[test]
fn imbalanced_training_data_never_opens_a_run() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let mut events = Events::generate(N_EVENTS);
    for evt in events.evt.iter_mut().take(120) {
        *evt = *evt * 4.0 + 1000.0;
    }
    write_datasets(root, &events);

    let config = load_train_config(&write_train_config(root, 4, "")).unwrap();
    let err = run_training_with(&config, &MeanFitter, Vec::new()).unwrap_err();
    assert!(
        matches!(err, PipelineError::Cv(CvError::ImbalancedSplit { .. })),
        "{err}"
    );
    let experiment = root.join("mlruns").join("0");
    let runs = std::fs::read_dir(&experiment)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(runs, 0);
}

#[test]
fn holdout_run_scores_all_records_with_one_model() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write_datasets(root, &Events::generate(N_EVENTS));

    let config = load_train_config(&write_train_config(root, 1, "train_size = 0.8")).unwrap();
    let summary = run_training(&config).unwrap();
    assert_eq!(summary.n_models, 1);

    let predict = load_predict_config(&write_predict_config(root, "jsonl", true)).unwrap();
    let outcomes = run_prediction(&predict, Some(summary.run_id.as_str())).unwrap();
    assert_eq!(outcomes[0].scoring, Scoring::Holdout);
    let text = std::fs::read_to_string(&outcomes[0].output).unwrap();
    let records: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), N_EVENTS);
    assert!(records.iter().all(|record| record["fold"] == 0));
}

#[test]
fn default_tracking_root_lives_under_crossfold_home() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write_datasets(root, &Events::generate(N_EVENTS));
    let _guard = CrossfoldEnvGuard::set_home(root.join("home"));

    let mut config = load_train_config(&write_train_config(root, 4, "")).unwrap();
    config.tracking_root = None;
    let summary = run_training_with(&config, &MeanFitter, Vec::new()).unwrap();
    let expected = root
        .join("home")
        .join(".crossfold")
        .join("mlruns")
        .join("0")
        .join(&summary.run_id);
    assert_eq!(summary.run_dir, expected);
    assert_eq!(read_meta(&expected).status, RunStatus::Finished);
}
