use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::model::{GbdtModel, Objective, SplitRule, Stump, sigmoid, softmax};
use crate::dataset::integral_value;
use crate::ml::metrics::{binary_logloss, multi_logloss, weighted_l2, weighted_mean_target};
use crate::ml::{EvalSeries, EvalSet, FitError, FitOutcome, ModelFitter, TrainDataset};

const MODEL_VERSION: i64 = 1;
const PROB_FLOOR: f64 = 1e-6;

/// Boosting hyperparameters, read from the `model_param` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbdtParams {
    pub objective: Objective,
    /// Number of classes; only read for `multiclass`.
    pub num_class: usize,
    #[serde(alias = "num_boost_round", alias = "n_estimators")]
    pub num_iterations: usize,
    #[serde(alias = "eta")]
    pub learning_rate: f64,
    /// Number of bins used for numeric split search.
    pub max_bin: usize,
}

impl Default for GbdtParams {
    fn default() -> Self {
        Self {
            objective: Objective::Regression,
            num_class: 1,
            num_iterations: 100,
            learning_rate: 0.1,
            max_bin: 32,
        }
    }
}

impl GbdtParams {
    pub fn validate(&self) -> Result<(), FitError> {
        if self.objective == Objective::Multiclass && self.num_class < 2 {
            return Err(FitError::new(format!(
                "multiclass objective needs num_class >= 2, got {}",
                self.num_class
            )));
        }
        if !(self.learning_rate > 0.0) {
            return Err(FitError::new(format!(
                "learning_rate should be positive, got {}",
                self.learning_rate
            )));
        }
        if self.max_bin < 2 {
            return Err(FitError::new(format!(
                "max_bin should be at least 2, got {}",
                self.max_bin
            )));
        }
        Ok(())
    }

    /// Number of raw scores per row.
    pub fn n_outputs(&self) -> usize {
        match self.objective {
            Objective::Multiclass => self.num_class,
            Objective::Regression | Objective::Binary => 1,
        }
    }

    /// Flattened parameters for tracking.
    pub fn param_map(&self) -> BTreeMap<String, String> {
        let objective = match self.objective {
            Objective::Regression => "regression",
            Objective::Binary => "binary",
            Objective::Multiclass => "multiclass",
        };
        BTreeMap::from([
            ("objective".to_string(), objective.to_string()),
            ("num_class".to_string(), self.n_outputs().to_string()),
            ("num_iterations".to_string(), self.num_iterations.to_string()),
            ("learning_rate".to_string(), self.learning_rate.to_string()),
            ("max_bin".to_string(), self.max_bin.to_string()),
        ])
    }
}

/// [`ModelFitter`] backed by [`train_gbdt`].
#[derive(Debug, Clone, Default)]
pub struct GbdtFitter {
    params: GbdtParams,
}

impl GbdtFitter {
    pub fn new(params: GbdtParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &GbdtParams {
        &self.params
    }
}

impl ModelFitter for GbdtFitter {
    type Model = GbdtModel;

    fn fit(
        &self,
        train: &TrainDataset,
        eval_sets: &[EvalSet<'_>],
    ) -> Result<FitOutcome<GbdtModel>, FitError> {
        train_gbdt(train, eval_sets, &self.params)
    }
}

/// Stumps store their feature index as `u16`.
const MAX_FEATURES: usize = u16::MAX as usize + 1;

/// Train a stump booster, evaluating every set in `eval_sets` after each iteration.
pub fn train_gbdt(
    dataset: &TrainDataset,
    eval_sets: &[EvalSet<'_>],
    params: &GbdtParams,
) -> Result<FitOutcome<GbdtModel>, FitError> {
    params.validate()?;
    dataset.validate()?;
    if dataset.is_empty() {
        return Err(FitError::new("Empty training set"));
    }
    if dataset.feature_names.is_empty() {
        return Err(FitError::new("Training set has no features"));
    }
    if dataset.feature_names.len() > MAX_FEATURES {
        return Err(FitError::new(format!(
            "Training set has {} features, stumps index at most {MAX_FEATURES}",
            dataset.feature_names.len()
        )));
    }
    if !(dataset.total_weight() > 0.0) {
        return Err(FitError::new("Training weights must sum to a positive value"));
    }
    for set in eval_sets {
        set.data.validate()?;
        if set.data.feature_names != dataset.feature_names {
            return Err(FitError::new(format!(
                "evaluation set {} has a different feature layout",
                set.name
            )));
        }
    }

    let n_outputs = params.n_outputs();
    let targets = encode_targets(&dataset.y, params)?;
    for set in eval_sets {
        encode_targets(&set.data.y, params)
            .map_err(|err| FitError::new(format!("evaluation set {}: {err}", set.name)))?;
    }

    let bins = fit_feature_bins(dataset, params.max_bin)?;
    let codes = encode_rows(&bins, &dataset.x);
    let init_raw = initial_scores(&targets, &dataset.weight, params.objective)?;

    let mut raw = vec![init_raw.clone(); dataset.len()];
    let mut eval_raw: Vec<Vec<Vec<f64>>> = eval_sets
        .iter()
        .map(|set| vec![init_raw.clone(); set.data.len()])
        .collect();
    let mut history: Vec<EvalSeries> = eval_sets
        .iter()
        .map(|set| EvalSeries {
            dataset: set.name.to_string(),
            metric: params.objective.metric_name().to_string(),
            values: Vec::with_capacity(params.num_iterations),
        })
        .collect();

    let lr = params.learning_rate;
    let mut stumps = Vec::with_capacity(params.num_iterations);
    for _iteration in 0..params.num_iterations {
        let residuals = pseudo_residuals(&targets, &raw, params.objective);
        let mut round = Vec::with_capacity(n_outputs);
        for (output, output_residuals) in residuals.iter().enumerate() {
            let stump = fit_stump(&bins, &codes, &dataset.x, output_residuals, &dataset.weight);
            for (row, features) in dataset.x.iter().enumerate() {
                raw[row][output] += lr * stump.predict(features);
            }
            for (set, set_raw) in eval_sets.iter().zip(eval_raw.iter_mut()) {
                for (row, features) in set.data.x.iter().enumerate() {
                    set_raw[row][output] += lr * stump.predict(features);
                }
            }
            round.push(stump);
        }
        stumps.push(round);
        for ((set, set_raw), series) in eval_sets.iter().zip(&eval_raw).zip(history.iter_mut()) {
            series
                .values
                .push(evaluate(params.objective, set.data, set_raw));
        }
    }

    let model = GbdtModel {
        model_version: MODEL_VERSION,
        objective: params.objective,
        feature_names: dataset.feature_names.clone(),
        categorical: dataset.categorical.clone(),
        learning_rate: lr,
        init_raw,
        stumps,
    };
    model.check().map_err(FitError::new)?;
    Ok(FitOutcome { model, history })
}

/// Per-output targets: `[output][row]`.
fn encode_targets(y: &[f64], params: &GbdtParams) -> Result<Vec<Vec<f64>>, FitError> {
    match params.objective {
        Objective::Regression => {
            if let Some(v) = y.iter().find(|v| !v.is_finite()) {
                return Err(FitError::new(format!("non-finite regression target {v}")));
            }
            Ok(vec![y.to_vec()])
        }
        Objective::Binary => {
            if let Some(v) = y.iter().find(|&&v| v != 0.0 && v != 1.0) {
                return Err(FitError::new(format!("binary target must be 0 or 1, got {v}")));
            }
            Ok(vec![y.to_vec()])
        }
        Objective::Multiclass => {
            let k = params.num_class;
            let mut onehot = vec![vec![0.0; y.len()]; k];
            for (row, &v) in y.iter().enumerate() {
                let class = integral_value(v)
                    .filter(|&c| c >= 0 && (c as usize) < k)
                    .ok_or_else(|| {
                        FitError::new(format!("class label {v} outside [0, {k})"))
                    })?;
                onehot[class as usize][row] = 1.0;
            }
            Ok(onehot)
        }
    }
}

fn initial_scores(
    targets: &[Vec<f64>],
    weight: &[f64],
    objective: Objective,
) -> Result<Vec<f64>, FitError> {
    targets
        .iter()
        .map(|target| {
            let mean = weighted_mean_target(target, weight)
                .ok_or_else(|| FitError::new("Training weights must sum to a positive value"))?;
            Ok(match objective {
                Objective::Regression => mean,
                Objective::Binary => {
                    let p = mean.clamp(PROB_FLOOR, 1.0 - PROB_FLOOR);
                    (p / (1.0 - p)).ln()
                }
                Objective::Multiclass => mean.max(PROB_FLOOR).ln(),
            })
        })
        .collect()
}

/// Negative gradients of the loss: `[output][row]`.
fn pseudo_residuals(targets: &[Vec<f64>], raw: &[Vec<f64>], objective: Objective) -> Vec<Vec<f64>> {
    let n = raw.len();
    let mut residuals = vec![vec![0.0f64; n]; targets.len()];
    match objective {
        Objective::Regression => {
            for row in 0..n {
                residuals[0][row] = targets[0][row] - raw[row][0];
            }
        }
        Objective::Binary => {
            for row in 0..n {
                residuals[0][row] = targets[0][row] - sigmoid(raw[row][0]);
            }
        }
        Objective::Multiclass => {
            for row in 0..n {
                let probs = softmax(&raw[row]);
                for (k, output) in residuals.iter_mut().enumerate() {
                    output[row] = targets[k][row] - probs[k];
                }
            }
        }
    }
    residuals
}

fn evaluate(objective: Objective, data: &TrainDataset, raw: &[Vec<f64>]) -> f64 {
    match objective {
        Objective::Regression => {
            let pred: Vec<f64> = raw.iter().map(|r| r[0]).collect();
            weighted_l2(&data.y, &pred, &data.weight)
        }
        Objective::Binary => {
            let prob: Vec<f64> = raw.iter().map(|r| sigmoid(r[0])).collect();
            binary_logloss(&data.y, &prob, &data.weight)
        }
        Objective::Multiclass => {
            let probs: Vec<Vec<f64>> = raw.iter().map(|r| softmax(r)).collect();
            multi_logloss(&data.y, &probs, &data.weight)
        }
    }
}

#[derive(Debug, Clone)]
enum FeatureBins {
    Numeric { min: f64, max: f64, bins: usize },
    Categorical { categories: Vec<i64> },
}

impl FeatureBins {
    fn n_codes(&self) -> usize {
        match self {
            FeatureBins::Numeric { bins, .. } => *bins,
            FeatureBins::Categorical { categories } => categories.len(),
        }
    }

    /// Bin code for a value; `None` for missing values and unseen categories.
    fn code(&self, value: f64) -> Option<usize> {
        if !value.is_finite() {
            return None;
        }
        match self {
            FeatureBins::Numeric { min, max, bins } => {
                let t = ((value - min) / (max - min)).clamp(0.0, 1.0);
                Some(((t * *bins as f64).floor() as usize).min(bins - 1))
            }
            FeatureBins::Categorical { categories } => {
                let category = integral_value(value)?;
                categories.binary_search(&category).ok()
            }
        }
    }
}

fn fit_feature_bins(dataset: &TrainDataset, max_bin: usize) -> Result<Vec<FeatureBins>, FitError> {
    let categorical: BTreeSet<usize> = dataset.categorical.iter().copied().collect();
    let bins = max_bin.clamp(2, 1024);
    (0..dataset.feature_names.len())
        .map(|j| {
            if categorical.contains(&j) {
                let mut categories = BTreeSet::new();
                for row in &dataset.x {
                    let v = row[j];
                    if !v.is_finite() {
                        continue;
                    }
                    let category = integral_value(v).ok_or_else(|| {
                        FitError::new(format!(
                            "categorical feature {} holds non-integral value {v}",
                            dataset.feature_names[j]
                        ))
                    })?;
                    categories.insert(category);
                }
                Ok(FeatureBins::Categorical {
                    categories: categories.into_iter().collect(),
                })
            } else {
                let mut min = f64::INFINITY;
                let mut max = f64::NEG_INFINITY;
                for row in &dataset.x {
                    let v = row[j];
                    if v.is_finite() {
                        min = min.min(v);
                        max = max.max(v);
                    }
                }
                if !min.is_finite() || !max.is_finite() {
                    min = 0.0;
                    max = 0.0;
                }
                if min == max {
                    max = min + 1.0;
                }
                Ok(FeatureBins::Numeric { min, max, bins })
            }
        })
        .collect()
}

fn encode_rows(bins: &[FeatureBins], x: &[Vec<f64>]) -> Vec<Vec<Option<usize>>> {
    x.iter()
        .map(|row| {
            bins.iter()
                .enumerate()
                .map(|(j, feature)| feature.code(row[j]))
                .collect()
        })
        .collect()
}

/// Weighted sufficient statistics of residuals.
#[derive(Debug, Clone, Copy, Default)]
struct Moments {
    w: f64,
    wr: f64,
    wr2: f64,
}

impl Moments {
    fn add(&mut self, r: f64, w: f64) {
        self.w += w;
        self.wr += w * r;
        self.wr2 += w * r * r;
    }

    fn minus(self, other: Moments) -> Moments {
        Moments {
            w: self.w - other.w,
            wr: self.wr - other.wr,
            wr2: self.wr2 - other.wr2,
        }
    }

    fn sse(self) -> f64 {
        self.wr2 - (self.wr * self.wr) / self.w
    }
}

#[derive(Debug, Clone, Copy)]
struct BestSplit {
    score: f64,
    feature_index: usize,
    rule: SplitRule,
}

fn fit_stump(
    bins: &[FeatureBins],
    codes: &[Vec<Option<usize>>],
    x: &[Vec<f64>],
    residuals: &[f64],
    weight: &[f64],
) -> Stump {
    let mut best: Option<BestSplit> = None;
    for (feature_idx, feature) in bins.iter().enumerate() {
        if let Some(split) = best_split_for_feature(feature, feature_idx, codes, residuals, weight)
            && best.is_none_or(|b| split.score < b.score)
        {
            best = Some(split);
        }
    }

    let Some(best) = best else {
        let mean = weighted_mean_target(residuals, weight).unwrap_or(0.0);
        return Stump {
            feature_index: 0,
            rule: SplitRule::Threshold {
                threshold: f64::MAX,
            },
            left_value: mean,
            right_value: mean,
        };
    };
    let mut stump = Stump {
        // train_gbdt caps the feature count at MAX_FEATURES.
        feature_index: best.feature_index as u16,
        rule: best.rule,
        left_value: 0.0,
        right_value: 0.0,
    };
    let (left, right) = leaf_means(&stump, x, residuals, weight);
    stump.left_value = left;
    stump.right_value = right;
    stump
}

fn best_split_for_feature(
    feature: &FeatureBins,
    feature_idx: usize,
    codes: &[Vec<Option<usize>>],
    residuals: &[f64],
    weight: &[f64],
) -> Option<BestSplit> {
    let n_codes = feature.n_codes();
    if n_codes < 2 && matches!(feature, FeatureBins::Numeric { .. }) {
        return None;
    }
    let mut per_code = vec![Moments::default(); n_codes];
    let mut total = Moments::default();
    for (row, row_codes) in codes.iter().enumerate() {
        let (r, w) = (residuals[row], weight[row]);
        total.add(r, w);
        if let Some(code) = row_codes[feature_idx] {
            per_code[code].add(r, w);
        }
    }

    let mut best: Option<(f64, usize)> = None;
    let mut consider = |left: Moments, code: usize| {
        let right = total.minus(left);
        if left.w <= 0.0 || right.w <= 0.0 {
            return;
        }
        let score = left.sse() + right.sse();
        if best.is_none_or(|(s, _)| score < s) {
            best = Some((score, code));
        }
    };

    match feature {
        FeatureBins::Numeric { min, max, bins } => {
            let mut left = Moments::default();
            for (code, moments) in per_code.iter().enumerate().take(n_codes - 1) {
                left.w += moments.w;
                left.wr += moments.wr;
                left.wr2 += moments.wr2;
                consider(left, code);
            }
            let (score, code) = best?;
            let t = (code + 1) as f64 / *bins as f64;
            Some(BestSplit {
                score,
                feature_index: feature_idx,
                rule: SplitRule::Threshold {
                    threshold: min + t * (max - min),
                },
            })
        }
        FeatureBins::Categorical { categories } => {
            for (code, moments) in per_code.iter().enumerate() {
                consider(*moments, code);
            }
            let (score, code) = best?;
            Some(BestSplit {
                score,
                feature_index: feature_idx,
                rule: SplitRule::Category {
                    category: categories[code],
                },
            })
        }
    }
}

fn leaf_means(stump: &Stump, x: &[Vec<f64>], residuals: &[f64], weight: &[f64]) -> (f64, f64) {
    let mut left = Moments::default();
    let mut right = Moments::default();
    for (row, features) in x.iter().enumerate() {
        if stump.goes_left(features) {
            left.add(residuals[row], weight[row]);
        } else {
            right.add(residuals[row], weight[row]);
        }
    }
    let mean = |m: Moments| if m.w > 0.0 { m.wr / m.w } else { 0.0 };
    (mean(left), mean(right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::Predictor;

    fn step_dataset() -> TrainDataset {
        let x: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let y: Vec<f64> = (0..40).map(|i| if i < 20 { 0.0 } else { 1.0 }).collect();
        TrainDataset {
            feature_names: vec!["x".into(), "c".into()],
            categorical: vec![1],
            weight: vec![1.0; x.len()],
            x,
            y,
        }
    }

    #[test]
    fn regression_learns_step_function() {
        let data = step_dataset();
        let params = GbdtParams {
            num_iterations: 50,
            learning_rate: 0.3,
            ..GbdtParams::default()
        };
        let outcome = train_gbdt(&data, &[EvalSet { name: "train", data: &data }], &params).unwrap();
        let model = outcome.model;
        assert!(model.predict_row(&[2.0, 0.0])[0] < 0.2);
        assert!(model.predict_row(&[35.0, 0.0])[0] > 0.8);
        let series = &outcome.history[0];
        assert_eq!(series.metric, "l2");
        assert_eq!(series.values.len(), 50);
        assert!(series.values[49] < series.values[0]);
    }

    #[test]
    fn binary_objective_is_deterministic() {
        let data = step_dataset();
        let params = GbdtParams {
            objective: Objective::Binary,
            num_iterations: 20,
            ..GbdtParams::default()
        };
        let a = train_gbdt(&data, &[], &params).unwrap().model;
        let b = train_gbdt(&data, &[], &params).unwrap().model;
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
        let p = a.predict_row(&[39.0, 1.0])[0];
        assert!(p > 0.5 && p < 1.0);
    }

    #[test]
    fn multiclass_outputs_one_probability_per_class() {
        let mut data = step_dataset();
        data.y = (0..40).map(|i| (i / 14) as f64).collect();
        let params = GbdtParams {
            objective: Objective::Multiclass,
            num_class: 3,
            num_iterations: 10,
            ..GbdtParams::default()
        };
        let model = train_gbdt(&data, &[], &params).unwrap().model;
        let probs = model.predict_row(&[1.0, 0.0]);
        assert_eq!(probs.len(), 3);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn categorical_split_isolates_one_category() {
        let x: Vec<Vec<f64>> = (0..30).map(|i| vec![(i % 3) as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| if r[0] == 1.0 { 5.0 } else { 0.0 }).collect();
        let data = TrainDataset {
            feature_names: vec!["c".into()],
            categorical: vec![0],
            weight: vec![1.0; 30],
            x,
            y,
        };
        let params = GbdtParams {
            num_iterations: 1,
            learning_rate: 1.0,
            ..GbdtParams::default()
        };
        let model = train_gbdt(&data, &[], &params).unwrap().model;
        assert_eq!(model.stumps[0][0].rule, SplitRule::Category { category: 1 });
        assert!((model.predict_row(&[1.0])[0] - 5.0).abs() < 1e-9);
        assert!(model.predict_row(&[2.0])[0].abs() < 1e-9);
    }

    #[test]
    fn rejects_invalid_labels_and_empty_input() {
        let mut data = step_dataset();
        data.y[0] = 2.0;
        let params = GbdtParams {
            objective: Objective::Binary,
            ..GbdtParams::default()
        };
        assert!(train_gbdt(&data, &[], &params).is_err());
        assert!(train_gbdt(&TrainDataset::default(), &[], &GbdtParams::default()).is_err());
    }

    #[test]
    fn rejects_more_features_than_a_stump_can_index() {
        let width = MAX_FEATURES + 1;
        let data = TrainDataset {
            feature_names: (0..width).map(|i| format!("f{i}")).collect(),
            categorical: Vec::new(),
            x: vec![vec![0.0; width], vec![1.0; width]],
            y: vec![0.0, 1.0],
            weight: vec![1.0, 1.0],
        };
        let err = train_gbdt(&data, &[], &GbdtParams::default()).unwrap_err();
        assert!(err.to_string().contains("features"), "{err}");
    }

    #[test]
    fn params_accept_lightgbm_aliases() {
        let table: toml::Table = toml::from_str(
            "objective = \"binary\"\nnum_boost_round = 7\nnum_leaves = 31\n",
        )
        .unwrap();
        let params: GbdtParams = toml::Value::Table(table).try_into().unwrap();
        assert_eq!(params.objective, Objective::Binary);
        assert_eq!(params.num_iterations, 7);
        assert_eq!(params.param_map()["num_iterations"], "7");
    }
}
