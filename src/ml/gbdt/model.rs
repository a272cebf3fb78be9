use serde::{Deserialize, Serialize};

use crate::ml::Predictor;

/// Training objective, which also fixes the output transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    #[default]
    Regression,
    Binary,
    Multiclass,
}

impl Objective {
    /// Name of the metric evaluated for this objective.
    pub fn metric_name(self) -> &'static str {
        match self {
            Objective::Regression => "l2",
            Objective::Binary => "binary_logloss",
            Objective::Multiclass => "multi_logloss",
        }
    }
}

/// Branch condition of a stump; rows satisfying it take the left value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SplitRule {
    /// `feature <= threshold`.
    Threshold { threshold: f64 },
    /// `feature == category`.
    Category { category: i64 },
}

/// Single-node decision tree used as a weak learner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stump {
    /// Feature index used for the split.
    pub feature_index: u16,
    pub rule: SplitRule,
    pub left_value: f64,
    pub right_value: f64,
}

impl Stump {
    /// Missing or NaN values always go right.
    pub fn goes_left(&self, features: &[f64]) -> bool {
        let value = features
            .get(self.feature_index as usize)
            .copied()
            .unwrap_or(f64::NAN);
        match self.rule {
            SplitRule::Threshold { threshold } => value <= threshold,
            SplitRule::Category { category } => value == category as f64,
        }
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        if self.goes_left(features) {
            self.left_value
        } else {
            self.right_value
        }
    }
}

/// Gradient-boosted stump model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbdtModel {
    /// Model format version.
    pub model_version: i64,
    pub objective: Objective,
    /// Ordered input feature names.
    pub feature_names: Vec<String>,
    /// Positions of categorical features in `feature_names`.
    pub categorical: Vec<usize>,
    pub learning_rate: f64,
    /// Initial raw scores, one per output.
    pub init_raw: Vec<f64>,
    /// Shape: `[n_iterations][n_outputs]`.
    pub stumps: Vec<Vec<Stump>>,
}

impl GbdtModel {
    /// Validate structural invariants of the model.
    pub fn check(&self) -> Result<(), String> {
        let outputs = self.init_raw.len();
        match self.objective {
            Objective::Multiclass if outputs < 2 => {
                return Err("Multiclass model must have at least 2 outputs".to_string());
            }
            Objective::Regression | Objective::Binary if outputs != 1 => {
                return Err(format!(
                    "{:?} model must have exactly 1 output, found {outputs}",
                    self.objective
                ));
            }
            _ => {}
        }
        for (round_idx, round) in self.stumps.iter().enumerate() {
            if round.len() != outputs {
                return Err(format!(
                    "Iteration {round_idx} has {} stumps but expected {outputs}",
                    round.len()
                ));
            }
            if let Some(stump) = round
                .iter()
                .find(|stump| stump.feature_index as usize >= self.feature_names.len())
            {
                return Err(format!(
                    "Iteration {round_idx} references feature {} of {}",
                    stump.feature_index,
                    self.feature_names.len()
                ));
            }
        }
        Ok(())
    }

    /// Raw (untransformed) scores for a feature row.
    pub fn predict_raw(&self, features: &[f64]) -> Vec<f64> {
        let mut raw = self.init_raw.clone();
        for round in &self.stumps {
            for (output, stump) in round.iter().enumerate() {
                raw[output] += self.learning_rate * stump.predict(features);
            }
        }
        raw
    }

    /// Apply the objective's output transform to raw scores.
    pub fn transform(&self, raw: &[f64]) -> Vec<f64> {
        match self.objective {
            Objective::Regression => raw.to_vec(),
            Objective::Binary => raw.iter().map(|&v| sigmoid(v)).collect(),
            Objective::Multiclass => softmax(raw),
        }
    }
}

impl Predictor for GbdtModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn n_outputs(&self) -> usize {
        self.init_raw.len()
    }

    fn predict_row(&self, features: &[f64]) -> Vec<f64> {
        self.transform(&self.predict_raw(features))
    }

    fn validate(&self) -> Result<(), String> {
        self.check()
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Compute a numerically-stable softmax for a set of logits.
pub fn softmax(raw: &[f64]) -> Vec<f64> {
    if raw.is_empty() {
        return Vec::new();
    }
    let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = raw.iter().map(|&v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        return vec![1.0 / raw.len() as f64; raw.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}
