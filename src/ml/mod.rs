//! Model-fitting capability consumed by the cross-validation engine.
//!
//! The engine only relies on [`ModelFitter`] and [`Predictor`]; the bundled
//! implementations are a weighted stump booster ([`gbdt`]) and a weighted-mean
//! reference model ([`mean`]).

pub mod gbdt;
pub mod mean;
pub mod metrics;

use thiserror::Error;

/// A fitting failure reported by a [`ModelFitter`].
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct FitError(pub String);

impl FitError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// In-memory dataset handed to a fitter.
#[derive(Debug, Clone, Default)]
pub struct TrainDataset {
    /// Ordered feature names; row values follow this order.
    pub feature_names: Vec<String>,
    /// Positions in `feature_names` holding categorical codes.
    pub categorical: Vec<usize>,
    /// Feature matrix, row-major.
    pub x: Vec<Vec<f64>>,
    /// Targets aligned with `x`.
    pub y: Vec<f64>,
    /// Per-row weights aligned with `x`.
    pub weight: Vec<f64>,
}

impl TrainDataset {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Check the row/target/weight alignment and feature widths.
    pub fn validate(&self) -> Result<(), FitError> {
        if self.x.len() != self.y.len() || self.x.len() != self.weight.len() {
            return Err(FitError::new(format!(
                "mismatched lengths: x={} y={} weight={}",
                self.x.len(),
                self.y.len(),
                self.weight.len()
            )));
        }
        let width = self.feature_names.len();
        if let Some(row) = self.x.iter().position(|row| row.len() != width) {
            return Err(FitError::new(format!(
                "row {row} has {} features, expected {width}",
                self.x[row].len()
            )));
        }
        if let Some(&idx) = self.categorical.iter().find(|&&idx| idx >= width) {
            return Err(FitError::new(format!(
                "categorical index {idx} out of range for {width} features"
            )));
        }
        Ok(())
    }

    /// Sum of row weights.
    pub fn total_weight(&self) -> f64 {
        self.weight.iter().sum()
    }
}

/// A named dataset evaluated after every boosting iteration.
#[derive(Debug, Clone, Copy)]
pub struct EvalSet<'a> {
    pub name: &'a str,
    pub data: &'a TrainDataset,
}

/// Metric values for one evaluation set, one entry per iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalSeries {
    pub dataset: String,
    pub metric: String,
    pub values: Vec<f64>,
}

/// Result of a successful fit.
#[derive(Debug, Clone)]
pub struct FitOutcome<M> {
    pub model: M,
    pub history: Vec<EvalSeries>,
}

/// Trained model capability: score one feature row.
pub trait Predictor {
    /// Input features in the order `predict_row` expects them.
    fn feature_names(&self) -> &[String];
    /// Number of scores returned per row.
    fn n_outputs(&self) -> usize;
    fn predict_row(&self, features: &[f64]) -> Vec<f64>;

    /// Structural check run after a model is deserialized.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Opaque training capability: `fit(train, validation sets) -> model`.
pub trait ModelFitter {
    type Model: Predictor;

    fn fit(
        &self,
        train: &TrainDataset,
        eval_sets: &[EvalSet<'_>],
    ) -> Result<FitOutcome<Self::Model>, FitError>;
}
