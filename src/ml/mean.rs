//! Reference model that predicts the weighted mean of its training target.

use serde::{Deserialize, Serialize};

use super::metrics::{weighted_l2, weighted_mean_target};
use super::{EvalSeries, EvalSet, FitError, FitOutcome, ModelFitter, Predictor, TrainDataset};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanModel {
    pub feature_names: Vec<String>,
    pub mean: f64,
}

impl Predictor for MeanModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn n_outputs(&self) -> usize {
        1
    }

    fn predict_row(&self, _features: &[f64]) -> Vec<f64> {
        vec![self.mean]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MeanFitter;

impl ModelFitter for MeanFitter {
    type Model = MeanModel;

    fn fit(
        &self,
        train: &TrainDataset,
        eval_sets: &[EvalSet<'_>],
    ) -> Result<FitOutcome<MeanModel>, FitError> {
        train.validate()?;
        let mean = weighted_mean_target(&train.y, &train.weight)
            .ok_or_else(|| FitError::new("Training weights must sum to a positive value"))?;
        let history = eval_sets
            .iter()
            .map(|set| EvalSeries {
                dataset: set.name.to_string(),
                metric: "l2".to_string(),
                values: vec![weighted_l2(
                    &set.data.y,
                    &vec![mean; set.data.len()],
                    &set.data.weight,
                )],
            })
            .collect();
        Ok(FitOutcome {
            model: MeanModel {
                feature_names: train.feature_names.clone(),
                mean,
            },
            history,
        })
    }
}
