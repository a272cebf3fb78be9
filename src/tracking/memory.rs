use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{ModelSignature, Tracker, TrackingError};

#[derive(Debug, Clone, PartialEq)]
pub struct LoggedMetric {
    pub name: String,
    pub value: f64,
    pub step: u64,
}

#[derive(Debug, Clone)]
pub struct LoggedModel {
    pub name: String,
    pub model: serde_json::Value,
    pub signature: ModelSignature,
    pub input_example: Vec<f64>,
}

/// In-memory tracker for tests and dry runs.
#[derive(Debug, Clone)]
pub struct RecordingTracker {
    run_id: String,
    pub params: BTreeMap<String, String>,
    pub metrics: Vec<LoggedMetric>,
    pub models: Vec<LoggedModel>,
    pub artifacts: Vec<(PathBuf, String)>,
}

impl Default for RecordingTracker {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl RecordingTracker {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            params: BTreeMap::new(),
            metrics: Vec::new(),
            models: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn model(&self, name: &str) -> Option<&LoggedModel> {
        self.models.iter().find(|model| model.name == name)
    }

    /// Metric values logged under `name`, in step order.
    pub fn metric_series(&self, name: &str) -> Vec<f64> {
        let mut series: Vec<&LoggedMetric> =
            self.metrics.iter().filter(|m| m.name == name).collect();
        series.sort_by_key(|m| m.step);
        series.into_iter().map(|m| m.value).collect()
    }
}

impl Tracker for RecordingTracker {
    fn run_id(&self) -> &str {
        &self.run_id
    }

    fn log_params(&mut self, params: &BTreeMap<String, String>) -> Result<(), TrackingError> {
        for (key, value) in params {
            if let Some(existing) = self.params.get(key) {
                if existing != value {
                    return Err(TrackingError::ParamConflict {
                        key: key.clone(),
                        existing: existing.clone(),
                        new: value.clone(),
                    });
                }
            }
        }
        self.params
            .extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn log_metric(&mut self, name: &str, value: f64, step: u64) -> Result<(), TrackingError> {
        self.metrics.push(LoggedMetric {
            name: name.to_string(),
            value,
            step,
        });
        Ok(())
    }

    fn log_model(
        &mut self,
        name: &str,
        model: &serde_json::Value,
        signature: &ModelSignature,
        input_example: &[f64],
    ) -> Result<(), TrackingError> {
        self.models.push(LoggedModel {
            name: name.to_string(),
            model: model.clone(),
            signature: signature.clone(),
            input_example: input_example.to_vec(),
        });
        Ok(())
    }

    fn log_artifact(&mut self, path: &Path, artifact_dir: &str) -> Result<(), TrackingError> {
        self.artifacts
            .push((path.to_path_buf(), artifact_dir.to_string()));
        Ok(())
    }
}
