//! TOML configuration for the training and prediction programs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app_dirs;
use crate::cv::{CvError, DEFAULT_HOLDOUT_SEED, FeatureSpec, SplitPlan};
use crate::dataset::OutputFormat;
use crate::ml::gbdt::GbdtParams;

/// Placeholder expanded with each input sample name.
pub const SAMPLE_NAME_PLACEHOLDER: &str = "{sample_name}";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid model_param table: {0}")]
    ModelParam(toml::de::Error),
    #[error("Invalid setting: {0}")]
    Invalid(#[from] CvError),
    #[error("No tracking_root configured and no default directory available: {0}")]
    NoTrackingRoot(#[from] app_dirs::AppDirError),
}

/// Settings of `crossfold-train`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Dataset directory with the training records.
    pub train_file: PathBuf,
    #[serde(default)]
    pub tracking_root: Option<PathBuf>,
    #[serde(default = "default_experiment_id")]
    pub experiment_id: String,
    #[serde(default)]
    pub cont_features: Vec<String>,
    #[serde(default)]
    pub cat_features: Vec<String>,
    #[serde(default)]
    pub weight_name: Option<String>,
    #[serde(default = "default_target_name")]
    pub target_name: String,
    /// Grouping feature whose value modulo `n_splits` gives the fold id.
    pub xtrain_split_feature: String,
    pub n_splits: i64,
    /// Training fraction of the single holdout split; required when `n_splits == 1`.
    #[serde(default)]
    pub train_size: Option<f64>,
    #[serde(default = "default_split_seed")]
    pub split_seed: u64,
    /// Identity key columns; row positions when empty.
    #[serde(default)]
    pub key_columns: Vec<String>,
    #[serde(default)]
    pub model_param: toml::Table,
}

impl TrainConfig {
    pub fn split_plan(&self) -> Result<SplitPlan, ConfigError> {
        Ok(SplitPlan::from_settings(
            self.n_splits,
            self.train_size,
            self.split_seed,
        )?)
    }

    pub fn feature_spec(&self) -> FeatureSpec {
        FeatureSpec {
            continuous: self.cont_features.clone(),
            categorical: self.cat_features.clone(),
            weight: self.weight_name.clone(),
            target: self.target_name.clone(),
        }
    }

    pub fn model_params(&self) -> Result<GbdtParams, ConfigError> {
        toml::Value::Table(self.model_param.clone())
            .try_into()
            .map_err(ConfigError::ModelParam)
    }

    pub fn tracking_root(&self) -> Result<PathBuf, ConfigError> {
        resolve_tracking_root(self.tracking_root.as_deref())
    }

    /// Parameters recorded with the training run.
    pub fn tracking_params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::from([
            ("train_file".to_string(), self.train_file.display().to_string()),
            (
                "xtrain_split_feature".to_string(),
                self.xtrain_split_feature.clone(),
            ),
            (
                "weight_name".to_string(),
                self.weight_name.clone().unwrap_or_else(|| "None".to_string()),
            ),
            ("target_name".to_string(), self.target_name.clone()),
            ("n_splits".to_string(), self.n_splits.to_string()),
            ("split_seed".to_string(), self.split_seed.to_string()),
        ]);
        if let Some(train_size) = self.train_size {
            params.insert("train_size".to_string(), train_size.to_string());
        }
        params
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cont_features.is_empty() && self.cat_features.is_empty() {
            return Err(CvError::Configuration(
                "both cont_features and cat_features are empty".to_string(),
            )
            .into());
        }
        self.split_plan()?;
        Ok(())
    }
}

/// Settings of `crossfold-predict`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictConfig {
    #[serde(default)]
    pub tracking_root: Option<PathBuf>,
    #[serde(default = "default_experiment_id")]
    pub experiment_id: String,
    /// Training run holding the fold models; may be given on the command line instead.
    #[serde(default)]
    pub run_id: Option<String>,
    /// Directory holding one dataset directory per sample.
    pub input_path: PathBuf,
    pub input_samples: Vec<String>,
    #[serde(default = "default_input_template")]
    pub input_filename_template: String,
    pub output_path: PathBuf,
    #[serde(default = "default_output_template")]
    pub output_filename_template_pred: String,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub key_columns: Vec<String>,
    /// Input columns copied next to the predictions.
    #[serde(default)]
    pub misc_features: Vec<String>,
    /// Dataset whose key order the output must follow; may contain `{sample_name}`.
    #[serde(default)]
    pub original_path: Option<String>,
}

impl PredictConfig {
    pub fn tracking_root(&self) -> Result<PathBuf, ConfigError> {
        resolve_tracking_root(self.tracking_root.as_deref())
    }

    pub fn input_dir(&self, sample: &str) -> PathBuf {
        self.input_path
            .join(expand_sample(&self.input_filename_template, sample))
    }

    /// Output location, with the format's extension appended.
    pub fn output_file(&self, sample: &str) -> PathBuf {
        let stem = expand_sample(&self.output_filename_template_pred, sample);
        self.output_path
            .join(format!("{stem}.{}", self.output_format.as_str()))
    }

    pub fn original_dir(&self, sample: &str) -> Option<PathBuf> {
        self.original_path
            .as_deref()
            .map(|template| PathBuf::from(expand_sample(template, sample)))
    }

    /// Replace the configured output format, e.g. from the command line.
    pub fn set_output_format(&mut self, name: &str) -> Result<(), ConfigError> {
        self.output_format = name
            .parse::<OutputFormat>()
            .map_err(|err| CvError::Configuration(err.to_string()))?;
        self.validate()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.output_format.requires_canonical_order() && self.original_path.is_none() {
            return Err(CvError::Configuration(format!(
                "output_format {} needs original_path for the canonical record order",
                self.output_format
            ))
            .into());
        }
        if self.original_path.is_some() && self.key_columns.is_empty() {
            return Err(CvError::Configuration(
                "original_path needs key_columns to match records to the canonical order"
                    .to_string(),
            )
            .into());
        }
        Ok(())
    }
}

pub fn load_train_config(path: &Path) -> Result<TrainConfig, ConfigError> {
    let config: TrainConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

pub fn load_predict_config(path: &Path) -> Result<PredictConfig, ConfigError> {
    let config: PredictConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

/// Replace every occurrence of each placeholder in `template`.
pub fn fill_placeholders(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter()
        .fold(template.to_string(), |acc, (key, value)| acc.replace(key, value))
}

fn expand_sample(template: &str, sample: &str) -> String {
    fill_placeholders(template, &[(SAMPLE_NAME_PLACEHOLDER, sample)])
}

fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })
}

fn resolve_tracking_root(configured: Option<&Path>) -> Result<PathBuf, ConfigError> {
    match configured {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(app_dirs::default_tracking_root()?),
    }
}

fn default_experiment_id() -> String {
    "0".to_string()
}

fn default_target_name() -> String {
    "target".to_string()
}

fn default_split_seed() -> u64 {
    DEFAULT_HOLDOUT_SEED
}

fn default_input_template() -> String {
    SAMPLE_NAME_PLACEHOLDER.to_string()
}

fn default_output_template() -> String {
    format!("{SAMPLE_NAME_PLACEHOLDER}_pred")
}
