//! Filesystem-backed tracking store: `<root>/<experiment>/<run_id>/`.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{ModelSignature, Tracker, TrackingError, now_ms};

const META_FILE_NAME: &str = "meta.json";
const PARAMS_FILE_NAME: &str = "params.json";
const METRICS_FILE_NAME: &str = "metrics.jsonl";
const ARTIFACTS_DIR_NAME: &str = "artifacts";
const ARTIFACT_MANIFEST_NAME: &str = "manifest.jsonl";
const MODEL_FILE_NAME: &str = "model.json";
const MODEL_META_FILE_NAME: &str = "MLmodel.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

/// Contents of `meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    pub experiment_id: String,
    pub status: RunStatus,
    pub start_time_ms: i64,
    #[serde(default)]
    pub end_time_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
struct MetricLine<'a> {
    name: &'a str,
    value: f64,
    step: u64,
    timestamp_ms: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelMeta {
    signature: ModelSignature,
    input_example: Vec<f64>,
    created_ms: i64,
}

#[derive(Debug, Serialize)]
struct ArtifactLine<'a> {
    path: &'a str,
    blake3: String,
    bytes: u64,
}

/// Root directory holding one sub-directory per experiment.
#[derive(Debug, Clone)]
pub struct FsTrackingStore {
    root: PathBuf,
}

impl FsTrackingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, experiment_id: &str, run_id: &str) -> PathBuf {
        self.root.join(experiment_id).join(run_id)
    }

    /// Create a new run with a fresh id.
    pub fn start_run(&self, experiment_id: &str) -> Result<FsRun, TrackingError> {
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let dir = self.run_dir(experiment_id, &run_id);
        let artifacts = dir.join(ARTIFACTS_DIR_NAME);
        fs::create_dir_all(&artifacts).map_err(|source| TrackingError::io(&artifacts, source))?;
        let run = FsRun {
            dir,
            meta: RunMeta {
                run_id,
                experiment_id: experiment_id.to_string(),
                status: RunStatus::Running,
                start_time_ms: now_ms(),
                end_time_ms: None,
            },
            finalized: false,
        };
        run.write_meta()?;
        info!("Started run {} in experiment {experiment_id}", run.meta.run_id);
        Ok(run)
    }

    /// Resume an existing run, e.g. to attach prediction artifacts.
    ///
    /// A run recorded as failed stays failed; it is never reopened.
    pub fn open_run(&self, experiment_id: &str, run_id: &str) -> Result<FsRun, TrackingError> {
        let dir = self.run_dir(experiment_id, run_id);
        let meta_path = dir.join(META_FILE_NAME);
        if !meta_path.is_file() {
            return Err(TrackingError::RunNotFound(dir));
        }
        let mut meta: RunMeta = read_json(&meta_path)?;
        if meta.run_id != run_id {
            return Err(TrackingError::InvalidRun(format!(
                "{} records run id {}",
                meta_path.display(),
                meta.run_id
            )));
        }
        if meta.status == RunStatus::Failed {
            return Err(TrackingError::RunFailed(meta.run_id));
        }
        meta.status = RunStatus::Running;
        meta.end_time_ms = None;
        let run = FsRun {
            dir,
            meta,
            finalized: false,
        };
        run.write_meta()?;
        Ok(run)
    }
}

/// An active run. Finish it explicitly; dropping it unfinished records a failure.
#[derive(Debug)]
pub struct FsRun {
    dir: PathBuf,
    meta: RunMeta,
    finalized: bool,
}

impl FsRun {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn experiment_id(&self) -> &str {
        &self.meta.experiment_id
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.dir.join(ARTIFACTS_DIR_NAME)
    }

    /// All params logged so far.
    pub fn params(&self) -> Result<BTreeMap<String, String>, TrackingError> {
        let path = self.dir.join(PARAMS_FILE_NAME);
        if !path.is_file() {
            return Ok(BTreeMap::new());
        }
        read_json(&path)
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.artifacts_dir()
            .join(name)
            .join(MODEL_META_FILE_NAME)
            .is_file()
    }

    /// Load a model logged under `name` together with its signature.
    pub fn read_model<M: DeserializeOwned>(
        &self,
        name: &str,
    ) -> Result<(M, ModelSignature), TrackingError> {
        let dir = self.artifacts_dir().join(name);
        if !dir.is_dir() {
            return Err(TrackingError::InvalidRun(format!(
                "model {name} is not logged in {}",
                self.dir.display()
            )));
        }
        let model = read_json(&dir.join(MODEL_FILE_NAME))?;
        let meta: ModelMeta = read_json(&dir.join(MODEL_META_FILE_NAME))?;
        Ok((model, meta.signature))
    }

    /// Commit the run as finished.
    pub fn finish(mut self) -> Result<(), TrackingError> {
        self.finalize(RunStatus::Finished)
    }

    /// Record the run as failed.
    pub fn abort(mut self) -> Result<(), TrackingError> {
        self.finalize(RunStatus::Failed)
    }

    fn finalize(&mut self, status: RunStatus) -> Result<(), TrackingError> {
        self.finalized = true;
        self.meta.status = status;
        self.meta.end_time_ms = Some(now_ms());
        self.write_meta()
    }

    fn write_meta(&self) -> Result<(), TrackingError> {
        write_json(&self.dir.join(META_FILE_NAME), &self.meta)
    }
}

impl Drop for FsRun {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        warn!("Run {} ended without finishing; marking it failed", self.meta.run_id);
        if let Err(err) = self.finalize(RunStatus::Failed) {
            warn!("Failed to record run failure: {err}");
        }
    }
}

impl Tracker for FsRun {
    fn run_id(&self) -> &str {
        &self.meta.run_id
    }

    fn log_params(&mut self, params: &BTreeMap<String, String>) -> Result<(), TrackingError> {
        let mut current = self.params()?;
        for (key, value) in params {
            match current.get(key) {
                Some(existing) if existing != value => {
                    return Err(TrackingError::ParamConflict {
                        key: key.clone(),
                        existing: existing.clone(),
                        new: value.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    current.insert(key.clone(), value.clone());
                }
            }
        }
        write_json(&self.dir.join(PARAMS_FILE_NAME), &current)
    }

    fn log_metric(&mut self, name: &str, value: f64, step: u64) -> Result<(), TrackingError> {
        let line = MetricLine {
            name,
            value,
            step,
            timestamp_ms: now_ms(),
        };
        append_json_line(&self.dir.join(METRICS_FILE_NAME), &line)
    }

    fn log_model(
        &mut self,
        name: &str,
        model: &serde_json::Value,
        signature: &ModelSignature,
        input_example: &[f64],
    ) -> Result<(), TrackingError> {
        let dir = self.artifacts_dir().join(name);
        fs::create_dir_all(&dir).map_err(|source| TrackingError::io(&dir, source))?;
        write_json(&dir.join(MODEL_FILE_NAME), model)?;
        let meta = ModelMeta {
            signature: signature.clone(),
            input_example: input_example.to_vec(),
            created_ms: now_ms(),
        };
        write_json(&dir.join(MODEL_META_FILE_NAME), &meta)
    }

    fn log_artifact(&mut self, path: &Path, artifact_dir: &str) -> Result<(), TrackingError> {
        let file_name = path.file_name().ok_or_else(|| {
            TrackingError::InvalidRun(format!("artifact path {} has no file name", path.display()))
        })?;
        let artifacts = self.artifacts_dir();
        let target_dir = artifacts.join(artifact_dir);
        fs::create_dir_all(&target_dir).map_err(|source| TrackingError::io(&target_dir, source))?;
        let target = target_dir.join(file_name);
        let mut copied = Vec::new();
        copy_tree(path, &target, &mut copied)?;
        let manifest = artifacts.join(ARTIFACT_MANIFEST_NAME);
        for file in copied {
            let bytes = fs::read(&file).map_err(|source| TrackingError::io(&file, source))?;
            let relative = file
                .strip_prefix(&artifacts)
                .unwrap_or(&file)
                .to_string_lossy()
                .into_owned();
            let line = ArtifactLine {
                path: &relative,
                blake3: blake3::hash(&bytes).to_hex().to_string(),
                bytes: bytes.len() as u64,
            };
            append_json_line(&manifest, &line)?;
        }
        Ok(())
    }
}

fn copy_tree(src: &Path, dst: &Path, copied: &mut Vec<PathBuf>) -> Result<(), TrackingError> {
    if src.is_dir() {
        fs::create_dir_all(dst).map_err(|source| TrackingError::io(dst, source))?;
        let mut entries = fs::read_dir(src)
            .map_err(|source| TrackingError::io(src, source))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect::<Vec<_>>();
        entries.sort();
        for entry in entries {
            let Some(name) = entry.file_name() else {
                continue;
            };
            copy_tree(&entry, &dst.join(name), copied)?;
        }
        Ok(())
    } else {
        fs::copy(src, dst).map_err(|source| TrackingError::io(src, source))?;
        copied.push(dst.to_path_buf());
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, TrackingError> {
    let bytes = fs::read(path).map_err(|source| TrackingError::io(path, source))?;
    serde_json::from_slice(&bytes).map_err(|source| TrackingError::json(path, source))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), TrackingError> {
    let bytes =
        serde_json::to_vec_pretty(value).map_err(|source| TrackingError::json(path, source))?;
    fs::write(path, bytes).map_err(|source| TrackingError::io(path, source))
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<(), TrackingError> {
    let mut line = serde_json::to_vec(value).map_err(|source| TrackingError::json(path, source))?;
    line.push(b'\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| TrackingError::io(path, source))?;
    file.write_all(&line)
        .map_err(|source| TrackingError::io(path, source))
}
