//! Process-level directories anchored to a single `.crossfold` folder.
//!
//! Logs and the default tracking store live under the OS config directory
//! unless `CROSSFOLD_HOME` points somewhere else (tests, clusters, portable setups).

use std::{
    path::PathBuf,
    sync::{LazyLock, Mutex},
};

use directories::BaseDirs;
use thiserror::Error;

/// Name of the application directory that lives under the OS config root.
pub const APP_DIR_NAME: &str = ".crossfold";
/// Environment variable overriding the base directory.
pub const HOME_ENV_VAR: &str = "CROSSFOLD_HOME";
const TRACKING_DIR_NAME: &str = "mlruns";

static CONFIG_BASE_OVERRIDE: LazyLock<Mutex<Option<PathBuf>>> = LazyLock::new(|| Mutex::new(None));

/// Errors that can occur while resolving or preparing application directories.
#[derive(Debug, Error)]
pub enum AppDirError {
    /// No suitable base config directory could be resolved.
    #[error("No suitable base config directory available for application files")]
    NoBaseDir,
    /// Failed to create the application directory.
    #[error("Failed to create application directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Return the root `.crossfold` directory, creating it if needed.
pub fn app_root_dir() -> Result<PathBuf, AppDirError> {
    let base = config_base_dir().ok_or(AppDirError::NoBaseDir)?;
    let path = base.join(APP_DIR_NAME);
    std::fs::create_dir_all(&path).map_err(|source| AppDirError::CreateDir {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Return the logs directory inside the `.crossfold` root, creating it if needed.
pub fn logs_dir() -> Result<PathBuf, AppDirError> {
    ensure_subdir("logs")
}

/// Tracking store used when a config names no `tracking_root`.
pub fn default_tracking_root() -> Result<PathBuf, AppDirError> {
    ensure_subdir(TRACKING_DIR_NAME)
}

fn ensure_subdir(name: &str) -> Result<PathBuf, AppDirError> {
    let path = app_root_dir()?.join(name);
    std::fs::create_dir_all(&path).map_err(|source| AppDirError::CreateDir {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

fn config_base_dir() -> Option<PathBuf> {
    if let Some(path) = CONFIG_BASE_OVERRIDE
        .lock()
        .ok()
        .and_then(|guard| guard.clone())
    {
        return Some(path);
    }
    if let Ok(path) = std::env::var(HOME_ENV_VAR) {
        return Some(PathBuf::from(path));
    }
    BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf())
}

#[cfg(test)]
fn set_config_base_override(path: PathBuf) {
    let mut guard = CONFIG_BASE_OVERRIDE
        .lock()
        .expect("config base override mutex poisoned");
    *guard = Some(path);
}

#[cfg(test)]
fn clear_config_base_override() {
    let mut guard = CONFIG_BASE_OVERRIDE
        .lock()
        .expect("config base override mutex poisoned");
    *guard = None;
}
