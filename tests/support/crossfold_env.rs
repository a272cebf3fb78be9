use std::{
    path::PathBuf,
    sync::{Mutex, OnceLock},
};

use crossfold::app_dirs::HOME_ENV_VAR;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct CrossfoldEnvGuard {
    previous: Option<String>,
    _lock: std::sync::MutexGuard<'static, ()>,
}

impl CrossfoldEnvGuard {
    pub fn set_home(path: PathBuf) -> Self {
        let lock = ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        let previous = std::env::var(HOME_ENV_VAR).ok();
        // SAFETY: tests run under a global lock to prevent concurrent env mutations.
        unsafe {
            std::env::set_var(HOME_ENV_VAR, path);
        }
        Self {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for CrossfoldEnvGuard {
    fn drop(&mut self) {
        if let Some(value) = self.previous.take() {
            // SAFETY: tests run under a global lock to prevent concurrent env mutations.
            unsafe {
                std::env::set_var(HOME_ENV_VAR, value);
            }
        } else {
            // SAFETY: tests run under a global lock to prevent concurrent env mutations.
            unsafe {
                std::env::remove_var(HOME_ENV_VAR);
            }
        }
    }
}
