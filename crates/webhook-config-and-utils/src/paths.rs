//! File system paths for the webhook services.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Directory name under the user's home.
const BASE_DIR_NAME: &str = ".household-webhooks";

/// Manages file system paths for the webhook services.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for all persisted state (~/.household-webhooks)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.household-webhooks`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (<base>/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the outbox database path (<base>/webhooks.sqlite).
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join("webhooks.sqlite")
    }

    /// Get the logs directory (<base>/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
