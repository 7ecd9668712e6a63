//! Dispatcher configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Tuning knobs for a dispatcher instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Maximum number of concurrent task-runner jobs in the shared pool
    pub max_workers: usize,

    /// Path of the SQLite dispatch store; `None` runs in memory
    pub db_path: Option<PathBuf>,

    /// Base directory of the default local blob backend
    pub blob_base_dir: PathBuf,

    /// Default results directory recorded for dispatches that set none
    pub results_dir: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            db_path: None,
            blob_base_dir: PathBuf::from("./dispatch-data"),
            results_dir: "./results".to_string(),
        }
    }
}

impl DispatcherConfig {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn with_blob_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.blob_base_dir = dir.into();
        self
    }

    pub fn with_results_dir(mut self, dir: impl Into<String>) -> Self {
        self.results_dir = dir.into();
        self
    }
}
