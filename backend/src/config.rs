use std::path::{Path, PathBuf};

use engine::EngineConfig;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const CONFIG_PATH_ENV: &str = "GATE_CONFIG";
pub const OUT_DIR_ENV: &str = "GATE_OUT_DIR";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Capacity of each symbol worker's observation queue.
    ///
    /// Acts as backpressure:
    /// - a slow worker blocks the router, never drops market data
    /// - bounds memory per symbol
    pub market_queue_capacity: usize,

    /// Pending execution feedback kept per symbol between ticks.
    ///
    /// On overflow the oldest report is dropped, since recent execution
    /// quality matters more than stale quality.
    pub feedback_inbox_capacity: usize,

    /// Root of the symbol-partitioned decision and event logs.
    pub out_dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            market_queue_capacity: 1_024,
            feedback_inbox_capacity: 64,
            out_dir: PathBuf::from("./data"),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.market_queue_capacity == 0 {
            return Err(AppError::RuntimeConfig("market_queue_capacity must be positive".into()));
        }
        if self.feedback_inbox_capacity == 0 {
            return Err(AppError::RuntimeConfig("feedback_inbox_capacity must be positive".into()));
        }
        if self.out_dir.as_os_str().is_empty() {
            return Err(AppError::RuntimeConfig("out_dir must not be empty".into()));
        }
        Ok(())
    }
}

/// Full process configuration: gate rules plus runtime plumbing.
///
/// Loaded and validated once at startup; every symbol pipeline receives its
/// own clone of `engine`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub runtime: RuntimeConfig,
}

impl AppConfig {
    /// Config file from `GATE_CONFIG` (defaults when unset), out dir from
    /// `GATE_OUT_DIR` when set.
    pub fn from_env() -> Result<Self, AppError> {
        let path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let out_dir = std::env::var_os(OUT_DIR_ENV).map(PathBuf::from);
        Self::load(path.as_deref(), out_dir)
    }

    /// Read an optional JSON config file, apply the out dir override and
    /// validate. Missing sections and fields take their defaults.
    pub fn load(path: Option<&Path>, out_dir: Option<PathBuf>) -> Result<Self, AppError> {
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };

        if let Some(dir) = out_dir {
            cfg.runtime.out_dir = dir;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|source| AppError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| AppError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), AppError> {
        self.engine.validate()?;
        self.runtime.validate()
    }
}
