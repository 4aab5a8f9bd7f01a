use std::path::PathBuf;

use engine::EngineError;
use market::{MarketError, Symbol};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Market(#[from] MarketError),

    #[error("cannot read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("runtime config invalid: {0}")]
    RuntimeConfig(String),

    #[error("output write failed: {0}")]
    Output(#[from] std::io::Error),

    #[error("blocking output task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),

    #[error("output encode failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("worker for {0} has stopped")]
    WorkerClosed(Symbol),

    #[error("output sink closed")]
    SinkClosed,
}
