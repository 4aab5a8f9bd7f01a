use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Fatal at startup: the gate refuses to run with ambiguous rules.
    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(String),
}

impl From<market::MarketError> for EngineError {
    fn from(e: market::MarketError) -> Self {
        match e {
            market::MarketError::ConfigurationInvalid(msg) => {
                EngineError::ConfigurationInvalid(format!("formation: {msg}"))
            }
            other => EngineError::ConfigurationInvalid(other.to_string()),
        }
    }
}

/// Which feedback value had to be clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackField {
    Slippage,
    Markout,
}

impl fmt::Display for FeedbackField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedbackField::Slippage => f.write_str("slippage"),
            FeedbackField::Markout => f.write_str("markout"),
        }
    }
}

/// Non-fatal: the value is clamped and kept, since partial execution-quality
/// information is still informative.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error("feedback {field} out of range: {raw} clamped to {clamped}")]
pub struct FeedbackOutOfRange {
    pub field: FeedbackField,
    pub raw: f64,
    pub clamped: f64,
}
