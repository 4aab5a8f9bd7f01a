use engine::ExecutionFeedback;
use market::{MarketObservation, Symbol};
use serde::{Deserialize, Serialize};

/// One line of gate input. Market data, execution feedback and operator
/// controls share a single JSON-lines stream, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputRecord {
    Observation(MarketObservation),
    Feedback(ExecutionFeedback),
    /// Re-evaluate a symbol at `ts_ms` without new market data.
    Heartbeat { symbol: Symbol, ts_ms: u64 },
    Kill {
        symbol: Symbol,
        ts_ms: u64,
        #[serde(default)]
        reason: Option<String>,
    },
    Reset { symbol: Symbol, ts_ms: u64 },
}

impl InputRecord {
    pub fn symbol(&self) -> &Symbol {
        match self {
            InputRecord::Observation(o) => &o.symbol,
            InputRecord::Feedback(f) => &f.symbol,
            InputRecord::Heartbeat { symbol, .. }
            | InputRecord::Kill { symbol, .. }
            | InputRecord::Reset { symbol, .. } => symbol,
        }
    }
}
