use market::Symbol;
use serde::{Deserialize, Serialize};

use crate::error::{FeedbackField, FeedbackOutOfRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillOutcome {
    Filled,
    Cancelled,
}

/// Price move after a fill, in bps; positive means the fill was on the
/// right side of the move.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Markout {
    pub horizon_ms: u64,
    pub bps: f64,
}

/// Asynchronous report from the execution layer. Merged at the next tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFeedback {
    pub symbol: Symbol,
    pub ts_ms: u64,
    pub outcome: FillOutcome,
    /// Paid versus mid at submission, in bps; positive is a cost.
    #[serde(default)]
    pub slippage_bps: f64,
    #[serde(default)]
    pub markouts: Vec<Markout>,
}

impl ExecutionFeedback {
    /// Copy with every bps value forced into `[-max_abs_bps, max_abs_bps]`.
    ///
    /// NaN is read as zero. Each value that had to move is reported.
    pub fn clamped(&self, max_abs_bps: f64) -> (ExecutionFeedback, Vec<FeedbackOutOfRange>) {
        let mut report = Vec::new();
        let mut out = self.clone();

        out.slippage_bps = clamp_bps(FeedbackField::Slippage, self.slippage_bps, max_abs_bps, &mut report);
        for m in &mut out.markouts {
            m.bps = clamp_bps(FeedbackField::Markout, m.bps, max_abs_bps, &mut report);
        }

        (out, report)
    }

    /// Mean markout across horizons, zero when none were reported.
    pub fn mean_markout_bps(&self) -> f64 {
        if self.markouts.is_empty() {
            return 0.0;
        }
        self.markouts.iter().map(|m| m.bps).sum::<f64>() / self.markouts.len() as f64
    }
}

fn clamp_bps(field: FeedbackField, raw: f64, max_abs: f64, report: &mut Vec<FeedbackOutOfRange>) -> f64 {
    let clamped = if raw.is_nan() { 0.0 } else { raw.clamp(-max_abs, max_abs) };
    if raw.is_nan() || clamped != raw {
        report.push(FeedbackOutOfRange { field, raw, clamped });
    }
    clamped
}
