//! Flow Pulse
//!
//! Trade-flow statistics over the trailing trade window: intensity
//! (trades/second), signed aggressor imbalance and the p95 feed latency.

use super::{Pulse, PulseResult, PulseValidity};
use crate::rolling_window::RollingWindow;
use crate::types::AggressorSide;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TradeSample {
    pub size: f64,
    pub side: AggressorSide,
    /// Stream ts minus exchange ts, when the venue stamps its trades.
    pub latency_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FlowPulseResult {
    pub trade_intensity: f64,
    pub aggressor_imbalance: f64,
    pub latency_p95_ms: Option<f64>,
    pub trades: usize,
    pub validity: PulseValidity,
}

impl PulseResult for FlowPulseResult {
    fn validity(&self) -> PulseValidity {
        self.validity
    }
}

#[derive(Clone, Debug)]
pub struct FlowPulse {
    window: RollingWindow<TradeSample>,
}

impl FlowPulse {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window: RollingWindow::new(window_ms),
        }
    }
}

impl Pulse for FlowPulse {
    type Input = TradeSample;
    type Output = FlowPulseResult;

    fn update(&mut self, ts_ms: u64, input: Self::Input) {
        self.window.push(ts_ms, input);
    }

    /// An empty window is a valid reading: no trades is information too.
    fn evaluate(&mut self, now_ms: u64) -> Self::Output {
        self.window.evict_old(now_ms);

        let window_secs = self.window.max_age_ms() as f64 / 1_000.0;
        let trades = self.window.len();

        let (buy, sell) = self
            .window
            .iter()
            .fold((0.0, 0.0), |(b, s), t| match t.value.side {
                AggressorSide::Buy => (b + t.value.size, s),
                AggressorSide::Sell => (b, s + t.value.size),
            });

        let total = buy + sell;
        let aggressor_imbalance = if total > 0.0 {
            (buy - sell) / total
        } else {
            0.0
        };

        FlowPulseResult {
            trade_intensity: if window_secs > 0.0 {
                trades as f64 / window_secs
            } else {
                0.0
            },
            aggressor_imbalance,
            latency_p95_ms: latency_p95(&self.window),
            trades,
            validity: PulseValidity::Valid,
        }
    }
}

/// Nearest-rank p95 (index floor(0.95 * (n - 1)) of the sorted latencies).
fn latency_p95(window: &RollingWindow<TradeSample>) -> Option<f64> {
    let mut lats: Vec<u64> = window.iter().filter_map(|t| t.value.latency_ms).collect();
    if lats.is_empty() {
        return None;
    }

    lats.sort_unstable();
    let idx = (0.95 * (lats.len() - 1) as f64) as usize;
    Some(lats[idx] as f64)
}
