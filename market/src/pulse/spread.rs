//! Spread Pulse
//!
//! Tracks the quoted spread (bps of mid) and the mid itself over a trailing
//! time window and answers two questions for the regime classifier:
//! - how noisy is the spread right now (`spread_vol_bps`, population stddev)
//! - how far has the mid travelled across the window (`mid_move_bps`)
//!
//! The pulse stays `Invalid` until the window holds `min_samples` spanning at
//! least `min_span_ms`, so a single quote never reads as a perfectly calm market.

use super::{Pulse, PulseResult, PulseValidity};
use crate::rolling_window::RollingWindow;

/// One quote reduced to what the pulse needs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpreadSample {
    pub spread_bps: f64,
    pub mid: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpreadPulseResult {
    pub spread_vol_bps: f64,
    pub mid_move_bps: f64,
    pub samples: usize,
    pub validity: PulseValidity,
}

impl Default for SpreadPulseResult {
    fn default() -> Self {
        Self {
            spread_vol_bps: 0.0,
            mid_move_bps: 0.0,
            samples: 0,
            validity: PulseValidity::Invalid,
        }
    }
}

impl PulseResult for SpreadPulseResult {
    fn validity(&self) -> PulseValidity {
        self.validity
    }
}

/// Warm-up configuration for the Spread Pulse.
#[derive(Clone, Copy, Debug)]
pub struct SpreadWarmup {
    pub min_samples: usize,
    pub min_span_ms: u64,
}

/// Spread pulse state.
#[derive(Clone, Debug)]
pub struct SpreadPulse {
    window: RollingWindow<SpreadSample>,
    warmup: SpreadWarmup,
}

impl SpreadPulse {
    pub fn new(window_ms: u64, warmup: SpreadWarmup) -> Self {
        Self {
            window: RollingWindow::new(window_ms),
            warmup,
        }
    }
}

impl Pulse for SpreadPulse {
    type Input = SpreadSample;
    type Output = SpreadPulseResult;

    fn update(&mut self, ts_ms: u64, input: Self::Input) {
        self.window.push(ts_ms, input);
    }

    fn evaluate(&mut self, now_ms: u64) -> Self::Output {
        self.window.evict_old(now_ms);

        if self.window.is_empty() {
            return SpreadPulseResult::default();
        }

        let validity = if self.window.is_warm(self.warmup.min_samples, self.warmup.min_span_ms) {
            PulseValidity::Valid
        } else {
            PulseValidity::Invalid
        };

        SpreadPulseResult {
            spread_vol_bps: stddev(self.window.iter().map(|s| s.value.spread_bps)),
            mid_move_bps: mid_move_bps(&self.window),
            samples: self.window.len(),
            validity,
        }
    }
}

/// Population standard deviation; zero for fewer than two samples.
fn stddev(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let (n, sum) = values.clone().fold((0usize, 0.0), |(n, s), v| (n + 1, s + v));
    if n < 2 {
        return 0.0;
    }

    let mean = sum / n as f64;
    let var = values.map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    var.sqrt()
}

fn mid_move_bps(window: &RollingWindow<SpreadSample>) -> f64 {
    match (window.oldest(), window.latest()) {
        (Some(first), Some(last)) if first.value.mid > 0.0 => {
            ((last.value.mid - first.value.mid).abs() / first.value.mid) * 10_000.0
        }
        _ => 0.0,
    }
}
