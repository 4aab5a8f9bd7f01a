//! Health Model
//!
//! Folds permission, regime stability and execution quality into one integer
//! score in `[0, 100]` and a coarse band.
//!
//! - permission term: fixed value per permission state
//! - regime stability: decays multiplicatively on every FAST or UNSTABLE tick,
//!   recovers linearly on NORMAL ticks
//! - execution quality: EWMA of per-fill quality, drifting back to the neutral
//!   50 with a stream-time half-life when no feedback arrives
//!
//! The model also watches for a streak of adverse fills and raises a one-shot
//! signal that the permission gate consumes on the same tick.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, FeedbackOutOfRange};
use crate::feedback::{ExecutionFeedback, FillOutcome};
use crate::permission::{Permission, PermissionState};
use crate::regime::{Regime, RegimeState};

const NEUTRAL: f64 = 50.0;

/// Ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthBand {
    Red,
    Yellow,
    Green,
}

impl fmt::Display for HealthBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthBand::Red => f.write_str("RED"),
            HealthBand::Yellow => f.write_str("YELLOW"),
            HealthBand::Green => f.write_str("GREEN"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthScore {
    pub value: u8,
    pub band: HealthBand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionTerms {
    pub active: f64,
    pub probation: f64,
    pub cooldown: f64,
    pub suspended: f64,
}

impl Default for PermissionTerms {
    fn default() -> Self {
        Self {
            active: 100.0,
            probation: 60.0,
            cooldown: 30.0,
            suspended: 0.0,
        }
    }
}

impl PermissionTerms {
    fn term(&self, p: Permission) -> f64 {
        match p {
            Permission::Active => self.active,
            Permission::Probation => self.probation,
            Permission::Cooldown => self.cooldown,
            Permission::Suspended => self.suspended,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub permission_weight: f64,
    pub regime_weight: f64,
    pub execution_weight: f64,

    /// Scores at or above this are GREEN.
    pub green_threshold: u8,
    /// Scores at or above this (and below green) are YELLOW.
    pub yellow_threshold: u8,

    pub permission_terms: PermissionTerms,

    pub fast_decay: f64,
    pub unstable_decay: f64,
    pub recovery_per_tick: f64,

    pub ewma_alpha: f64,
    pub feedback_half_life_ms: u64,
    /// Feedback bps beyond this magnitude are clamped.
    pub max_abs_bps: f64,
    /// Markout-minus-slippage edge (bps) that maps to a perfect fill.
    pub quality_scale_bps: f64,

    /// A fill is adverse when its mean markout is at or below minus this.
    pub adverse_markout_bps: f64,
    pub adverse_fill_streak: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            permission_weight: 0.4,
            regime_weight: 0.3,
            execution_weight: 0.3,
            green_threshold: 70,
            yellow_threshold: 40,
            permission_terms: PermissionTerms::default(),
            fast_decay: 0.95,
            unstable_decay: 0.7,
            recovery_per_tick: 5.0,
            ewma_alpha: 0.3,
            feedback_half_life_ms: 300_000,
            max_abs_bps: 100.0,
            quality_scale_bps: 10.0,
            adverse_markout_bps: 5.0,
            adverse_fill_streak: 3,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: String| Err(EngineError::ConfigurationInvalid(format!("health: {msg}")));

        let weights = [self.permission_weight, self.regime_weight, self.execution_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return invalid(format!("weights must be non-negative with a positive sum, got {weights:?}"));
        }

        if !(0 < self.yellow_threshold && self.yellow_threshold < self.green_threshold && self.green_threshold <= 100) {
            return invalid(format!(
                "bands must satisfy 0 < yellow ({}) < green ({}) <= 100",
                self.yellow_threshold, self.green_threshold
            ));
        }

        let t = &self.permission_terms;
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if ![t.active, t.probation, t.cooldown, t.suspended].into_iter().all(in_range)
            || !(t.active >= t.probation && t.probation >= t.cooldown && t.cooldown >= t.suspended)
        {
            return invalid(format!("permission terms must be in [0, 100] and non-increasing, got {t:?}"));
        }

        for (name, v) in [("fast_decay", self.fast_decay), ("unstable_decay", self.unstable_decay)] {
            if !(v > 0.0 && v <= 1.0) {
                return invalid(format!("{name} must be in (0, 1], got {v}"));
            }
        }
        if self.unstable_decay > self.fast_decay {
            return invalid("unstable_decay must not be milder than fast_decay".into());
        }
        if !(self.recovery_per_tick >= 0.0 && self.recovery_per_tick.is_finite()) {
            return invalid(format!("recovery_per_tick must be >= 0, got {}", self.recovery_per_tick));
        }
        if !(self.ewma_alpha > 0.0 && self.ewma_alpha <= 1.0) {
            return invalid(format!("ewma_alpha must be in (0, 1], got {}", self.ewma_alpha));
        }
        if self.feedback_half_life_ms == 0 {
            return invalid("feedback_half_life_ms must be positive".into());
        }
        if !(self.max_abs_bps > 0.0 && self.max_abs_bps.is_finite()) {
            return invalid(format!("max_abs_bps must be positive, got {}", self.max_abs_bps));
        }
        if !(self.quality_scale_bps > 0.0 && self.quality_scale_bps.is_finite()) {
            return invalid(format!("quality_scale_bps must be positive, got {}", self.quality_scale_bps));
        }
        if !(self.adverse_markout_bps >= 0.0 && self.adverse_markout_bps.is_finite()) {
            return invalid(format!("adverse_markout_bps must be >= 0, got {}", self.adverse_markout_bps));
        }
        if self.adverse_fill_streak == 0 {
            return invalid("adverse_fill_streak must be at least 1".into());
        }
        Ok(())
    }

    pub fn band(&self, value: u8) -> HealthBand {
        if value >= self.green_threshold {
            HealthBand::Green
        } else if value >= self.yellow_threshold {
            HealthBand::Yellow
        } else {
            HealthBand::Red
        }
    }
}

/// Running execution statistics, for observability only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub fills: u64,
    pub cancels: u64,
    pub adverse_fills: u64,
    pub clamped_values: u64,
    slippage_sum_bps: f64,
    markout_sum_bps: f64,
}

impl ExecutionStats {
    pub fn fill_rate(&self) -> Option<f64> {
        let total = self.fills + self.cancels;
        (total > 0).then(|| self.fills as f64 / total as f64)
    }

    pub fn mean_slippage_bps(&self) -> Option<f64> {
        (self.fills > 0).then(|| self.slippage_sum_bps / self.fills as f64)
    }

    pub fn mean_markout_bps(&self) -> Option<f64> {
        (self.fills > 0).then(|| self.markout_sum_bps / self.fills as f64)
    }
}

#[derive(Debug, Clone, Copy)]
struct QualityEwma {
    value: f64,
    ts_ms: u64,
}

pub struct HealthModel {
    cfg: HealthConfig,
    stability: f64,
    quality: Option<QualityEwma>,
    adverse_streak: u32,
    adverse_signal: bool,
    stats: ExecutionStats,
}

impl HealthModel {
    pub fn new(cfg: HealthConfig) -> Self {
        Self {
            cfg,
            stability: 100.0,
            quality: None,
            adverse_streak: 0,
            adverse_signal: false,
            stats: ExecutionStats::default(),
        }
    }

    /// Merge one feedback report. Clamped values are returned for reporting;
    /// the clamped report is still absorbed.
    pub fn absorb(&mut self, feedback: &ExecutionFeedback) -> Vec<FeedbackOutOfRange> {
        let (fb, clamps) = feedback.clamped(self.cfg.max_abs_bps);
        self.stats.clamped_values += clamps.len() as u64;

        match fb.outcome {
            FillOutcome::Cancelled => self.stats.cancels += 1,
            FillOutcome::Filled => {
                let markout = fb.mean_markout_bps();
                self.stats.fills += 1;
                self.stats.slippage_sum_bps += fb.slippage_bps;
                self.stats.markout_sum_bps += markout;

                let q = self.fill_quality(markout, fb.slippage_bps);
                let prior = self.execution_term(fb.ts_ms);
                let a = self.cfg.ewma_alpha;
                let at = self.quality.map_or(fb.ts_ms, |e| fb.ts_ms.max(e.ts_ms));
                self.quality = Some(QualityEwma {
                    value: (1.0 - a) * prior + a * q,
                    ts_ms: at,
                });

                if markout <= -self.cfg.adverse_markout_bps {
                    self.stats.adverse_fills += 1;
                    self.adverse_streak += 1;
                    if self.adverse_streak >= self.cfg.adverse_fill_streak {
                        self.adverse_signal = true;
                        self.adverse_streak = 0;
                    }
                } else {
                    self.adverse_streak = 0;
                }
            }
        }

        clamps
    }

    /// One-shot: true once per completed adverse streak.
    pub fn take_adverse_signal(&mut self) -> bool {
        std::mem::take(&mut self.adverse_signal)
    }

    /// Score one tick. Advances the regime-stability term.
    pub fn score(&mut self, permission: &PermissionState, regime: &RegimeState, ts_ms: u64) -> HealthScore {
        self.stability = match regime.regime {
            Regime::Normal => (self.stability + self.cfg.recovery_per_tick).min(100.0),
            Regime::Fast => self.stability * self.cfg.fast_decay,
            Regime::Unstable => self.stability * self.cfg.unstable_decay,
        };
        self.peek(permission, ts_ms)
    }

    /// Score without counting a regime tick, for out-of-band control events.
    pub fn peek(&self, permission: &PermissionState, ts_ms: u64) -> HealthScore {
        let c = &self.cfg;
        let terms = [
            (c.permission_weight, c.permission_terms.term(permission.permission())),
            (c.regime_weight, self.stability),
            (c.execution_weight, self.execution_term(ts_ms)),
        ];

        let total: f64 = terms.iter().map(|(w, _)| w).sum();
        let weighted: f64 = terms.iter().map(|(w, t)| w * t).sum();
        let value = (weighted / total).round().clamp(0.0, 100.0) as u8;

        HealthScore {
            value,
            band: c.band(value),
        }
    }

    pub fn regime_stability(&self) -> f64 {
        self.stability
    }

    /// Current EWMA, decayed toward neutral over the stream time since the
    /// last fill. 50 until the first fill.
    pub fn execution_term(&self, ts_ms: u64) -> f64 {
        match self.quality {
            None => NEUTRAL,
            Some(e) => {
                let elapsed = ts_ms.saturating_sub(e.ts_ms) as f64;
                let keep = 0.5f64.powf(elapsed / self.cfg.feedback_half_life_ms as f64);
                NEUTRAL + (e.value - NEUTRAL) * keep
            }
        }
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    fn fill_quality(&self, markout_bps: f64, slippage_bps: f64) -> f64 {
        let edge = markout_bps - slippage_bps;
        (NEUTRAL + NEUTRAL * edge / self.cfg.quality_scale_bps).clamp(0.0, 100.0)
    }
}
