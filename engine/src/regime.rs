//! Regime Classifier
//!
//! Maps a [`MetricSnapshot`] onto `NORMAL | FAST | UNSTABLE` with hysteresis:
//! a different reading has to hold for `dwell_ticks` consecutive ticks before
//! it is committed. Integrity failures skip the dwell and force `UNSTABLE` on
//! the tick they are seen.

use std::fmt;

use market::{DataIntegrity, MetricSnapshot};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Ordered by severity: `Normal < Fast < Unstable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Regime {
    Normal,
    Fast,
    Unstable,
}

impl Regime {
    pub fn is_unstable(self) -> bool {
        matches!(self, Regime::Unstable)
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::Normal => f.write_str("NORMAL"),
            Regime::Fast => f.write_str("FAST"),
            Regime::Unstable => f.write_str("UNSTABLE"),
        }
    }
}

/// The first threshold that decided a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegimeReason {
    Calm,
    SpreadWide,
    SpreadVolatility,
    LatencySpike,
    DataAge,
    TradeIntensity,
    MidMove,
    StaleData,
    SequenceGap,
    MalformedData,
}

/// Data that cannot be trusted at all. Drives forced `UNSTABLE` here and
/// `SUSPENDED` in the permission gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityFailure {
    StaleData,
    SequenceGap,
    MalformedData,
}

impl IntegrityFailure {
    fn regime_reason(self) -> RegimeReason {
        match self {
            IntegrityFailure::StaleData => RegimeReason::StaleData,
            IntegrityFailure::SequenceGap => RegimeReason::SequenceGap,
            IntegrityFailure::MalformedData => RegimeReason::MalformedData,
        }
    }
}

impl fmt::Display for IntegrityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityFailure::StaleData => f.write_str("stale_data"),
            IntegrityFailure::SequenceGap => f.write_str("sequence_gap"),
            IntegrityFailure::MalformedData => f.write_str("malformed_data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// Consecutive ticks a new reading must hold before it is committed.
    pub dwell_ticks: u32,

    pub unstable_spread_bps: f64,
    pub unstable_spread_vol_bps: f64,
    pub unstable_latency_p95_ms: f64,
    pub unstable_data_age_ms: u64,
    /// Data older than this is an integrity failure, not just a slow market.
    pub hard_stale_ms: u64,

    pub fast_trade_intensity: f64,
    pub fast_mid_move_bps: f64,
    pub fast_spread_vol_bps: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            dwell_ticks: 3,
            unstable_spread_bps: 50.0,
            unstable_spread_vol_bps: 20.0,
            unstable_latency_p95_ms: 2_500.0,
            unstable_data_age_ms: 5_000,
            hard_stale_ms: 15_000,
            fast_trade_intensity: 12.0,
            fast_mid_move_bps: 10.0,
            fast_spread_vol_bps: 8.0,
        }
    }
}

impl RegimeConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: String| Err(EngineError::ConfigurationInvalid(format!("regime: {msg}")));

        if self.dwell_ticks == 0 {
            return invalid("dwell_ticks must be at least 1".into());
        }

        for (name, v) in [
            ("unstable_spread_bps", self.unstable_spread_bps),
            ("unstable_spread_vol_bps", self.unstable_spread_vol_bps),
            ("unstable_latency_p95_ms", self.unstable_latency_p95_ms),
            ("fast_trade_intensity", self.fast_trade_intensity),
            ("fast_mid_move_bps", self.fast_mid_move_bps),
            ("fast_spread_vol_bps", self.fast_spread_vol_bps),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return invalid(format!("{name} must be a positive number, got {v}"));
            }
        }

        if self.fast_spread_vol_bps >= self.unstable_spread_vol_bps {
            return invalid(format!(
                "fast spread volatility {} must sit below unstable {}",
                self.fast_spread_vol_bps, self.unstable_spread_vol_bps
            ));
        }
        if self.unstable_data_age_ms == 0 || self.unstable_data_age_ms >= self.hard_stale_ms {
            return invalid(format!(
                "unstable data age {}ms must be positive and below hard stale {}ms",
                self.unstable_data_age_ms, self.hard_stale_ms
            ));
        }
        Ok(())
    }
}

/// A reading that differs from the committed regime and is waiting out dwell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub regime: Regime,
    pub reason: RegimeReason,
    pub ticks: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeState {
    pub regime: Regime,
    pub entered_at_ms: u64,
    /// Consecutive ticks at `regime`, counting the tick it was committed on.
    pub ticks_in_regime: u32,
    pub candidate: Option<Candidate>,
}

impl RegimeState {
    pub fn initial(ts_ms: u64) -> Self {
        Self {
            regime: Regime::Normal,
            entered_at_ms: ts_ms,
            ticks_in_regime: 0,
            candidate: None,
        }
    }

    fn hold(&self) -> Self {
        Self {
            ticks_in_regime: self.ticks_in_regime.saturating_add(1),
            candidate: None,
            ..self.clone()
        }
    }

    fn commit(regime: Regime, ts_ms: u64) -> Self {
        Self {
            regime,
            entered_at_ms: ts_ms,
            ticks_in_regime: 1,
            candidate: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeTransition {
    pub from: Regime,
    pub to: Regime,
    pub reason: RegimeReason,
    /// Committed without dwell because of an integrity failure.
    pub forced: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub state: RegimeState,
    pub transition: Option<RegimeTransition>,
}

pub struct RegimeClassifier {
    cfg: RegimeConfig,
}

impl RegimeClassifier {
    pub fn new(cfg: RegimeConfig) -> Self {
        Self { cfg }
    }

    /// `Some` when the snapshot cannot be trusted at all.
    pub fn integrity_failure(&self, snap: &MetricSnapshot) -> Option<IntegrityFailure> {
        match snap.integrity {
            DataIntegrity::Malformed => Some(IntegrityFailure::MalformedData),
            DataIntegrity::Gap => Some(IntegrityFailure::SequenceGap),
            DataIntegrity::Ok if snap.data_age_ms >= self.cfg.hard_stale_ms => {
                Some(IntegrityFailure::StaleData)
            }
            DataIntegrity::Ok => None,
        }
    }

    /// Undebounced reading of one snapshot.
    ///
    /// Checks run most severe first; the first threshold crossed names the
    /// reason. Spread fields of an unusable book are `f64::MAX` and land in
    /// `UNSTABLE` through the ordinary comparison.
    pub fn assess(&self, snap: &MetricSnapshot) -> (Regime, RegimeReason) {
        let c = &self.cfg;

        if !(snap.spread_bps <= c.unstable_spread_bps) {
            return (Regime::Unstable, RegimeReason::SpreadWide);
        }
        if snap.spread_vol_bps > c.unstable_spread_vol_bps {
            return (Regime::Unstable, RegimeReason::SpreadVolatility);
        }
        if snap.latency_p95_ms.is_some_and(|p95| p95 > c.unstable_latency_p95_ms) {
            return (Regime::Unstable, RegimeReason::LatencySpike);
        }
        if snap.data_age_ms > c.unstable_data_age_ms {
            return (Regime::Unstable, RegimeReason::DataAge);
        }

        if snap.trade_intensity >= c.fast_trade_intensity {
            return (Regime::Fast, RegimeReason::TradeIntensity);
        }
        if snap.mid_move_bps >= c.fast_mid_move_bps {
            return (Regime::Fast, RegimeReason::MidMove);
        }
        if snap.spread_vol_bps > c.fast_spread_vol_bps {
            return (Regime::Fast, RegimeReason::SpreadVolatility);
        }

        (Regime::Normal, RegimeReason::Calm)
    }

    pub fn classify(&self, snap: &MetricSnapshot, prev: &RegimeState) -> Classification {
        if let Some(failure) = self.integrity_failure(snap) {
            return force_unstable(prev, failure.regime_reason(), snap.ts_ms);
        }

        let (reading, reason) = self.assess(snap);

        if reading == prev.regime {
            return Classification {
                state: prev.hold(),
                transition: None,
            };
        }

        let ticks = match prev.candidate {
            Some(c) if c.regime == reading => c.ticks.saturating_add(1),
            _ => 1,
        };

        if ticks < self.cfg.dwell_ticks {
            let mut state = prev.hold();
            state.candidate = Some(Candidate {
                regime: reading,
                reason,
                ticks,
            });
            return Classification {
                state,
                transition: None,
            };
        }

        Classification {
            state: RegimeState::commit(reading, snap.ts_ms),
            transition: Some(RegimeTransition {
                from: prev.regime,
                to: reading,
                reason,
                forced: false,
            }),
        }
    }
}

fn force_unstable(prev: &RegimeState, reason: RegimeReason, ts_ms: u64) -> Classification {
    if prev.regime.is_unstable() {
        return Classification {
            state: prev.hold(),
            transition: None,
        };
    }

    Classification {
        state: RegimeState::commit(Regime::Unstable, ts_ms),
        transition: Some(RegimeTransition {
            from: prev.regime,
            to: Regime::Unstable,
            reason,
            forced: true,
        }),
    }
}
