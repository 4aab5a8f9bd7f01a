//! Decision Synthesizer
//!
//! A pure lookup from `(permission, health, regime)` to the gate's answer for
//! one tick. Rows are checked most restrictive first, so the first one that
//! matches wins:
//!
//! | permission | health | regime   | outcome                                    |
//! |------------|--------|----------|--------------------------------------------|
//! | SUSPENDED  | any    | any      | ineligible                                 |
//! | COOLDOWN   | any    | any      | ineligible                                 |
//! | any        | RED    | any      | ineligible                                 |
//! | any        | any    | UNSTABLE | ineligible                                 |
//! | any        | any    | cold     | ineligible (window still warming up)       |
//! | PROBATION  | G / Y  | N / F    | probation ceiling and budget, TAKER        |
//! | ACTIVE     | GREEN  | N / F    | full ceiling, budget by score, MAKER       |
//! | ACTIVE     | YELLOW | N / F    | reduced ceiling, budget by score, MAKER only |
//!
//! FAST scales the ceiling down by `fast_ceiling_factor`.

use std::fmt;

use market::Symbol;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::health::{HealthBand, HealthConfig, HealthScore};
use crate::permission::Permission;
use crate::regime::Regime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionMode {
    None,
    Maker,
    Taker,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::None => f.write_str("NONE"),
            ExecutionMode::Maker => f.write_str("MAKER"),
            ExecutionMode::Taker => f.write_str("TAKER"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Suspended,
    Cooldown,
    HealthRed,
    RegimeUnstable,
    WarmingUp,
    Probation,
    ActiveGreen,
    ActiveYellow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub yellow_ceiling: f64,
    pub probation_ceiling: f64,
    /// Fraction of `max_risk_budget` granted during probation.
    pub probation_budget: f64,
    pub fast_ceiling_factor: f64,
    pub max_risk_budget: f64,
    pub green_budget_floor: f64,
    pub yellow_budget_floor: f64,
    pub yellow_budget_cap: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            yellow_ceiling: 0.5,
            probation_ceiling: 0.25,
            probation_budget: 0.25,
            fast_ceiling_factor: 0.75,
            max_risk_budget: 1.0,
            green_budget_floor: 0.60,
            yellow_budget_floor: 0.25,
            yellow_budget_cap: 0.55,
        }
    }
}

impl DecisionConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: String| Err(EngineError::ConfigurationInvalid(format!("decision: {msg}")));

        for (name, v) in [
            ("yellow_ceiling", self.yellow_ceiling),
            ("probation_ceiling", self.probation_ceiling),
            ("probation_budget", self.probation_budget),
            ("fast_ceiling_factor", self.fast_ceiling_factor),
            ("green_budget_floor", self.green_budget_floor),
            ("yellow_budget_floor", self.yellow_budget_floor),
            ("yellow_budget_cap", self.yellow_budget_cap),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return invalid(format!("{name} must be in [0, 1], got {v}"));
            }
        }
        if self.yellow_budget_floor > self.yellow_budget_cap {
            return invalid(format!(
                "yellow budget floor {} above cap {}",
                self.yellow_budget_floor, self.yellow_budget_cap
            ));
        }
        if !(self.max_risk_budget >= 0.0 && self.max_risk_budget.is_finite()) {
            return invalid(format!("max_risk_budget must be >= 0, got {}", self.max_risk_budget));
        }
        Ok(())
    }
}

/// The gate's answer for one symbol at one tick.
///
/// Built only by [`DecisionSynthesizer`]; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    symbol: Symbol,
    seq: u64,
    ts_ms: u64,
    eligible: bool,
    aggressiveness_ceiling: f64,
    risk_budget: f64,
    mode: ExecutionMode,
    /// `true` when `mode` is the only mode allowed, `false` when preferred.
    mode_locked: bool,
    reason: DecisionReason,
    regime: Regime,
    permission: Permission,
    health: HealthScore,
}

impl Decision {
    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn ts_ms(&self) -> u64 {
        self.ts_ms
    }

    pub fn eligible(&self) -> bool {
        self.eligible
    }

    pub fn aggressiveness_ceiling(&self) -> f64 {
        self.aggressiveness_ceiling
    }

    pub fn risk_budget(&self) -> f64 {
        self.risk_budget
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn mode_locked(&self) -> bool {
        self.mode_locked
    }

    pub fn reason(&self) -> DecisionReason {
        self.reason
    }

    pub fn regime(&self) -> Regime {
        self.regime
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    pub fn health(&self) -> HealthScore {
        self.health
    }
}

/// Where a decision sits in the stream.
#[derive(Debug, Clone)]
pub struct DecisionContext<'a> {
    pub symbol: &'a Symbol,
    pub seq: u64,
    pub ts_ms: u64,
}

/// The triple a decision is derived from, plus window warmth.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInputs {
    pub regime: Regime,
    pub permission: Permission,
    pub health: HealthScore,
    pub warm: bool,
}

pub struct DecisionSynthesizer {
    cfg: DecisionConfig,
    green_threshold: u8,
    yellow_threshold: u8,
}

impl DecisionSynthesizer {
    pub fn new(cfg: DecisionConfig, health: &HealthConfig) -> Self {
        Self {
            cfg,
            green_threshold: health.green_threshold,
            yellow_threshold: health.yellow_threshold,
        }
    }

    pub fn synthesize(&self, ctx: &DecisionContext<'_>, inputs: &DecisionInputs) -> Decision {
        let blocked = match (inputs.permission, inputs.health.band, inputs.regime) {
            (Permission::Suspended, _, _) => Some(DecisionReason::Suspended),
            (Permission::Cooldown, _, _) => Some(DecisionReason::Cooldown),
            (_, HealthBand::Red, _) => Some(DecisionReason::HealthRed),
            (_, _, Regime::Unstable) => Some(DecisionReason::RegimeUnstable),
            _ if !inputs.warm => Some(DecisionReason::WarmingUp),
            _ => None,
        };

        let base = Decision {
            symbol: ctx.symbol.clone(),
            seq: ctx.seq,
            ts_ms: ctx.ts_ms,
            eligible: false,
            aggressiveness_ceiling: 0.0,
            risk_budget: 0.0,
            mode: ExecutionMode::None,
            mode_locked: false,
            reason: DecisionReason::Suspended,
            regime: inputs.regime,
            permission: inputs.permission,
            health: inputs.health,
        };

        if let Some(reason) = blocked {
            return Decision { reason, ..base };
        }

        let score = inputs.health.value;
        let (ceiling, budget, mode, mode_locked, reason) = match (inputs.permission, inputs.health.band) {
            (Permission::Probation, _) => (
                self.cfg.probation_ceiling,
                self.cfg.probation_budget,
                ExecutionMode::Taker,
                false,
                DecisionReason::Probation,
            ),
            (_, HealthBand::Green) => (
                1.0,
                lerp(
                    self.cfg.green_budget_floor,
                    1.0,
                    fraction(score, self.green_threshold, 100),
                ),
                ExecutionMode::Maker,
                false,
                DecisionReason::ActiveGreen,
            ),
            _ => (
                self.cfg.yellow_ceiling,
                lerp(
                    self.cfg.yellow_budget_floor,
                    self.cfg.yellow_budget_cap,
                    fraction(score, self.yellow_threshold, self.green_threshold),
                ),
                ExecutionMode::Maker,
                true,
                DecisionReason::ActiveYellow,
            ),
        };

        let ceiling = if inputs.regime == Regime::Fast {
            ceiling * self.cfg.fast_ceiling_factor
        } else {
            ceiling
        };

        Decision {
            eligible: true,
            aggressiveness_ceiling: round3(ceiling.clamp(0.0, 1.0)),
            risk_budget: round3(budget * self.cfg.max_risk_budget),
            mode,
            mode_locked,
            reason,
            ..base
        }
    }
}

/// Position of `value` in `[lo, hi]`, clamped to `[0, 1]`.
fn fraction(value: u8, lo: u8, hi: u8) -> f64 {
    if hi <= lo {
        return 1.0;
    }
    ((f64::from(value) - f64::from(lo)) / (f64::from(hi) - f64::from(lo))).clamp(0.0, 1.0)
}

fn lerp(from: f64, to: f64, t: f64) -> f64 {
    from + (to - from) * t
}

fn round3(v: f64) -> f64 {
    (v * 1_000.0).round() / 1_000.0
}
