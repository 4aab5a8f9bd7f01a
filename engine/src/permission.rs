//! Permission Gate
//!
//! Explicit state machine over `ACTIVE | COOLDOWN | PROBATION | SUSPENDED`.
//! Every transition is guarded by one of the predicates at the bottom of this
//! file and every timer runs on stream time, never the wall clock.
//!
//! `SUSPENDED` is sticky: nothing but [`PermissionGate::operator_reset`] leaves it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::regime::{IntegrityFailure, RegimeState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Permission {
    Active,
    Cooldown,
    Probation,
    Suspended,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Active => f.write_str("ACTIVE"),
            Permission::Cooldown => f.write_str("COOLDOWN"),
            Permission::Probation => f.write_str("PROBATION"),
            Permission::Suspended => f.write_str("SUSPENDED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendCause {
    Integrity(IntegrityFailure),
    KillSwitch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "UPPERCASE")]
pub enum PermissionPhase {
    Active,
    Cooldown { until_ms: u64 },
    Probation { until_ms: u64 },
    Suspended { cause: SuspendCause },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionReason {
    Startup,
    RegimeUnstable,
    AdverseFills,
    CooldownElapsed,
    ProbationPassed,
    Integrity(IntegrityFailure),
    KillSwitch,
    OperatorReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionState {
    pub phase: PermissionPhase,
    pub entered_at_ms: u64,
    pub reason: PermissionReason,
}

impl PermissionState {
    pub fn initial(ts_ms: u64) -> Self {
        Self {
            phase: PermissionPhase::Active,
            entered_at_ms: ts_ms,
            reason: PermissionReason::Startup,
        }
    }

    pub fn permission(&self) -> Permission {
        match self.phase {
            PermissionPhase::Active => Permission::Active,
            PermissionPhase::Cooldown { .. } => Permission::Cooldown,
            PermissionPhase::Probation { .. } => Permission::Probation,
            PermissionPhase::Suspended { .. } => Permission::Suspended,
        }
    }

    /// Scheduled earliest exit for timed states.
    pub fn earliest_exit_ms(&self) -> Option<u64> {
        match self.phase {
            PermissionPhase::Cooldown { until_ms } | PermissionPhase::Probation { until_ms } => {
                Some(until_ms)
            }
            PermissionPhase::Active | PermissionPhase::Suspended { .. } => None,
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.phase, PermissionPhase::Suspended { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    /// Minimum stream time spent in COOLDOWN, re-armed while UNSTABLE.
    pub cooldown_ms: u64,
    pub probation_ms: u64,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 60_000,
            probation_ms: 30_000,
        }
    }
}

impl PermissionConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.cooldown_ms == 0 || self.probation_ms == 0 {
            return Err(EngineError::ConfigurationInvalid(
                "permission: cooldown_ms and probation_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// What the gate sees on one tick.
#[derive(Debug, Clone, Copy)]
pub struct GateInputs<'a> {
    pub ts_ms: u64,
    pub regime: &'a RegimeState,
    pub integrity: Option<IntegrityFailure>,
    /// Raised by the health model after a streak of adverse fills.
    pub adverse_fills: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionTransition {
    pub from: Permission,
    pub to: Permission,
    pub reason: PermissionReason,
    pub earliest_exit_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateStep {
    pub state: PermissionState,
    pub transition: Option<PermissionTransition>,
}

impl GateStep {
    fn stay(state: PermissionState) -> Self {
        Self {
            state,
            transition: None,
        }
    }
}

pub struct PermissionGate {
    cfg: PermissionConfig,
}

impl PermissionGate {
    pub fn new(cfg: PermissionConfig) -> Self {
        Self { cfg }
    }

    pub fn step(&self, current: &PermissionState, input: &GateInputs<'_>) -> GateStep {
        if current.is_suspended() {
            return GateStep::stay(*current);
        }

        if let Some(failure) = must_suspend(input) {
            return self.enter(
                current,
                PermissionPhase::Suspended {
                    cause: SuspendCause::Integrity(failure),
                },
                input.ts_ms,
                PermissionReason::Integrity(failure),
            );
        }

        match current.phase {
            PermissionPhase::Active => match adverse_event(input) {
                Some(reason) => self.enter_cooldown(current, input.ts_ms, reason),
                None => GateStep::stay(*current),
            },

            PermissionPhase::Cooldown { until_ms } => {
                if adverse_event(input).is_some() {
                    // Re-armed in place: same state, later exit.
                    let rearmed = input.ts_ms.saturating_add(self.cfg.cooldown_ms).max(until_ms);
                    return GateStep::stay(PermissionState {
                        phase: PermissionPhase::Cooldown { until_ms: rearmed },
                        ..*current
                    });
                }
                if cooldown_elapsed(until_ms, input) {
                    let until_ms = input.ts_ms.saturating_add(self.cfg.probation_ms);
                    return self.enter(
                        current,
                        PermissionPhase::Probation { until_ms },
                        input.ts_ms,
                        PermissionReason::CooldownElapsed,
                    );
                }
                GateStep::stay(*current)
            }

            PermissionPhase::Probation { until_ms } => {
                if let Some(reason) = adverse_event(input) {
                    return self.enter_cooldown(current, input.ts_ms, reason);
                }
                if probation_passed(until_ms, input) {
                    return self.enter(
                        current,
                        PermissionPhase::Active,
                        input.ts_ms,
                        PermissionReason::ProbationPassed,
                    );
                }
                GateStep::stay(*current)
            }

            PermissionPhase::Suspended { .. } => GateStep::stay(*current),
        }
    }

    /// Explicit kill signal. A symbol already suspended keeps its first cause.
    pub fn kill(&self, current: &PermissionState, ts_ms: u64) -> GateStep {
        if current.is_suspended() {
            return GateStep::stay(*current);
        }
        self.enter(
            current,
            PermissionPhase::Suspended {
                cause: SuspendCause::KillSwitch,
            },
            ts_ms,
            PermissionReason::KillSwitch,
        )
    }

    /// The only way out of SUSPENDED. Anywhere else this is a no-op.
    pub fn operator_reset(&self, current: &PermissionState, ts_ms: u64) -> GateStep {
        if !current.is_suspended() {
            return GateStep::stay(*current);
        }
        self.enter_cooldown(current, ts_ms, PermissionReason::OperatorReset)
    }

    fn enter_cooldown(&self, current: &PermissionState, ts_ms: u64, reason: PermissionReason) -> GateStep {
        let until_ms = ts_ms.saturating_add(self.cfg.cooldown_ms);
        self.enter(current, PermissionPhase::Cooldown { until_ms }, ts_ms, reason)
    }

    fn enter(
        &self,
        current: &PermissionState,
        phase: PermissionPhase,
        ts_ms: u64,
        reason: PermissionReason,
    ) -> GateStep {
        let next = PermissionState {
            phase,
            entered_at_ms: ts_ms,
            reason,
        };

        GateStep {
            state: next,
            transition: Some(PermissionTransition {
                from: current.permission(),
                to: next.permission(),
                reason,
                earliest_exit_ms: next.earliest_exit_ms(),
            }),
        }
    }
}

// Guards

fn must_suspend(input: &GateInputs<'_>) -> Option<IntegrityFailure> {
    input.integrity
}

fn adverse_event(input: &GateInputs<'_>) -> Option<PermissionReason> {
    if input.regime.regime.is_unstable() {
        Some(PermissionReason::RegimeUnstable)
    } else if input.adverse_fills {
        Some(PermissionReason::AdverseFills)
    } else {
        None
    }
}

fn cooldown_elapsed(until_ms: u64, input: &GateInputs<'_>) -> bool {
    input.ts_ms >= until_ms && !input.regime.regime.is_unstable()
}

fn probation_passed(until_ms: u64, input: &GateInputs<'_>) -> bool {
    input.ts_ms >= until_ms
}
