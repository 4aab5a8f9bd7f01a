//! State-transition events.
//!
//! Every committed change to the (regime, permission, health) triple is
//! reported as a [`StateEvent`], so the event log alone is enough to rebuild
//! the final triple (see [`crate::replay`]).

use market::Symbol;
use serde::{Deserialize, Serialize};

use crate::error::{FeedbackField, FeedbackOutOfRange};
use crate::health::HealthScore;
use crate::permission::{Permission, PermissionReason, PermissionTransition};
use crate::regime::{Regime, RegimeReason, RegimeTransition};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEvent {
    pub symbol: Symbol,
    pub seq: u64,
    pub ts_ms: u64,
    #[serde(flatten)]
    pub kind: StateEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StateEventKind {
    Regime {
        from: Regime,
        to: Regime,
        reason: RegimeReason,
        forced: bool,
    },
    Permission {
        from: Permission,
        to: Permission,
        reason: PermissionReason,
        earliest_exit_ms: Option<u64>,
    },
    /// Integer score or band changed.
    Health { from: HealthScore, to: HealthScore },
    ObservationRejected { last_seq: u64, got_seq: u64 },
    /// `raw` is `None` when the reported value was NaN or infinite, which
    /// JSON cannot carry.
    FeedbackClamped {
        field: FeedbackField,
        raw: Option<f64>,
        clamped: f64,
    },
}

impl StateEventKind {
    /// `true` for a health change that moved the band.
    pub fn band_crossed(&self) -> bool {
        matches!(self, StateEventKind::Health { from, to } if from.band != to.band)
    }
}

impl From<RegimeTransition> for StateEventKind {
    fn from(t: RegimeTransition) -> Self {
        StateEventKind::Regime {
            from: t.from,
            to: t.to,
            reason: t.reason,
            forced: t.forced,
        }
    }
}

impl From<PermissionTransition> for StateEventKind {
    fn from(t: PermissionTransition) -> Self {
        StateEventKind::Permission {
            from: t.from,
            to: t.to,
            reason: t.reason,
            earliest_exit_ms: t.earliest_exit_ms,
        }
    }
}

impl From<FeedbackOutOfRange> for StateEventKind {
    fn from(e: FeedbackOutOfRange) -> Self {
        StateEventKind::FeedbackClamped {
            field: e.field,
            raw: e.raw.is_finite().then_some(e.raw),
            clamped: e.clamped,
        }
    }
}
