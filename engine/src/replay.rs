//! Rebuild the state triple from an event log.

use serde::{Deserialize, Serialize};

use crate::events::{StateEvent, StateEventKind};
use crate::health::HealthScore;
use crate::permission::Permission;
use crate::regime::Regime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTriple {
    pub regime: Regime,
    pub permission: Permission,
    pub health: HealthScore,
}

impl StateTriple {
    /// Fold transition events, in order, onto `initial`.
    ///
    /// Events that do not change the triple are skipped.
    pub fn reconstruct<'a>(initial: StateTriple, events: impl IntoIterator<Item = &'a StateEvent>) -> StateTriple {
        events.into_iter().fold(initial, |mut triple, ev| {
            match ev.kind {
                StateEventKind::Regime { to, .. } => triple.regime = to,
                StateEventKind::Permission { to, .. } => triple.permission = to,
                StateEventKind::Health { to, .. } => triple.health = to,
                StateEventKind::ObservationRejected { .. } | StateEventKind::FeedbackClamped { .. } => {}
            }
            triple
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthBand;
    use crate::permission::PermissionReason;
    use crate::regime::RegimeReason;
    use market::Symbol;

    fn ev(kind: StateEventKind) -> StateEvent {
        StateEvent {
            symbol: Symbol::new("BTCUSDT"),
            seq: 1,
            ts_ms: 1,
            kind,
        }
    }

    #[test]
    fn last_transition_of_each_kind_wins() {
        let initial = StateTriple {
            regime: Regime::Normal,
            permission: Permission::Active,
            health: HealthScore {
                value: 85,
                band: HealthBand::Green,
            },
        };
        let log = [
            ev(StateEventKind::Regime {
                from: Regime::Normal,
                to: Regime::Unstable,
                reason: RegimeReason::SpreadWide,
                forced: false,
            }),
            ev(StateEventKind::Permission {
                from: Permission::Active,
                to: Permission::Cooldown,
                reason: PermissionReason::RegimeUnstable,
                earliest_exit_ms: Some(60_001),
            }),
            ev(StateEventKind::ObservationRejected { last_seq: 1, got_seq: 1 }),
            ev(StateEventKind::Health {
                from: initial.health,
                to: HealthScore {
                    value: 48,
                    band: HealthBand::Yellow,
                },
            }),
        ];

        let end = StateTriple::reconstruct(initial, &log);
        assert_eq!(end.regime, Regime::Unstable);
        assert_eq!(end.permission, Permission::Cooldown);
        assert_eq!(end.health.value, 48);
    }
}
