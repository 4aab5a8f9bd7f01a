//! Per-symbol pipeline.
//!
//! One [`SymbolPipeline`] per symbol owns every component and the current
//! (regime, permission, health) triple. Each tick runs in a fixed order:
//!
//! 1. merge pending execution feedback
//! 2. state formation
//! 3. regime classification
//! 4. permission gate
//! 5. health score
//! 6. decision
//!
//! and returns the decision together with the events it produced, in the
//! order they happened. Nothing here is shared between symbols.

use market::{MarketError, MarketObservation, MetricSnapshot, StateFormation, Symbol};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::decision::{Decision, DecisionContext, DecisionInputs, DecisionSynthesizer};
use crate::error::EngineError;
use crate::events::{StateEvent, StateEventKind};
use crate::feedback::ExecutionFeedback;
use crate::health::{ExecutionStats, HealthModel, HealthScore};
use crate::inbox::FeedbackInbox;
use crate::permission::{GateInputs, GateStep, PermissionGate, PermissionState};
use crate::regime::{RegimeClassifier, RegimeState};
use crate::replay::StateTriple;
use crate::throttle::WarnThrottle;

/// Default bound on feedback waiting for the next tick.
pub const DEFAULT_INBOX_CAPACITY: usize = 64;

/// Minimum stream time between two warnings of the same kind.
const WARN_COOLDOWN_MS: u64 = 3_000;

#[derive(Debug, Clone, PartialEq)]
pub struct TickOutput {
    pub decision: Decision,
    pub events: Vec<StateEvent>,
}

pub struct SymbolPipeline {
    symbol: Symbol,
    formation: StateFormation,
    classifier: RegimeClassifier,
    gate: PermissionGate,
    health_model: HealthModel,
    synthesizer: DecisionSynthesizer,
    inbox: FeedbackInbox,

    regime: RegimeState,
    permission: PermissionState,
    health: HealthScore,

    last_seq: u64,
    last_ts_ms: u64,
    warm: bool,
    warnings: WarnThrottle,
}

impl SymbolPipeline {
    pub fn new(symbol: Symbol, cfg: &EngineConfig) -> Result<Self, EngineError> {
        Self::with_inbox_capacity(symbol, cfg, DEFAULT_INBOX_CAPACITY)
    }

    pub fn with_inbox_capacity(symbol: Symbol, cfg: &EngineConfig, inbox_capacity: usize) -> Result<Self, EngineError> {
        cfg.validate()?;

        let permission = PermissionState::initial(0);
        let health_model = HealthModel::new(cfg.health.clone());
        let health = health_model.peek(&permission, 0);

        Ok(Self {
            formation: StateFormation::new(symbol.clone(), &cfg.formation),
            classifier: RegimeClassifier::new(cfg.regime.clone()),
            gate: PermissionGate::new(cfg.permission.clone()),
            synthesizer: DecisionSynthesizer::new(cfg.decision.clone(), &cfg.health),
            inbox: FeedbackInbox::new(inbox_capacity),
            health_model,
            symbol,
            regime: RegimeState::initial(0),
            permission,
            health,
            last_seq: 0,
            last_ts_ms: 0,
            warm: false,
            warnings: WarnThrottle::new(WARN_COOLDOWN_MS),
        })
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn regime(&self) -> &RegimeState {
        &self.regime
    }

    pub fn permission(&self) -> &PermissionState {
        &self.permission
    }

    pub fn health(&self) -> HealthScore {
        self.health
    }

    pub fn triple(&self) -> StateTriple {
        StateTriple {
            regime: self.regime.regime,
            permission: self.permission.permission(),
            health: self.health,
        }
    }

    pub fn execution_stats(&self) -> &ExecutionStats {
        self.health_model.stats()
    }

    /// Feedback dropped because the inbox was full.
    pub fn feedback_dropped(&self) -> u64 {
        self.inbox.dropped()
    }

    /// Queue feedback for the next tick.
    pub fn enqueue_feedback(&mut self, feedback: ExecutionFeedback) {
        let ts_ms = self.last_ts_ms.max(feedback.ts_ms);
        if let Some(evicted) = self.inbox.push(feedback) {
            if let Some(suppressed) = self.warnings.admit("feedback_dropped", ts_ms) {
                warn!(
                    component = "pipeline",
                    event = "feedback_dropped",
                    symbol = %self.symbol,
                    evicted_ts_ms = evicted.ts_ms,
                    suppressed,
                    dropped_total = self.inbox.dropped(),
                    "feedback inbox full, dropped oldest"
                );
            }
        }
    }

    /// Process one observation.
    ///
    /// `feedback` is queued first, so it survives a rejected observation and
    /// is merged on the next accepted tick. On `Err` the triple is untouched.
    pub fn on_observation(
        &mut self,
        obs: &MarketObservation,
        feedback: impl IntoIterator<Item = ExecutionFeedback>,
    ) -> Result<TickOutput, MarketError> {
        for fb in feedback {
            self.enqueue_feedback(fb);
        }

        let snapshot = match self.formation.ingest(obs) {
            Ok(s) => s,
            Err(e) => {
                warn!(component = "pipeline", event = "observation_rejected", symbol = %self.symbol, error = %e);
                return Err(e);
            }
        };

        Ok(self.tick(snapshot))
    }

    /// Re-evaluate at `ts_ms` without new market data, so a silent feed ages
    /// into UNSTABLE and then SUSPENDED. `None` before the first observation.
    pub fn on_heartbeat(
        &mut self,
        ts_ms: u64,
        feedback: impl IntoIterator<Item = ExecutionFeedback>,
    ) -> Option<TickOutput> {
        for fb in feedback {
            self.enqueue_feedback(fb);
        }

        let snapshot = self.formation.snapshot_at(ts_ms)?;
        Some(self.tick(snapshot))
    }

    /// Explicit kill signal: SUSPENDED immediately, whatever the current state.
    pub fn kill(&mut self, ts_ms: u64, reason: &str) -> TickOutput {
        let ts_ms = self.advance_clock(ts_ms);
        warn!(component = "permission", event = "kill", symbol = %self.symbol, reason, "kill signal received");

        let step = self.gate.kill(&self.permission, ts_ms);
        self.apply_control(step, ts_ms)
    }

    /// Operator reset: SUSPENDED to COOLDOWN. A logged no-op anywhere else.
    pub fn operator_reset(&mut self, ts_ms: u64) -> TickOutput {
        let ts_ms = self.advance_clock(ts_ms);

        let step = self.gate.operator_reset(&self.permission, ts_ms);
        if step.transition.is_none() {
            info!(
                component = "permission",
                event = "reset_ignored",
                symbol = %self.symbol,
                permission = %self.permission.permission(),
                "operator reset outside SUSPENDED has no effect"
            );
        }
        self.apply_control(step, ts_ms)
    }

    /// Build the event for an observation `on_observation` refused.
    pub fn rejection_event(&self, err: &MarketError) -> Option<StateEvent> {
        match err {
            MarketError::OutOfOrderInput { last_seq, got_seq, .. } => Some(self.event(
                self.last_seq,
                self.last_ts_ms,
                StateEventKind::ObservationRejected {
                    last_seq: *last_seq,
                    got_seq: *got_seq,
                },
            )),
            _ => None,
        }
    }

    fn tick(&mut self, snap: MetricSnapshot) -> TickOutput {
        let (seq, ts_ms) = (snap.seq, snap.ts_ms);
        self.last_seq = seq;
        self.last_ts_ms = self.last_ts_ms.max(ts_ms);
        self.warm = snap.warm;

        let mut events = Vec::new();

        for fb in self.inbox.drain() {
            for clamp in self.health_model.absorb(&fb) {
                if let Some(suppressed) = self.warnings.admit("feedback_clamped", ts_ms) {
                    warn!(
                        component = "health",
                        event = "feedback_clamped",
                        symbol = %self.symbol,
                        error = %clamp,
                        suppressed,
                        "feedback clamped"
                    );
                }
                events.push(self.event(seq, ts_ms, clamp.into()));
            }
        }
        let adverse_fills = self.health_model.take_adverse_signal();
        if adverse_fills {
            info!(component = "health", event = "adverse_fills", symbol = %self.symbol, "adverse fill streak");
        }

        let classification = self.classifier.classify(&snap, &self.regime);
        if let Some(t) = classification.transition {
            info!(
                component = "regime",
                event = "transition",
                symbol = %self.symbol,
                seq,
                from = %t.from,
                to = %t.to,
                reason = ?t.reason,
                forced = t.forced,
                "regime changed"
            );
            events.push(self.event(seq, ts_ms, t.into()));
        }
        self.regime = classification.state;

        let step = self.gate.step(
            &self.permission,
            &GateInputs {
                ts_ms,
                regime: &self.regime,
                integrity: self.classifier.integrity_failure(&snap),
                adverse_fills,
            },
        );
        self.commit_permission(step, seq, ts_ms, &mut events);

        let health = self.health_model.score(&self.permission, &self.regime, ts_ms);
        self.commit_health(health, seq, ts_ms, &mut events);

        TickOutput {
            decision: self.decide(seq, ts_ms),
            events,
        }
    }

    fn apply_control(&mut self, step: GateStep, ts_ms: u64) -> TickOutput {
        let seq = self.last_seq;
        let mut events = Vec::new();

        self.commit_permission(step, seq, ts_ms, &mut events);
        let health = self.health_model.peek(&self.permission, ts_ms);
        self.commit_health(health, seq, ts_ms, &mut events);

        TickOutput {
            decision: self.decide(seq, ts_ms),
            events,
        }
    }

    fn commit_permission(&mut self, step: GateStep, seq: u64, ts_ms: u64, events: &mut Vec<StateEvent>) {
        if let Some(t) = step.transition {
            info!(
                component = "permission",
                event = "transition",
                symbol = %self.symbol,
                seq,
                from = %t.from,
                to = %t.to,
                reason = ?t.reason,
                earliest_exit_ms = ?t.earliest_exit_ms,
                "permission changed"
            );
            events.push(self.event(seq, ts_ms, t.into()));
        } else if step.state != self.permission {
            debug!(
                component = "permission",
                event = "rearmed",
                symbol = %self.symbol,
                earliest_exit_ms = ?step.state.earliest_exit_ms(),
                "cooldown extended"
            );
        }
        self.permission = step.state;
    }

    fn commit_health(&mut self, health: HealthScore, seq: u64, ts_ms: u64, events: &mut Vec<StateEvent>) {
        if health == self.health {
            return;
        }

        let kind = StateEventKind::Health {
            from: self.health,
            to: health,
        };
        if kind.band_crossed() {
            info!(
                component = "health",
                event = "band_crossed",
                symbol = %self.symbol,
                from = %self.health.band,
                to = %health.band,
                score = health.value,
                "health band changed"
            );
        }
        events.push(self.event(seq, ts_ms, kind));
        self.health = health;
    }

    fn decide(&self, seq: u64, ts_ms: u64) -> Decision {
        self.synthesizer.synthesize(
            &DecisionContext {
                symbol: &self.symbol,
                seq,
                ts_ms,
            },
            &DecisionInputs {
                regime: self.regime.regime,
                permission: self.permission.permission(),
                health: self.health,
                warm: self.warm,
            },
        )
    }

    fn advance_clock(&mut self, ts_ms: u64) -> u64 {
        self.last_ts_ms = self.last_ts_ms.max(ts_ms);
        self.last_ts_ms
    }

    fn event(&self, seq: u64, ts_ms: u64, kind: StateEventKind) -> StateEvent {
        StateEvent {
            symbol: self.symbol.clone(),
            seq,
            ts_ms,
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{DecisionReason, ExecutionMode};
    use crate::feedback::{FillOutcome, Markout};
    use crate::permission::Permission;
    use crate::regime::Regime;
    use market::DataIntegrity;
    use tracing_test::traced_test;

    fn obs(seq: u64, ts_ms: u64) -> MarketObservation {
        MarketObservation {
            symbol: Symbol::new("BTCUSDT"),
            seq,
            ts_ms,
            exchange_ts_ms: None,
            bid_px: 99.99,
            bid_sz: 1.0,
            ask_px: 100.01,
            ask_sz: 1.0,
            last_trade: None,
            integrity: DataIntegrity::Ok,
        }
    }

    fn pipeline() -> SymbolPipeline {
        SymbolPipeline::new(Symbol::new("BTCUSDT"), &EngineConfig::default()).unwrap()
    }

    fn warm_up(p: &mut SymbolPipeline) -> u64 {
        let mut seq = 0;
        for i in 0..5 {
            seq = i + 1;
            p.on_observation(&obs(seq, i * 1_000), None).unwrap();
        }
        seq
    }

    fn adverse(ts_ms: u64) -> ExecutionFeedback {
        ExecutionFeedback {
            symbol: Symbol::new("BTCUSDT"),
            ts_ms,
            outcome: FillOutcome::Filled,
            slippage_bps: 1.0,
            markouts: vec![Markout {
                horizon_ms: 1_000,
                bps: -8.0,
            }],
        }
    }

    #[test]
    fn cold_pipeline_withholds_then_goes_active() {
        let mut p = pipeline();

        let first = p.on_observation(&obs(1, 0), None).unwrap();
        assert!(!first.decision.eligible());
        assert_eq!(first.decision.reason(), DecisionReason::WarmingUp);

        for i in 1..5 {
            p.on_observation(&obs(i + 1, i * 1_000), None).unwrap();
        }
        let out = p.on_observation(&obs(6, 5_000), None).unwrap();
        assert!(out.decision.eligible());
        assert_eq!(out.decision.mode(), ExecutionMode::Maker);
    }

    #[test]
    #[traced_test]
    fn out_of_order_keeps_state_and_feedback() {
        let mut p = pipeline();
        let seq = warm_up(&mut p);
        let before = p.triple();

        let err = p.on_observation(&obs(seq, 10_000), [adverse(9_000)]).unwrap_err();
        assert!(matches!(err, MarketError::OutOfOrderInput { .. }));
        assert_eq!(p.triple(), before);
        assert!(logs_contain("observation_rejected"));

        let ev = p.rejection_event(&err).expect("event");
        assert_eq!(ev.kind, StateEventKind::ObservationRejected { last_seq: seq, got_seq: seq });

        // the queued feedback is merged on the next accepted tick
        p.on_observation(&obs(seq + 1, 10_000), None).unwrap();
        assert_eq!(p.execution_stats().fills, 1);
    }

    #[test]
    fn adverse_fill_streak_sends_active_to_cooldown() {
        let mut p = pipeline();
        let seq = warm_up(&mut p);

        let out = p
            .on_observation(&obs(seq + 1, 6_000), [adverse(5_100), adverse(5_200), adverse(5_300)])
            .unwrap();

        assert_eq!(p.permission().permission(), Permission::Cooldown);
        assert!(!out.decision.eligible());
        assert!(out.events.iter().any(|e| matches!(
            e.kind,
            StateEventKind::Permission {
                to: Permission::Cooldown,
                ..
            }
        )));
    }

    #[test]
    fn clamped_feedback_is_reported_before_transitions() {
        let mut p = pipeline();
        let seq = warm_up(&mut p);

        let mut wild = adverse(5_500);
        wild.slippage_bps = 900.0;
        let out = p.on_observation(&obs(seq + 1, 6_000), [wild]).unwrap();

        assert!(matches!(
            out.events.first().map(|e| &e.kind),
            Some(StateEventKind::FeedbackClamped { clamped, .. }) if *clamped == 100.0
        ));
    }

    #[test]
    fn nan_feedback_leaves_a_decodable_event_log() {
        let mut p = pipeline();
        let seq = warm_up(&mut p);

        let mut broken = adverse(5_500);
        broken.slippage_bps = f64::NAN;
        let out = p.on_observation(&obs(seq + 1, 6_000), [broken]).unwrap();

        for ev in &out.events {
            let line = serde_json::to_string(ev).unwrap();
            let back: StateEvent = serde_json::from_str(&line).unwrap();
            assert_eq!(&back, ev);
        }
        assert!(matches!(
            out.events.first().map(|e| &e.kind),
            Some(StateEventKind::FeedbackClamped { raw: None, .. })
        ));
    }

    #[test]
    #[traced_test]
    fn repeated_clamps_warn_once_per_cooldown() {
        let mut p = pipeline();
        let mut seq = warm_up(&mut p);

        let wild = |ts_ms| {
            let mut fb = adverse(ts_ms);
            fb.markouts.clear();
            fb.slippage_bps = 900.0;
            fb
        };
        let mut clamps = 0;
        for ts in [5_000, 5_500, 6_000, 7_000] {
            seq += 1;
            let out = p.on_observation(&obs(seq, ts), [wild(ts)]).unwrap();
            clamps += out
                .events
                .iter()
                .filter(|e| matches!(e.kind, StateEventKind::FeedbackClamped { .. }))
                .count();
        }
        assert_eq!(clamps, 4);
        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|l| l.contains("feedback clamped")).count() {
                1 => Ok(()),
                n => Err(format!("expected one warning inside the cooldown, got {n}")),
            }
        });

        seq += 1;
        p.on_observation(&obs(seq, 8_000), [wild(8_000)]).unwrap();
        assert!(logs_contain("suppressed=3"));
    }

    #[test]
    #[traced_test]
    fn kill_suspends_and_reset_needs_operator() {
        let mut p = pipeline();
        let seq = warm_up(&mut p);

        let out = p.kill(4_500, "manual");
        assert_eq!(out.decision.permission(), Permission::Suspended);
        assert!(!out.decision.eligible());
        assert_eq!(out.decision.seq(), seq);
        assert!(logs_contain("kill signal received"));

        // clean data does not lift a suspension
        let later = p.on_observation(&obs(seq + 1, 500_000), None).unwrap();
        assert_eq!(later.decision.permission(), Permission::Suspended);

        let reset = p.operator_reset(500_001);
        assert_eq!(reset.decision.permission(), Permission::Cooldown);
        assert!(!reset.decision.eligible());

        let noop = p.operator_reset(500_002);
        assert!(noop.events.is_empty());
        assert!(logs_contain("reset_ignored"));
    }

    #[test]
    fn silent_feed_goes_unstable_then_suspended() {
        let mut p = pipeline();
        warm_up(&mut p);

        let late = p.on_heartbeat(4_000 + 6_000, None).expect("snapshot");
        assert_eq!(late.decision.regime(), Regime::Normal);

        let dead = p.on_heartbeat(4_000 + 15_000, None).expect("snapshot");
        assert_eq!(dead.decision.regime(), Regime::Unstable);
        assert_eq!(dead.decision.permission(), Permission::Suspended);
    }

    #[test]
    fn heartbeat_before_first_observation_is_nothing() {
        let mut p = pipeline();
        assert!(p.on_heartbeat(1_000, None).is_none());
    }

    #[test]
    fn invalid_config_is_refused() {
        let mut cfg = EngineConfig::default();
        cfg.permission.cooldown_ms = 0;
        assert!(SymbolPipeline::new(Symbol::new("BTCUSDT"), &cfg).is_err());
    }
}
