use engine::{
    Decision, EngineConfig, ExecutionFeedback, ExecutionMode, FillOutcome, HealthBand, Markout, Permission,
    StateEvent, StateEventKind, StateTriple, SymbolPipeline,
};
use market::{AggressorSide, DataIntegrity, MarketObservation, Symbol, TradePrint};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Step {
    Quote {
        dt_ms: u64,
        spread_bps: f64,
        mid: f64,
        trade: Option<(f64, bool)>,
        integrity: DataIntegrity,
        repeat_seq: bool,
    },
    Heartbeat {
        dt_ms: u64,
    },
    Fill {
        slippage_bps: f64,
        markout_bps: f64,
    },
    Kill,
    Reset,
}

fn integrity() -> impl Strategy<Value = DataIntegrity> {
    prop_oneof![
        20 => Just(DataIntegrity::Ok),
        1 => Just(DataIntegrity::Gap),
        1 => Just(DataIntegrity::Malformed),
    ]
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        12 => (
            prop_oneof![8 => 100u64..1_500, 1 => 4_000u64..20_000],
            prop_oneof![4 => 0.5f64..10.0, 1 => 10.0f64..80.0],
            99.0f64..101.0,
            prop::option::of((0.01f64..5.0, any::<bool>())),
            integrity(),
            prop::bool::weighted(0.05),
        )
            .prop_map(|(dt_ms, spread_bps, mid, trade, integrity, repeat_seq)| Step::Quote {
                dt_ms,
                spread_bps,
                mid,
                trade,
                integrity,
                repeat_seq,
            }),
        1 => (1_000u64..20_000).prop_map(|dt_ms| Step::Heartbeat { dt_ms }),
        3 => (-200.0f64..200.0, -30.0f64..30.0)
            .prop_map(|(slippage_bps, markout_bps)| Step::Fill { slippage_bps, markout_bps }),
        1 => Just(Step::Kill),
        1 => Just(Step::Reset),
    ]
}

fn cfg() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.formation.warmup_min_samples = 3;
    cfg.formation.warmup_min_span_ms = 500;
    cfg.permission.cooldown_ms = 5_000;
    cfg.permission.probation_ms = 3_000;
    cfg
}

/// Everything a run produced, in order. `ticked` marks outputs that went
/// through the classifier (observations and heartbeats).
#[derive(Default)]
struct Run {
    decisions: Vec<Decision>,
    events: Vec<StateEvent>,
    ticks: Vec<(bool, Vec<StateEvent>)>,
    initial: Option<StateTriple>,
    last: Option<StateTriple>,
}

fn record(out: &mut Run, ticked: bool, decision: Decision, events: Vec<StateEvent>) {
    out.events.extend(events.iter().cloned());
    out.ticks.push((ticked, events));
    out.decisions.push(decision);
}

fn run(steps: &[Step]) -> Run {
    let symbol = Symbol::new("BTCUSDT");
    let mut p = SymbolPipeline::new(symbol.clone(), &cfg()).unwrap();
    let mut out = Run {
        initial: Some(p.triple()),
        ..Run::default()
    };

    let (mut seq, mut ts_ms) = (0u64, 0u64);
    let mut pending = Vec::new();

    for step in steps {
        match step {
            Step::Quote {
                dt_ms,
                spread_bps,
                mid,
                trade,
                integrity,
                repeat_seq,
            } => {
                ts_ms += dt_ms;
                if !repeat_seq || seq == 0 {
                    seq += 1;
                }
                let half = mid * spread_bps / 10_000.0 / 2.0;
                let obs = MarketObservation {
                    symbol: symbol.clone(),
                    seq,
                    ts_ms,
                    exchange_ts_ms: Some(ts_ms.saturating_sub(20)),
                    bid_px: mid - half,
                    bid_sz: 1.0,
                    ask_px: mid + half,
                    ask_sz: 1.0,
                    last_trade: trade.map(|(size, buy)| TradePrint {
                        price: *mid,
                        size,
                        side: if buy { AggressorSide::Buy } else { AggressorSide::Sell },
                    }),
                    integrity: *integrity,
                };

                match p.on_observation(&obs, pending.drain(..)) {
                    Ok(tick) => record(&mut out, true, tick.decision, tick.events),
                    Err(e) => {
                        let ev = p.rejection_event(&e).expect("out-of-order carries an event");
                        out.events.push(ev);
                    }
                }
            }
            Step::Heartbeat { dt_ms } => {
                ts_ms += dt_ms;
                if let Some(tick) = p.on_heartbeat(ts_ms, pending.drain(..)) {
                    record(&mut out, true, tick.decision, tick.events);
                }
            }
            Step::Fill {
                slippage_bps,
                markout_bps,
            } => pending.push(ExecutionFeedback {
                symbol: symbol.clone(),
                ts_ms,
                outcome: FillOutcome::Filled,
                slippage_bps: *slippage_bps,
                markouts: vec![Markout {
                    horizon_ms: 1_000,
                    bps: *markout_bps,
                }],
            }),
            Step::Kill => {
                let tick = p.kill(ts_ms, "property");
                record(&mut out, false, tick.decision, tick.events);
            }
            Step::Reset => {
                let tick = p.operator_reset(ts_ms);
                record(&mut out, false, tick.decision, tick.events);
            }
        }
    }

    out.last = Some(p.triple());
    out
}

fn serialized(run: &Run) -> String {
    let mut s = String::new();
    for d in &run.decisions {
        s.push_str(&serde_json::to_string(d).unwrap());
        s.push('\n');
    }
    for e in &run.events {
        s.push_str(&serde_json::to_string(e).unwrap());
        s.push('\n');
    }
    s
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn suspended_is_never_eligible(steps in prop::collection::vec(step(), 1..120)) {
        for d in run(&steps).decisions {
            if d.permission() == Permission::Suspended {
                prop_assert!(!d.eligible());
                prop_assert_eq!(d.mode(), ExecutionMode::None);
            }
            if d.health().band == HealthBand::Red {
                prop_assert_eq!(d.aggressiveness_ceiling(), 0.0);
            }
            prop_assert!((0.0..=1.0).contains(&d.aggressiveness_ceiling()));
            prop_assert!(d.risk_budget() >= 0.0);
        }
    }

    #[test]
    fn unforced_regime_changes_respect_dwell(steps in prop::collection::vec(step(), 1..120)) {
        let dwell = cfg().regime.dwell_ticks as usize;
        let r = run(&steps);

        let mut tick_index = 0usize;
        let mut last_commit = 0usize;
        for (ticked, events) in &r.ticks {
            if !ticked {
                continue;
            }
            tick_index += 1;
            for e in events {
                if let StateEventKind::Regime { forced, .. } = e.kind {
                    if !forced {
                        prop_assert!(tick_index - last_commit >= dwell);
                    }
                    last_commit = tick_index;
                }
            }
        }
    }

    #[test]
    fn probation_never_starts_before_cooldown_elapses(steps in prop::collection::vec(step(), 1..160)) {
        let cooldown_ms = cfg().permission.cooldown_ms;
        let mut entered_cooldown = None;

        for e in run(&steps).events {
            if let StateEventKind::Permission { from, to, .. } = e.kind {
                if to == Permission::Cooldown {
                    entered_cooldown = Some(e.ts_ms);
                }
                if from == Permission::Cooldown && to == Permission::Probation {
                    let entered = entered_cooldown.expect("cooldown precedes probation");
                    prop_assert!(e.ts_ms - entered >= cooldown_ms);
                }
            }
        }
    }

    #[test]
    fn identical_input_gives_identical_output(steps in prop::collection::vec(step(), 1..100)) {
        prop_assert_eq!(serialized(&run(&steps)), serialized(&run(&steps)));
    }

    #[test]
    fn event_log_rebuilds_final_triple(steps in prop::collection::vec(step(), 1..120)) {
        let r = run(&steps);

        let json: Vec<String> = r.events.iter().map(|e| serde_json::to_string(e).unwrap()).collect();
        let decoded: Vec<StateEvent> = json.iter().map(|j| serde_json::from_str(j).unwrap()).collect();

        let initial = r.initial.expect("initial triple");
        prop_assert_eq!(Some(StateTriple::reconstruct(initial, &decoded)), r.last);
    }
}
