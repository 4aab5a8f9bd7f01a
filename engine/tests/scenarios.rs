use engine::{
    EngineConfig, Permission, Regime, StateEventKind, SymbolPipeline, TickOutput,
    regime::RegimeReason,
};
use market::{DataIntegrity, MarketObservation, Symbol};

fn quote(seq: u64, ts_ms: u64, spread_bps: f64) -> MarketObservation {
    let half = 100.0 * spread_bps / 10_000.0 / 2.0;
    MarketObservation {
        symbol: Symbol::new("BTCUSDT"),
        seq,
        ts_ms,
        exchange_ts_ms: None,
        bid_px: 100.0 - half,
        bid_sz: 2.0,
        ask_px: 100.0 + half,
        ask_sz: 2.0,
        last_trade: None,
        integrity: DataIntegrity::Ok,
    }
}

struct Feed {
    pipeline: SymbolPipeline,
    seq: u64,
}

impl Feed {
    fn new(cfg: &EngineConfig) -> Self {
        Self {
            pipeline: SymbolPipeline::new(Symbol::new("BTCUSDT"), cfg).unwrap(),
            seq: 0,
        }
    }

    fn push(&mut self, ts_ms: u64, spread_bps: f64) -> TickOutput {
        self.seq += 1;
        self.pipeline
            .on_observation(&quote(self.seq, ts_ms, spread_bps), None)
            .unwrap()
    }

    fn warm_up(&mut self) {
        for i in 0..5 {
            self.push(i * 1_000, 2.0);
        }
    }
}

#[test]
fn spread_volatility_burst_commits_unstable_after_dwell() {
    let mut cfg = EngineConfig::default();
    cfg.regime.unstable_spread_vol_bps = 10.0;
    cfg.regime.fast_spread_vol_bps = 5.0;

    let mut feed = Feed::new(&cfg);
    feed.warm_up();

    let outs: Vec<TickOutput> = (0..5).map(|i| feed.push(5_000 + i * 1_000, 49.0)).collect();

    // ticks 1 and 2: reading is UNSTABLE but dwell holds the committed regime
    for out in &outs[..2] {
        assert_eq!(out.decision.regime(), Regime::Normal);
        assert!(out.decision.eligible());
    }

    let third = &outs[2];
    assert_eq!(third.decision.regime(), Regime::Unstable);
    assert_eq!(third.decision.permission(), Permission::Cooldown);

    let kinds: Vec<&StateEventKind> = third.events.iter().map(|e| &e.kind).collect();
    assert!(matches!(
        kinds[0],
        StateEventKind::Regime {
            to: Regime::Unstable,
            reason: RegimeReason::SpreadVolatility,
            forced: false,
            ..
        }
    ));
    assert!(matches!(
        kinds[1],
        StateEventKind::Permission {
            to: Permission::Cooldown,
            ..
        }
    ));

    assert!(outs[2..].iter().all(|o| !o.decision.eligible()));
}

#[test]
fn single_stale_tick_suspends_immediately() {
    let mut feed = Feed::new(&EngineConfig::default());
    feed.warm_up();
    assert_eq!(feed.pipeline.regime().regime, Regime::Normal);

    let out = feed.push(4_000 + 15_001, 2.0);

    assert_eq!(out.decision.regime(), Regime::Unstable);
    assert_eq!(out.decision.permission(), Permission::Suspended);
    assert!(!out.decision.eligible());
    assert!(out.events.iter().any(|e| matches!(
        e.kind,
        StateEventKind::Regime {
            reason: RegimeReason::StaleData,
            forced: true,
            ..
        }
    )));
}

#[test]
fn cooldown_rearms_while_unstable_and_waits_a_full_period_after_recovery() {
    let mut cfg = EngineConfig::default();
    cfg.formation.spread_window_ms = 3_000;
    cfg.formation.warmup_min_samples = 2;
    cfg.formation.warmup_min_span_ms = 1_000;

    let mut feed = Feed::new(&cfg);
    feed.warm_up();

    // wide spread from 5s: UNSTABLE and COOLDOWN at 7s after dwell
    let mut entered_at = None;
    for ts in (5_000..=65_000).step_by(1_000) {
        let out = feed.push(ts, 60.0);
        if entered_at.is_none() && out.decision.permission() == Permission::Cooldown {
            entered_at = Some(ts);
        }
    }
    let entered_at = entered_at.expect("cooldown entered");
    assert_eq!(entered_at, 7_000);

    // 59s into cooldown and still unstable: the timer starts over
    let at_59s = feed.push(entered_at + 59_000, 60.0);
    assert_eq!(at_59s.decision.permission(), Permission::Cooldown);
    assert_eq!(
        feed.pipeline.permission().earliest_exit_ms(),
        Some(entered_at + 59_000 + 60_000)
    );

    // calm from here on; track the last tick still committed UNSTABLE
    let mut last_unstable = entered_at + 59_000;
    let mut probation_at = None;
    for ts in (entered_at + 60_000..=250_000).step_by(1_000) {
        let out = feed.push(ts, 2.0);
        if out.decision.regime() == Regime::Unstable {
            last_unstable = ts;
        }
        if out.decision.permission() == Permission::Probation {
            probation_at = Some(ts);
            break;
        }
    }

    let probation_at = probation_at.expect("probation reached");
    assert_eq!(probation_at, last_unstable + 60_000);
    assert_eq!(feed.pipeline.regime().regime, Regime::Normal);
}
