//! State Formation
//!
//! One [`StateFormation`] per symbol. `ingest` is the only way an observation
//! enters the gate: it enforces strict sequence order, folds the observation
//! into the spread and flow pulses and returns the resulting
//! [`MetricSnapshot`].
//!
//! Stream time never runs backwards inside a formation: an observation with a
//! larger sequence number but an earlier timestamp is processed at the last
//! accepted timestamp.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::MarketError;
use crate::pulse::flow::{FlowPulse, TradeSample};
use crate::pulse::spread::{SpreadPulse, SpreadSample, SpreadWarmup};
use crate::pulse::{Pulse, PulseResult, PulseValidity};
use crate::types::{DataIntegrity, MarketObservation, MetricSnapshot, Symbol};

/// Window lengths and warm-up for state formation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormationConfig {
    /// Trailing window for spread volatility and mid move.
    pub spread_window_ms: u64,
    /// Trailing window for trade intensity, imbalance and latency.
    pub trade_window_ms: u64,
    pub warmup_min_samples: usize,
    pub warmup_min_span_ms: u64,
}

impl Default for FormationConfig {
    fn default() -> Self {
        Self {
            spread_window_ms: 30_000,
            trade_window_ms: 10_000,
            warmup_min_samples: 5,
            warmup_min_span_ms: 2_000,
        }
    }
}

impl FormationConfig {
    pub fn validate(&self) -> Result<(), MarketError> {
        if self.spread_window_ms == 0 || self.trade_window_ms == 0 {
            return Err(MarketError::ConfigurationInvalid(
                "window lengths must be positive".into(),
            ));
        }
        if self.warmup_min_span_ms > self.spread_window_ms {
            return Err(MarketError::ConfigurationInvalid(format!(
                "warm-up span {}ms can never fit in a {}ms spread window",
                self.warmup_min_span_ms, self.spread_window_ms
            )));
        }
        Ok(())
    }
}

/// Latest usable quote, kept so heartbeats can re-read the windows.
#[derive(Clone, Copy, Debug)]
struct Quote {
    bid_px: f64,
    ask_px: f64,
    mid: f64,
    spread: f64,
    spread_bps: f64,
}

impl Quote {
    fn unusable() -> Self {
        Self {
            bid_px: 0.0,
            ask_px: 0.0,
            mid: 0.0,
            spread: f64::MAX,
            spread_bps: f64::MAX,
        }
    }

    fn from_observation(obs: &MarketObservation) -> Option<Self> {
        if !obs.has_valid_book() {
            return None;
        }
        let mid = (obs.bid_px + obs.ask_px) / 2.0;
        let spread = obs.ask_px - obs.bid_px;
        Some(Self {
            bid_px: obs.bid_px,
            ask_px: obs.ask_px,
            mid,
            spread,
            spread_bps: spread / mid * 10_000.0,
        })
    }
}

pub struct StateFormation {
    symbol: Symbol,
    spread: SpreadPulse,
    flow: FlowPulse,
    last_seq: Option<u64>,
    last_ts_ms: Option<u64>,
    quote: Quote,
}

impl StateFormation {
    pub fn new(symbol: Symbol, cfg: &FormationConfig) -> Self {
        let warmup = SpreadWarmup {
            min_samples: cfg.warmup_min_samples,
            min_span_ms: cfg.warmup_min_span_ms,
        };

        Self {
            symbol,
            spread: SpreadPulse::new(cfg.spread_window_ms, warmup),
            flow: FlowPulse::new(cfg.trade_window_ms),
            last_seq: None,
            last_ts_ms: None,
            quote: Quote::unusable(),
        }
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    /// Accept one observation and derive its snapshot.
    ///
    /// On `Err` nothing about the formation has changed.
    pub fn ingest(&mut self, obs: &MarketObservation) -> Result<MetricSnapshot, MarketError> {
        if obs.symbol != self.symbol {
            return Err(MarketError::SymbolMismatch {
                expected: self.symbol.clone(),
                got: obs.symbol.clone(),
            });
        }

        if let Some(last_seq) = self.last_seq {
            if obs.seq <= last_seq {
                debug!(symbol = %self.symbol, last_seq, got_seq = obs.seq, "rejecting out-of-order observation");
                return Err(MarketError::OutOfOrderInput {
                    symbol: self.symbol.clone(),
                    last_seq,
                    got_seq: obs.seq,
                });
            }
        }

        let ts_ms = self.last_ts_ms.map_or(obs.ts_ms, |last| obs.ts_ms.max(last));
        let data_age_ms = self.last_ts_ms.map_or(0, |last| ts_ms - last);

        let mut integrity = obs.integrity;

        // Malformed payloads never reach the windows.
        if integrity != DataIntegrity::Malformed {
            match Quote::from_observation(obs) {
                Some(q) => {
                    self.quote = q;
                    self.spread.update(
                        ts_ms,
                        SpreadSample {
                            spread_bps: q.spread_bps,
                            mid: q.mid,
                        },
                    );
                }
                None => {
                    integrity = DataIntegrity::Malformed;
                    self.quote = Quote::unusable();
                }
            }
        } else {
            self.quote = Quote::unusable();
        }

        if integrity != DataIntegrity::Malformed {
            if let Some(trade) = obs.last_trade.filter(|t| t.size > 0.0 && t.price.is_finite()) {
                self.flow.update(
                    ts_ms,
                    TradeSample {
                        size: trade.size,
                        side: trade.side,
                        latency_ms: obs.exchange_ts_ms.map(|ex| ts_ms.saturating_sub(ex)),
                    },
                );
            }
        }

        self.last_seq = Some(obs.seq);
        self.last_ts_ms = Some(ts_ms);

        Ok(self.read(obs.seq, ts_ms, data_age_ms, integrity))
    }

    /// Re-read the windows at a later stream time without new data.
    ///
    /// Returns `None` before the first accepted observation. `now_ms` earlier
    /// than the last observation is treated as the last observation's time.
    pub fn snapshot_at(&mut self, now_ms: u64) -> Option<MetricSnapshot> {
        let (seq, last_ts) = (self.last_seq?, self.last_ts_ms?);
        let now_ms = now_ms.max(last_ts);

        Some(self.read(seq, now_ms, now_ms - last_ts, DataIntegrity::Ok))
    }

    fn read(&mut self, seq: u64, ts_ms: u64, data_age_ms: u64, integrity: DataIntegrity) -> MetricSnapshot {
        let spread = self.spread.evaluate(ts_ms);
        let flow = self.flow.evaluate(ts_ms);
        let q = self.quote;

        MetricSnapshot {
            symbol: self.symbol.clone(),
            seq,
            ts_ms,
            bid_px: q.bid_px,
            ask_px: q.ask_px,
            mid: q.mid,
            spread: q.spread,
            spread_bps: q.spread_bps,
            spread_vol_bps: spread.spread_vol_bps,
            mid_move_bps: spread.mid_move_bps,
            trade_intensity: flow.trade_intensity,
            aggressor_imbalance: flow.aggressor_imbalance,
            latency_p95_ms: flow.latency_p95_ms,
            data_age_ms,
            integrity,
            warm: spread.validity() == PulseValidity::Valid,
        }
    }
}
