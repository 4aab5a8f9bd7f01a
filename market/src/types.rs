use std::fmt;

use serde::{Deserialize, Serialize};

/// Instrument identifier. One pipeline owns exactly one symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(v: &str) -> Self {
        Self::new(v)
    }
}

/// Side that initiated a trade (took liquidity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggressorSide {
    Buy,
    Sell,
}

/// Integrity marker set by the ingestion collaborator.
///
/// Anything other than `Ok` is a data-integrity failure and is never debounced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataIntegrity {
    #[default]
    Ok,
    /// Upstream detected missing messages (sequence gap / corruption).
    Gap,
    /// Message could not be parsed or carried an impossible book.
    Malformed,
}

/// Last trade carried by an observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradePrint {
    pub price: f64,
    pub size: f64,
    pub side: AggressorSide,
}

/// Normalized market event handed over by the ingestion collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketObservation {
    pub symbol: Symbol,
    /// Strictly increasing per symbol.
    pub seq: u64,
    /// Stream time (ms). All timers in the gate run on this clock.
    pub ts_ms: u64,
    /// Venue timestamp, when the feed provides one. Used for latency.
    #[serde(default)]
    pub exchange_ts_ms: Option<u64>,

    pub bid_px: f64,
    pub bid_sz: f64,
    pub ask_px: f64,
    pub ask_sz: f64,

    #[serde(default)]
    pub last_trade: Option<TradePrint>,

    #[serde(default)]
    pub integrity: DataIntegrity,
}

impl MarketObservation {
    /// Best bid/ask are finite, positive and not crossed.
    pub fn has_valid_book(&self) -> bool {
        let finite = [self.bid_px, self.ask_px, self.bid_sz, self.ask_sz]
            .iter()
            .all(|v| v.is_finite());

        finite && self.bid_px > 0.0 && self.ask_px >= self.bid_px
    }
}

/// Continuous microstructure metrics derived from one accepted observation.
///
/// Spread fields are `f64::MAX` when the book was unusable so that any
/// downstream `>` threshold check fails closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub symbol: Symbol,
    pub seq: u64,
    pub ts_ms: u64,

    pub bid_px: f64,
    pub ask_px: f64,
    pub mid: f64,
    pub spread: f64,
    pub spread_bps: f64,

    /// Stddev of spread (bps) over the spread window.
    pub spread_vol_bps: f64,
    /// |last mid - first mid| over the spread window, in bps of the first mid.
    pub mid_move_bps: f64,

    /// Trades per second over the trade window.
    pub trade_intensity: f64,
    /// (buy volume - sell volume) / total volume, in [-1, 1].
    pub aggressor_imbalance: f64,
    /// p95 of (stream ts - exchange ts) over the trade window.
    pub latency_p95_ms: Option<f64>,

    /// Stream-time gap since the previous accepted observation.
    pub data_age_ms: u64,
    pub integrity: DataIntegrity,
    /// The spread window holds enough samples and time coverage.
    pub warm: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(bid: f64, ask: f64) -> MarketObservation {
        MarketObservation {
            symbol: Symbol::new("ETHBTC"),
            seq: 1,
            ts_ms: 0,
            exchange_ts_ms: None,
            bid_px: bid,
            bid_sz: 1.0,
            ask_px: ask,
            ask_sz: 1.0,
            last_trade: None,
            integrity: DataIntegrity::Ok,
        }
    }

    #[test]
    fn crossed_book_is_invalid() {
        assert!(!obs(101.0, 100.0).has_valid_book());
    }

    #[test]
    fn locked_book_is_valid() {
        assert!(obs(100.0, 100.0).has_valid_book());
    }

    #[test]
    fn nan_and_zero_prices_are_invalid() {
        assert!(!obs(f64::NAN, 100.0).has_valid_book());
        assert!(!obs(0.0, 100.0).has_valid_book());
    }

    #[test]
    fn observation_defaults_optional_fields_when_deserializing() {
        let raw = r#"{"symbol":"ETHBTC","seq":7,"ts_ms":1000,
            "bid_px":1.0,"bid_sz":2.0,"ask_px":1.1,"ask_sz":3.0}"#;

        let o: MarketObservation = serde_json::from_str(raw).unwrap();

        assert_eq!(o.symbol.as_str(), "ETHBTC");
        assert_eq!(o.integrity, DataIntegrity::Ok);
        assert!(o.last_trade.is_none());
        assert!(o.exchange_ts_ms.is_none());
    }
}
