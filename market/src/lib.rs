//! State formation for the trading gate.
//!
//! Turns a strictly ordered stream of [`types::MarketObservation`]s into one
//! [`types::MetricSnapshot`] per accepted observation. Everything here is pure
//! and deterministic given the stream; no I/O and no wall clock.

pub mod error;
pub mod formation;
pub mod pulse;
pub mod rolling_window;
pub mod types;

pub use error::MarketError;
pub use formation::{FormationConfig, StateFormation};
pub use types::{
    AggressorSide, DataIntegrity, MarketObservation, MetricSnapshot, Symbol, TradePrint,
};
