use thiserror::Error;

use crate::types::Symbol;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketError {
    /// Sequence number not strictly greater than the last accepted one.
    /// The observation is dropped and the formation state is left untouched.
    #[error("out-of-order input for {symbol}: last accepted seq {last_seq}, got {got_seq}")]
    OutOfOrderInput {
        symbol: Symbol,
        last_seq: u64,
        got_seq: u64,
    },

    #[error("observation for {got} routed to the {expected} pipeline")]
    SymbolMismatch { expected: Symbol, got: Symbol },

    #[error("invalid formation config: {0}")]
    ConfigurationInvalid(String),
}
