//! Decision core of the trading gate.
//!
//! Turns per-symbol [`market::MetricSnapshot`]s and asynchronous execution
//! feedback into one [`Decision`] per tick, plus the [`StateEvent`]s that
//! explain how the (regime, permission, health) triple got there.

pub mod config;
pub mod decision;
pub mod error;
pub mod events;
pub mod feedback;
pub mod health;
pub mod inbox;
pub mod permission;
pub mod pipeline;
pub mod regime;
pub mod replay;
pub mod throttle;

pub use config::EngineConfig;
pub use decision::{Decision, DecisionReason, ExecutionMode};
pub use error::{EngineError, FeedbackField, FeedbackOutOfRange};
pub use events::{StateEvent, StateEventKind};
pub use feedback::{ExecutionFeedback, FillOutcome, Markout};
pub use health::{HealthBand, HealthScore};
pub use inbox::FeedbackInbox;
pub use permission::{Permission, PermissionState};
pub use pipeline::{SymbolPipeline, TickOutput};
pub use regime::{Regime, RegimeState};
pub use replay::StateTriple;
