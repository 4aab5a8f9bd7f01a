pub mod flow;
pub mod spread;

/// Validity marker for all pulses.
///
/// An invalid pulse has not seen enough history; its numbers exist but must
/// not be read as evidence that conditions are calm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PulseValidity {
    #[default]
    Invalid,

    Valid,
}

/// Trait implemented by all pulse result types.
pub trait PulseResult {
    fn validity(&self) -> PulseValidity;
}

/// Core Pulse trait.
///
/// A pulse:
/// - owns a rolling window
/// - folds inputs in stream order
/// - can be read at any stream time at or after its last input
pub trait Pulse {
    /// Input type consumed per tick
    type Input;

    /// Output type produced per read
    type Output: PulseResult;

    fn update(&mut self, ts_ms: u64, input: Self::Input);

    /// Evict anything that aged out by `now_ms` and summarize the window.
    fn evaluate(&mut self, now_ms: u64) -> Self::Output;
}
