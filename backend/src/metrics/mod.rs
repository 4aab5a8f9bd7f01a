pub mod counters;

pub use counters::{Counters, CountersSnapshot};
