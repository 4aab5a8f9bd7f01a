use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub observations: Arc<AtomicU64>,
    pub rejected: Arc<AtomicU64>,
    pub heartbeats: Arc<AtomicU64>,

    pub decisions: Arc<AtomicU64>,
    pub eligible: Arc<AtomicU64>,
    pub events: Arc<AtomicU64>,

    pub feedback: Arc<AtomicU64>,
    pub feedback_dropped: Arc<AtomicU64>,

    pub workers_spawned: Arc<AtomicU64>,
    pub sink_errors: Arc<AtomicU64>,
}

/// Point-in-time copy of [`Counters`], for logs and summaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub observations: u64,
    pub rejected: u64,
    pub heartbeats: u64,
    pub decisions: u64,
    pub eligible: u64,
    pub events: u64,
    pub feedback: u64,
    pub feedback_dropped: u64,
    pub workers_spawned: u64,
    pub sink_errors: u64,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CountersSnapshot {
            observations: load(&self.observations),
            rejected: load(&self.rejected),
            heartbeats: load(&self.heartbeats),
            decisions: load(&self.decisions),
            eligible: load(&self.eligible),
            events: load(&self.events),
            feedback: load(&self.feedback),
            feedback_dropped: load(&self.feedback_dropped),
            workers_spawned: load(&self.workers_spawned),
            sink_errors: load(&self.sink_errors),
        }
    }
}
