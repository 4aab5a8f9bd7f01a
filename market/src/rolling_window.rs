use std::collections::VecDeque;
use std::collections::vec_deque::Iter;

/// A timestamped value used inside the rolling window
#[derive(Clone, Debug, PartialEq)]
pub struct TimedValue<T> {
    pub ts_ms: u64,
    pub value: T,
}

/// Time-bounded FIFO window.
///
/// Eviction is by age, never by count, so a burst of observations does not
/// shrink the effective window.
#[derive(Clone, Debug)]
pub struct RollingWindow<T> {
    values: VecDeque<TimedValue<T>>,
    max_age_ms: u64,
}

impl<T> RollingWindow<T> {
    pub fn new(max_age_ms: u64) -> Self {
        Self {
            values: VecDeque::new(),
            max_age_ms,
        }
    }

    pub fn push(&mut self, ts_ms: u64, value: T) {
        self.values.push_back(TimedValue { ts_ms, value });
        self.evict_old(ts_ms);
    }

    /// Evict values older than max_age relative to `now_ms`.
    pub fn evict_old(&mut self, now_ms: u64) {
        while let Some(front) = self.values.front() {
            if now_ms.saturating_sub(front.ts_ms) > self.max_age_ms {
                self.values.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn iter(&self) -> Iter<'_, TimedValue<T>> {
        self.values.iter()
    }

    pub fn oldest(&self) -> Option<&TimedValue<T>> {
        self.values.front()
    }

    pub fn latest(&self) -> Option<&TimedValue<T>> {
        self.values.back()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn max_age_ms(&self) -> u64 {
        self.max_age_ms
    }

    /// Time covered between the oldest and newest sample.
    pub fn span_ms(&self) -> u64 {
        match (self.values.front(), self.values.back()) {
            (Some(a), Some(b)) => b.ts_ms.saturating_sub(a.ts_ms),
            _ => 0,
        }
    }

    /// Enough samples and enough time coverage to be trusted.
    pub fn is_warm(&self, min_samples: usize, min_span_ms: u64) -> bool {
        self.values.len() >= min_samples && self.span_ms() >= min_span_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_by_age_not_count() {
        let mut w = RollingWindow::new(1_000);

        for i in 0..100 {
            w.push(500 + i, i);
        }
        assert_eq!(w.len(), 100, "a burst inside the window keeps every sample");

        w.push(1_550, 999);
        // 1_550 - 549 = 1_001 > 1_000 evicts ts <= 549
        assert_eq!(w.oldest().unwrap().ts_ms, 550);
        assert_eq!(w.latest().unwrap().value, 999);
    }

    #[test]
    fn boundary_sample_is_kept() {
        let mut w = RollingWindow::new(1_000);
        w.push(0, 1.0);
        w.push(1_000, 2.0);

        assert_eq!(w.len(), 2);

        w.evict_old(1_001);
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn warmup_requires_samples_and_span() {
        let mut w = RollingWindow::new(10_000);
        w.push(0, 1.0);
        w.push(500, 1.0);
        w.push(900, 1.0);
        assert!(!w.is_warm(3, 1_000));

        w.push(1_000, 1.0);
        assert!(w.is_warm(3, 1_000));
        assert!(!w.is_warm(5, 1_000));
    }

    #[test]
    fn evict_tolerates_clock_behind_samples() {
        let mut w = RollingWindow::new(100);
        w.push(1_000, 1);
        w.evict_old(10);
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn iterator_can_be_walked_twice() {
        let mut w = RollingWindow::new(10_000);
        for (i, v) in [2.0, 4.0, 6.0].into_iter().enumerate() {
            w.push(i as u64 * 100, v);
        }

        let values = w.iter().map(|s| s.value);
        let n = values.clone().count();
        let sum: f64 = values.sum();
        assert_eq!(n, 3);
        assert_eq!(sum, 12.0);
    }
}
