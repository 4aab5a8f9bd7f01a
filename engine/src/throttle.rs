use std::collections::HashMap;

/// Per-code cooldown for repeated warnings, keyed on stream time.
///
/// The first warning of a code always passes. Later ones inside the window
/// are counted and the count is handed to the next warning that passes.
#[derive(Debug)]
pub struct WarnThrottle {
    window_ms: u64,
    last_ms: HashMap<&'static str, u64>,
    suppressed: HashMap<&'static str, u64>,
}

impl WarnThrottle {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            last_ms: HashMap::new(),
            suppressed: HashMap::new(),
        }
    }

    /// `Some(suppressed_since_last)` when the warning should be logged.
    pub fn admit(&mut self, code: &'static str, ts_ms: u64) -> Option<u64> {
        if let Some(&last) = self.last_ms.get(code) {
            if ts_ms.saturating_sub(last) < self.window_ms {
                *self.suppressed.entry(code).or_default() += 1;
                return None;
            }
        }
        self.last_ms.insert(code, ts_ms);
        Some(self.suppressed.remove(code).unwrap_or(0))
    }
}
