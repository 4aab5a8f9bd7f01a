use std::collections::VecDeque;

use crate::feedback::ExecutionFeedback;

/// Bounded FIFO of pending execution feedback.
///
/// When full, the oldest report is dropped to make room: recent execution
/// quality matters more than stale quality.
#[derive(Debug)]
pub struct FeedbackInbox {
    items: VecDeque<ExecutionFeedback>,
    capacity: usize,
    dropped: u64,
}

impl FeedbackInbox {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Returns the report evicted to make room, if any.
    pub fn push(&mut self, feedback: ExecutionFeedback) -> Option<ExecutionFeedback> {
        let evicted = if self.items.len() >= self.capacity {
            self.dropped += 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(feedback);
        evicted
    }

    /// Everything pending, oldest first.
    pub fn drain(&mut self) -> Vec<ExecutionFeedback> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total reports dropped since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
