use std::sync::Arc;

use engine::{ExecutionFeedback, FeedbackInbox};
use parking_lot::Mutex;

/// Per-symbol feedback mailbox shared between producers and the symbol's
/// worker. Producers never block on the worker; the worker drains everything
/// pending at its next tick.
#[derive(Clone)]
pub struct FeedbackMailbox {
    inner: Arc<Mutex<FeedbackInbox>>,
}

impl FeedbackMailbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FeedbackInbox::new(capacity))),
        }
    }

    /// Returns `true` when the oldest pending report had to be dropped.
    pub fn push(&self, feedback: ExecutionFeedback) -> bool {
        self.inner.lock().push(feedback).is_some()
    }

    pub fn drain(&self) -> Vec<ExecutionFeedback> {
        self.inner.lock().drain()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped()
    }
}
