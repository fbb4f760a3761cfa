use serde::{Deserialize, Serialize};

/// Operation counts by queue-observed state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
}

impl QueueCounts {
    pub fn unfinished(&self) -> usize {
        self.pending + self.running
    }
}
