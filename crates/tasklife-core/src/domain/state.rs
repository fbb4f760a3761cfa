//! Lifecycle state machine for a single task.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a task.
///
/// State transitions:
/// - Initialized -> Running -> Completed
/// - Initialized -> Completed (completed before it was ever started)
///
/// `Completed` is absorbing. Ordering follows declaration order and is only
/// used to validate that a task never moves backwards.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Created, not yet dispatched by a scheduler.
    #[default]
    Initialized,

    /// Dispatched; `execute` has been (or is being) invoked.
    Running,

    /// Finished. No further transitions.
    Completed,
}

impl LifecycleState {
    /// Is `self -> target` one of the legal edges?
    pub fn can_transition_to(self, target: LifecycleState) -> bool {
        matches!(
            (self, target),
            (LifecycleState::Initialized, LifecycleState::Running)
                | (LifecycleState::Initialized, LifecycleState::Completed)
                | (LifecycleState::Running, LifecycleState::Completed)
        )
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Initialized => "initialized",
            LifecycleState::Running => "running",
            LifecycleState::Completed => "completed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
