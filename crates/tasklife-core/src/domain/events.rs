//! Events - lifecycle change notifications.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{LifecycleState, TaskId};

/// Change notification published by a [`TaskLifecycle`](crate::lifecycle::TaskLifecycle).
///
/// Both variants are delivered with no lifecycle lock held, so observers may
/// read `is_running` / `is_complete` from inside the callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A transition to `target` was requested and is about to be attempted.
    WillChange {
        task_id: TaskId,
        target: LifecycleState,
    },

    /// A transition was applied.
    DidChange {
        task_id: TaskId,
        from: LifecycleState,
        to: LifecycleState,
        at: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            LifecycleEvent::WillChange { task_id, .. } => *task_id,
            LifecycleEvent::DidChange { task_id, .. } => *task_id,
        }
    }

    /// The state this event is about: the requested target for `WillChange`,
    /// the new state for `DidChange`.
    pub fn target(&self) -> LifecycleState {
        match self {
            LifecycleEvent::WillChange { target, .. } => *target,
            LifecycleEvent::DidChange { to, .. } => *to,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, LifecycleEvent::DidChange { .. })
    }
}
