//! Operation record: queue-side bookkeeping for one operation.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{LifecycleState, TaskId};
use crate::operation::Operation;

/// Queue-side view of an operation.
///
/// Design:
/// - The operation's own `TaskLifecycle` is the source of truth for its state.
/// - `state` here is what the queue has observed and acted on
///   (`Initialized` = pending, `Running` = dispatched, `Completed` = released
///   its dependents).
/// - Ready/dispatch structures hold TaskId only.
pub struct OperationRecord {
    pub operation: Arc<dyn Operation>,
    pub state: LifecycleState,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl OperationRecord {
    pub fn new(operation: Arc<dyn Operation>) -> Self {
        Self {
            operation,
            state: LifecycleState::Initialized,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.operation.id()
    }

    pub fn is_pending(&self) -> bool {
        self.state == LifecycleState::Initialized
    }

    /// Handed to a worker.
    pub fn mark_dispatched(&mut self) {
        self.state = LifecycleState::Running;
        self.started_at = Some(Utc::now());
    }

    /// Completion observed; dependents may proceed.
    pub fn mark_finished(&mut self) {
        self.state = LifecycleState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn status(&self, dependencies: Vec<TaskId>) -> OperationStatus {
        OperationStatus {
            task_id: self.id(),
            name: self.operation.name().to_string(),
            queue_state: self.state,
            lifecycle_state: self.operation.lifecycle().state(),
            dependencies,
            enqueued_at: self.enqueued_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

impl fmt::Debug for OperationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRecord")
            .field("id", &self.id())
            .field("name", &self.operation.name())
            .field("state", &self.state)
            .field("enqueued_at", &self.enqueued_at)
            .field("started_at", &self.started_at)
            .field("finished_at", &self.finished_at)
            .finish()
    }
}

/// Operation status for API responses.
///
/// `queue_state` can lag `lifecycle_state` briefly: the lifecycle completes
/// first, then the queue observes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStatus {
    pub task_id: TaskId,
    pub name: String,
    pub queue_state: LifecycleState,
    pub lifecycle_state: LifecycleState,
    /// Unfinished dependencies.
    pub dependencies: Vec<TaskId>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
