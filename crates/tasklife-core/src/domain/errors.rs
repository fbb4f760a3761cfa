//! Errors - lifecycle and queue errors.

use thiserror::Error;

use super::{LifecycleState, TaskId};

/// Refused lifecycle mutation.
///
/// This is a caller defect (e.g. `begin()` twice). The state is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("illegal transition for {task_id}: {from} -> {to}")]
    IllegalTransition {
        task_id: TaskId,
        from: LifecycleState,
        to: LifecycleState,
    },
}

/// Errors reported by the host queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("operation {0} is already in the queue")]
    DuplicateOperation(TaskId),

    #[error("dependency {0} is not in the queue")]
    UnknownDependency(TaskId),

    #[error("operation {0} has already been dispatched")]
    AlreadyStarted(TaskId),

    #[error("dependency cycle: {0:?}")]
    DependencyCycle(Vec<TaskId>),

    #[error("queue is shut down")]
    ShutDown,
}
