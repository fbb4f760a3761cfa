//! Queue module: dependency tracking and the in-memory host queue.

mod dependency;
mod memory;
mod record;

pub use dependency::DependencyGraph;
pub use memory::OperationQueue;
pub use record::{OperationRecord, OperationStatus};

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{QueueError, TaskId};
use crate::observability::QueueCounts;
use crate::operation::Operation;

/// Scheduler port (interface).
///
/// Design intent:
/// - The scheduler decides *when* an operation starts (dependencies done,
///   a worker free) and calls `begin()`.
/// - The operation decides *when* it is done by calling `complete()`.
/// - The scheduler only observes the lifecycle. The one exception is an
///   operation whose `execute` panicked, which is completed so its
///   dependents are not stranded.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Enqueue an operation that starts once every dependency has completed.
    async fn add(
        &self,
        operation: Arc<dyn Operation>,
        dependencies: &[TaskId],
    ) -> Result<TaskId, QueueError>;

    /// Wait until every enqueued operation has completed.
    async fn wait_until_finished(&self);

    /// Observability hook.
    async fn counts(&self) -> QueueCounts;
}
