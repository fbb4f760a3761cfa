//! In-memory host queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, watch};
use tracing::{debug, info};

use super::{DependencyGraph, OperationRecord, OperationStatus, Scheduler};
use crate::config::QueueConfig;
use crate::domain::{LifecycleState, QueueError, TaskId};
use crate::observability::QueueCounts;
use crate::operation::Operation;

/// In-memory queue state.
#[derive(Default)]
struct QueueState {
    /// All operation records (single source of truth for the queue's view).
    records: HashMap<TaskId, OperationRecord>,

    /// Unfinished dependencies between records.
    graph: DependencyGraph,

    /// Ready queue (TaskIds only).
    ready: VecDeque<TaskId>,

    /// No more operations are accepted.
    closed: bool,
}

impl QueueState {
    fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for record in self.records.values() {
            match record.state {
                LifecycleState::Initialized => counts.pending += 1,
                LifecycleState::Running => counts.running += 1,
                LifecycleState::Completed => counts.completed += 1,
            }
        }
        counts
    }

    /// Insert a record. Returns true if it is immediately ready.
    fn insert(
        &mut self,
        operation: Arc<dyn Operation>,
        dependencies: &[TaskId],
    ) -> Result<bool, QueueError> {
        if self.closed {
            return Err(QueueError::ShutDown);
        }

        let id = operation.id();
        if self.records.contains_key(&id) {
            return Err(QueueError::DuplicateOperation(id));
        }
        if let Some(missing) = dependencies
            .iter()
            .find(|dep| !self.records.contains_key(*dep))
        {
            return Err(QueueError::UnknownDependency(*missing));
        }

        // The new node has no dependents yet, so these edges cannot close a cycle.
        for dep in dependencies {
            if self.records[dep].state != LifecycleState::Completed {
                self.graph.add_dependency(id, *dep);
            }
        }
        self.records.insert(id, OperationRecord::new(operation));

        let ready = !self.graph.has_dependencies(id);
        if ready {
            self.ready.push_back(id);
        }
        Ok(ready)
    }

    /// Pop the next pending operation and mark it dispatched.
    fn dispatch_next(&mut self) -> Option<Arc<dyn Operation>> {
        while let Some(id) = self.ready.pop_front() {
            if let Some(record) = self.records.get_mut(&id)
                && record.is_pending()
            {
                record.mark_dispatched();
                return Some(Arc::clone(&record.operation));
            }
        }
        None
    }

    /// Mark `id` finished and queue the dependents it released.
    /// Returns how many became ready, or None if it was already finished.
    fn finish(&mut self, id: TaskId) -> Option<usize> {
        let record = self.records.get_mut(&id)?;
        if record.state == LifecycleState::Completed {
            return None;
        }
        record.mark_finished();

        let mut released = 0;
        for task in self.graph.resolve(id) {
            if self.records.get(&task).is_some_and(|r| r.is_pending()) {
                self.ready.push_back(task);
                released += 1;
            }
        }
        Some(released)
    }
}

/// In-memory, dependency-aware host queue.
///
/// Workers (see [`WorkerGroup`](crate::worker::WorkerGroup)) lease ready
/// operations, call `begin()` and wait for the operation's own `complete()`.
pub struct OperationQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    notify: Notify,
    /// Operations not yet finished; `wait_until_finished` waits for zero.
    unfinished: watch::Sender<usize>,
}

impl OperationQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            unfinished: watch::Sender::new(0),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Make `task` wait for `depends_on` as well.
    ///
    /// Only allowed while `task` is still pending. A no-op if `depends_on`
    /// has already finished.
    pub async fn add_dependency(&self, task: TaskId, depends_on: TaskId) -> Result<(), QueueError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        for id in [task, depends_on] {
            if !state.records.contains_key(&id) {
                return Err(QueueError::UnknownDependency(id));
            }
        }
        if !state.records[&task].is_pending() {
            return Err(QueueError::AlreadyStarted(task));
        }
        if state.records[&depends_on].state == LifecycleState::Completed {
            return Ok(());
        }

        state
            .graph
            .try_add_dependency(task, depends_on)
            .map_err(QueueError::DependencyCycle)?;
        state.ready.retain(|id| *id != task);
        debug!(%task, %depends_on, "dependency added");
        Ok(())
    }

    pub async fn status(&self, id: TaskId) -> Option<OperationStatus> {
        let state = self.state.lock().await;
        let record = state.records.get(&id)?;
        Some(record.status(state.graph.get_dependencies(id)))
    }

    /// Stop accepting new operations. Already queued ones still run.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        info!("queue closed");
    }

    /// Wait for the next ready operation and mark it dispatched.
    pub(crate) async fn lease(&self) -> Arc<dyn Operation> {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(operation) = state.dispatch_next() {
                    // One permit wakes one worker; pass it on if more is ready.
                    if !state.ready.is_empty() {
                        self.notify.notify_one();
                    }
                    return operation;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Record that `id` reached `Completed` and release its dependents.
    pub(crate) async fn finish(&self, id: TaskId) {
        let released = {
            let mut state = self.state.lock().await;
            let Some(released) = state.finish(id) else {
                return;
            };
            self.unfinished.send_modify(|n| *n = n.saturating_sub(1));
            released
        }; // Lock released here

        debug!(task_id = %id, released, "operation finished");
        // Notify outside the lock
        for _ in 0..released {
            self.notify.notify_one();
        }
    }
}

#[async_trait]
impl Scheduler for OperationQueue {
    async fn add(
        &self,
        operation: Arc<dyn Operation>,
        dependencies: &[TaskId],
    ) -> Result<TaskId, QueueError> {
        let id = operation.id();
        let name = operation.name().to_string();
        let ready = {
            let mut state = self.state.lock().await;
            let ready = state.insert(operation, dependencies)?;
            self.unfinished.send_modify(|n| *n += 1);
            ready
        };

        debug!(task_id = %id, operation = %name, ready, "operation enqueued");
        if ready {
            self.notify.notify_one();
        }
        Ok(id)
    }

    async fn wait_until_finished(&self) {
        let mut rx = self.unfinished.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    async fn counts(&self) -> QueueCounts {
        self.state.lock().await.counts()
    }
}
