//! Operation trait - the extension point concrete tasks implement.

use std::any::type_name;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::domain::{LifecycleError, TaskId};
use crate::lifecycle::TaskLifecycle;

/// An asynchronously completing unit of work.
///
/// Implementors own a [`TaskLifecycle`] and override [`Operation::execute`].
/// `execute` must call [`Operation::complete`] exactly once when the work is
/// done, from any thread and after any delay (timer, network callback, ...).
/// A task that never completes stays `Running` forever; nothing detects that.
///
/// # Example
/// ```ignore
/// struct Fetch { lifecycle: TaskLifecycle }
///
/// impl Operation for Fetch {
///     fn lifecycle(&self) -> &TaskLifecycle { &self.lifecycle }
///
///     fn execute(self: Arc<Self>) {
///         std::thread::spawn(move || {
///             // ... slow work ...
///             self.complete();
///         });
///     }
/// }
/// ```
pub trait Operation: Send + Sync + 'static {
    fn lifecycle(&self) -> &TaskLifecycle;

    /// Name used in logs.
    fn name(&self) -> &str {
        type_name::<Self>()
    }

    /// Perform the work. Must eventually call `complete()`.
    ///
    /// The default only warns and completes immediately, so a scheduler is
    /// never left waiting on an operation that forgot to override it.
    fn execute(self: Arc<Self>) {
        warn!(
            task_id = %self.lifecycle().id(),
            operation = self.name(),
            "operation must override `execute()`, completing immediately"
        );
        self.complete();
    }

    /// Dispatch entry point for schedulers: `Initialized -> Running`, then `execute`.
    ///
    /// `execute` runs on the calling thread with no lifecycle lock held. It is
    /// not invoked if the task had already completed, or if the transition is
    /// refused (e.g. `begin()` called twice).
    fn begin(self: Arc<Self>) -> Result<(), LifecycleError> {
        if !self.lifecycle().mark_running()? {
            debug!(
                task_id = %self.lifecycle().id(),
                operation = self.name(),
                "begin() on a completed operation, not executing"
            );
            return Ok(());
        }
        self.execute();
        Ok(())
    }

    /// Mark the operation finished. Idempotent.
    fn complete(&self) {
        self.lifecycle().complete();
    }

    fn id(&self) -> TaskId {
        self.lifecycle().id()
    }

    fn is_running(&self) -> bool {
        self.lifecycle().is_running()
    }

    fn is_complete(&self) -> bool {
        self.lifecycle().is_complete()
    }
}

type Block = Box<dyn FnOnce() + Send + 'static>;

/// Runs a closure once, then completes.
pub struct BlockOperation {
    lifecycle: TaskLifecycle,
    name: String,
    block: Mutex<Option<Block>>,
}

impl BlockOperation {
    pub fn new<F>(block: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::named("block", block)
    }

    pub fn named<F>(name: impl Into<String>, block: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            lifecycle: TaskLifecycle::new(),
            name: name.into(),
            block: Mutex::new(Some(Box::new(block))),
        }
    }
}

impl Operation for BlockOperation {
    fn lifecycle(&self) -> &TaskLifecycle {
        &self.lifecycle
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn execute(self: Arc<Self>) {
        let block = self
            .block
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(block) = block {
            block();
        }
        self.complete();
    }
}

impl fmt::Debug for BlockOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockOperation")
            .field("name", &self.name)
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}
