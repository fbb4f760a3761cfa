use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::operation::Operation;
use crate::queue::OperationQueue;

/// Worker group handle.
/// - `request_shutdown` でワーカー全体が止まる（実行中の operation は待つ）
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `queue.config().max_concurrent` workers on the current runtime.
    pub fn spawn(queue: Arc<OperationQueue>) -> Self {
        let n = queue.config().max_concurrent.max(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let q = Arc::clone(&queue);
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(worker_loop(worker_id, q, rx)));
        }
        info!(workers = n, "worker group started");

        Self { shutdown_tx, joins }
    }

    /// Request shutdown for all workers.
    ///
    /// Workers stop leasing new operations. An operation that has already
    /// begun is not pre-empted; its worker waits for it to complete.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            if let Err(e) = j.await {
                error!("worker task failed: {e}");
            }
        }
        info!("worker group stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<OperationQueue>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // lease は待つ可能性があるので shutdown と競合させる
        let operation = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            operation = queue.lease() => operation,
        };

        run_one(worker_id, &queue, operation).await;
    }
    debug!(worker_id, "worker stopped");
}

/// begin -> wait for the operation's own completion -> release dependents.
async fn run_one(worker_id: usize, queue: &OperationQueue, operation: Arc<dyn Operation>) {
    let task_id = operation.id();
    debug!(worker_id, %task_id, operation = operation.name(), "dispatching operation");

    // `execute` may block (sleep, synchronous I/O), keep it off the async workers.
    let dispatched = Arc::clone(&operation);
    match tokio::task::spawn_blocking(move || dispatched.begin()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            // Someone else already began it; its owner still has to complete it.
            warn!(worker_id, %task_id, "begin refused: {e}");
        }
        Err(e) => {
            // A panicking `execute` can never call `complete()`; completing here
            // keeps its dependents from waiting forever.
            error!(worker_id, %task_id, "operation execute panicked: {e}");
            operation.complete();
        }
    }

    // ここは lifecycle の完了通知待ち（execute 側が complete() を呼ぶまで）
    operation.lifecycle().wait_complete().await;
    queue.finish(task_id).await;
}
