use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clap::Parser;
use tasklife_core::{
    BlockOperation, LifecycleEvent, Operation, OperationQueue, QueueConfig, Scheduler,
    TaskLifecycle, WorkerGroup,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// tasklife demo - sleep + parse operations feeding a completion block
#[derive(Parser, Debug)]
#[command(name = "tasklife")]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of operations dispatched at once
    #[arg(short, long, default_value_t = 2)]
    workers: usize,

    /// How long the sleep operation blocks before completing
    #[arg(long, default_value_t = 2000)]
    sleep_ms: u64,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Blocks its worker thread, records a result, then completes.
struct SleepOperation {
    lifecycle: TaskLifecycle,
    duration: Duration,
    result: Mutex<String>,
}

impl SleepOperation {
    fn new(duration: Duration) -> Self {
        Self {
            lifecycle: TaskLifecycle::new(),
            duration,
            result: Mutex::new(String::new()),
        }
    }

    fn result(&self) -> String {
        self.result
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl Operation for SleepOperation {
    fn lifecycle(&self) -> &TaskLifecycle {
        &self.lifecycle
    }

    fn name(&self) -> &str {
        "sleep"
    }

    fn execute(self: Arc<Self>) {
        info!(task_id = %self.id(), "BEGIN sleep");
        thread::sleep(self.duration);
        if let Ok(mut result) = self.result.lock() {
            *result = "Finished".to_string();
        }
        info!(task_id = %self.id(), "sleep done");
        self.complete();
    }
}

/// Completes right away.
struct ParseOperation {
    lifecycle: TaskLifecycle,
}

impl Operation for ParseOperation {
    fn lifecycle(&self) -> &TaskLifecycle {
        &self.lifecycle
    }

    fn name(&self) -> &str {
        "parse"
    }

    fn execute(self: Arc<Self>) {
        info!(task_id = %self.id(), "BEGIN parse");
        self.complete();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // (A) Queue と WorkerGroup を用意
    let queue = Arc::new(OperationQueue::new(QueueConfig::with_max_concurrent(
        args.workers,
    )));
    let workers = WorkerGroup::spawn(Arc::clone(&queue));

    // (B) operation を投入（completion は sleep と parse の両方を待つ）
    let sleep_op = Arc::new(SleepOperation::new(Duration::from_millis(args.sleep_ms)));
    let parse_op = Arc::new(ParseOperation {
        lifecycle: TaskLifecycle::new(),
    });
    let completion_op = {
        let sleep_op = Arc::clone(&sleep_op);
        Arc::new(BlockOperation::named("completion", move || {
            info!("completionOp {}", sleep_op.result());
        }))
    };

    // push 通知でも状態遷移を追う
    sleep_op.lifecycle().subscribe(Arc::new(|event: &LifecycleEvent| {
        info!(
            task_id = %event.task_id(),
            state = %event.target(),
            applied = event.is_applied(),
            "sleep lifecycle event"
        );
    }));

    let sleep_id = queue.add(sleep_op, &[]).await?;
    let parse_id = queue.add(parse_op, &[]).await?;
    queue.add(completion_op, &[sleep_id, parse_id]).await?;

    // (C) 全部終わるまで待つ
    queue.wait_until_finished().await;
    println!("{}", serde_json::to_string(&queue.counts().await)?);

    // (D) worker を止める
    queue.close().await;
    workers.shutdown_and_join().await;
    println!("👏");
    Ok(())
}
