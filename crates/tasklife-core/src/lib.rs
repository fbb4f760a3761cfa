//! tasklife-core
//!
//! Thread-safe lifecycle state machine for asynchronously completing tasks,
//! plus a small dependency-aware host queue that drives it.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（TaskId, LifecycleState, LifecycleEvent, errors）
//! - **lifecycle**: TaskLifecycle（state + one-shot completion guard + observers）
//! - **operation**: Operation trait（execute の拡張ポイント）, BlockOperation
//! - **queue**: Scheduler trait + in-memory OperationQueue + DependencyGraph
//! - **worker**: WorkerGroup（lease → begin → wait complete → release dependents）
//! - **config**: QueueConfig
//! - **observability**: QueueCounts

pub mod config;
pub mod domain;
pub mod lifecycle;
pub mod observability;
pub mod operation;
pub mod queue;
pub mod worker;

pub use config::QueueConfig;
pub use domain::{LifecycleError, LifecycleEvent, LifecycleState, QueueError, TaskId};
pub use lifecycle::{LifecycleObserver, TaskLifecycle};
pub use observability::QueueCounts;
pub use operation::{BlockOperation, Operation};
pub use queue::{OperationQueue, Scheduler};
pub use worker::WorkerGroup;
