//! A Tokio-based bounded worker pool.
//!
//! A fixed number of workers consume [`Task`]s from a shared bounded queue,
//! run them, and emit one completion notification per task. Submission can
//! block for backpressure or be handed off to a detached helper, and the pool
//! shuts down either through its own [`WorkerPool::stop`] or through the
//! cancellation token passed to [`WorkerPool::start`].

mod config;
mod error;
mod notifier;
mod pool;
mod task;
mod task_queue;

pub use config::{PoolConfig, DEFAULT_ENV_PREFIX};
pub use error::{PoolError, TaskError};
pub use notifier::CompletionReceiver;
pub use pool::{PoolState, WorkerPool};
pub use task::{Task, TaskToExecute};
