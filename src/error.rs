use thiserror::Error;

/// The error type produced by a task's action and handed to its error handler.
pub type TaskError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur within the `worker_pool` crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
  #[error("Number of workers must be greater than 0 (got {0})")]
  InvalidWorkerCount(i64),

  #[error("Task queue capacity must not be negative (got {0})")]
  InvalidQueueCapacity(i64),

  #[error("No Tokio runtime is available to spawn pool workers on")]
  NoRuntime,

  #[error("Invalid configuration value for {key}: {value:?}")]
  InvalidConfig { key: String, value: String },

  #[error("Task action panicked during execution")]
  TaskPanicked,

  #[error("Task action was already executed")]
  TaskAlreadyExecuted,
}
