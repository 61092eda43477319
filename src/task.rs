use crate::error::{PoolError, TaskError};

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

lazy_static::lazy_static! {
  static ref NEXT_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// The type of future a task's action resolves to once invoked.
pub type TaskToExecute = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'static>>;

type Action = Box<dyn FnOnce() -> TaskToExecute + Send + 'static>;
type ErrorHandler = Box<dyn Fn(TaskError) + Send + Sync + 'static>;

/// A unit of work paired with the handler that receives its error.
///
/// A `Task` is moved into the pool on submission and consumed by exactly one
/// worker. The pool never inspects the outcome beyond deciding whether
/// [`Task::on_error`] must run.
pub struct Task {
  id: u64,
  action: Option<Action>,
  error_handler: ErrorHandler,
}

impl Task {
  /// Creates a task from an async action and an error handler.
  ///
  /// The action is invoked lazily, on the worker that dequeues the task.
  pub fn new<F, Fut, E, H>(action: F, error_handler: H) -> Self
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<TaskError>,
    H: Fn(TaskError) + Send + Sync + 'static,
  {
    let action: Action = Box::new(move || -> TaskToExecute {
      Box::pin(async move { action().await.map_err(Into::into) })
    });
    Self::from_parts(action, Box::new(error_handler))
  }

  /// Creates a task from a synchronous action.
  ///
  /// The closure runs inline on the worker; keep it short or it will hold the
  /// worker (and the runtime thread) for its whole duration.
  pub fn from_fn<F, E, H>(action: F, error_handler: H) -> Self
  where
    F: FnOnce() -> Result<(), E> + Send + 'static,
    E: Into<TaskError>,
    H: Fn(TaskError) + Send + Sync + 'static,
  {
    let action: Action = Box::new(move || -> TaskToExecute {
      Box::pin(async move { action().map_err(Into::into) })
    });
    Self::from_parts(action, Box::new(error_handler))
  }

  fn from_parts(action: Action, error_handler: ErrorHandler) -> Self {
    Self {
      id: NEXT_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed),
      action: Some(action),
      error_handler,
    }
  }

  /// Returns the process-unique ID of this task.
  pub fn id(&self) -> u64 {
    self.id
  }

  /// Returns `true` once the action has been taken by [`Task::execute`].
  pub fn is_executed(&self) -> bool {
    self.action.is_none()
  }

  /// Runs the wrapped action and returns its outcome.
  ///
  /// # Errors
  /// Returns whatever error the action produced, or
  /// `PoolError::TaskAlreadyExecuted` if the action was already consumed.
  pub async fn execute(&mut self) -> Result<(), TaskError> {
    match self.action.take() {
      Some(action) => action().await,
      None => Err(PoolError::TaskAlreadyExecuted.into()),
    }
  }

  /// Hands `err` to the stored error handler.
  pub fn on_error(&self, err: TaskError) {
    (self.error_handler)(err);
  }
}

impl fmt::Debug for Task {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Task")
      .field("id", &self.id)
      .field("executed", &self.is_executed())
      .finish_non_exhaustive()
  }
}
