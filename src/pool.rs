use crate::config::PoolConfig;
use crate::error::{PoolError, TaskError};
use crate::notifier::{completion_channel, CompletionReceiver, CompletionSender};
use crate::task::Task;
use crate::task_queue::{Enqueued, QueueConsumer, QueueProducer, TaskQueue};

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, Instrument};

/// Lifecycle of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
  /// Constructed, `start` not yet called.
  Created,
  /// Workers are waiting for or executing tasks.
  Running,
  /// `stop` was called; workers are finishing their current task.
  Draining,
  /// Every worker has exited.
  Terminated,
}

#[derive(Debug, Default)]
struct PoolCounters {
  live_workers: AtomicUsize,
  pending_submissions: AtomicUsize,
  dropped_tasks: AtomicU64,
}

/// Decrements the live worker count when a worker loop ends, however it ends.
struct LiveWorkerGuard {
  counters: Arc<PoolCounters>,
}

impl Drop for LiveWorkerGuard {
  fn drop(&mut self) {
    self.counters.live_workers.fetch_sub(1, AtomicOrdering::AcqRel);
  }
}

/// Everything a single worker loop owns.
struct WorkerContext {
  pool_name: Arc<String>,
  worker_id: usize,
  queue: QueueConsumer,
  completions: CompletionSender,
  cancel_token: CancellationToken,
  quit_token: CancellationToken,
  active_task_info: Arc<DashMap<u64, usize>>,
  _live: LiveWorkerGuard,
}

/// A fixed-size pool of workers consuming [`Task`]s from a bounded queue.
///
/// Workers are Tokio tasks spawned on the runtime captured at construction.
/// `start` and `stop` are idempotent; only the first call of each has an effect.
pub struct WorkerPool {
  pool_name: Arc<String>,
  worker_count: usize,
  queue_capacity: usize,
  tokio_handle: TokioHandle,
  producer: QueueProducer,
  consumer: QueueConsumer,
  completion_tx: CompletionSender,
  completion_rx: CompletionReceiver,
  quit_token: CancellationToken,
  started: AtomicBool,
  stopped: AtomicBool,
  counters: Arc<PoolCounters>,
  active_task_info: Arc<DashMap<u64, usize>>,
  worker_join_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for WorkerPool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkerPool")
      .field("pool_name", &self.pool_name)
      .field("worker_count", &self.worker_count)
      .field("queue_capacity", &self.queue_capacity)
      .field("state", &self.state())
      .field("queued_tasks", &self.queued_task_count())
      .field("active_tasks", &self.active_task_count())
      .finish_non_exhaustive()
  }
}

impl WorkerPool {
  /// Creates a pool on the current Tokio runtime.
  ///
  /// Sizes are unsigned, so a negative capacity cannot be passed here. Build
  /// from signed or untrusted input with [`PoolConfig::from_signed`] or
  /// [`PoolConfig::from_env`] and [`WorkerPool::with_config`], which reject
  /// non-positive worker counts and negative capacities.
  ///
  /// # Errors
  /// `PoolError::InvalidWorkerCount` if `worker_count` is zero, and
  /// `PoolError::NoRuntime` if called outside a Tokio runtime.
  pub fn new(worker_count: usize, queue_capacity: usize) -> Result<Arc<Self>, PoolError> {
    let tokio_handle = TokioHandle::try_current().map_err(|_| PoolError::NoRuntime)?;
    Self::with_config(PoolConfig::new(worker_count, queue_capacity), tokio_handle)
  }

  pub fn with_config(config: PoolConfig, tokio_handle: TokioHandle) -> Result<Arc<Self>, PoolError> {
    config.validate()?;

    let (producer, consumer) = TaskQueue::new(config.queue_capacity).split();
    let (completion_tx, completion_rx) = completion_channel();

    debug!(
      pool_name = %config.name,
      workers = config.worker_count,
      queue_capacity = config.queue_capacity,
      "Worker pool created."
    );

    Ok(Arc::new(Self {
      pool_name: Arc::new(config.name),
      worker_count: config.worker_count,
      queue_capacity: config.queue_capacity,
      tokio_handle,
      producer,
      consumer,
      completion_tx,
      completion_rx,
      quit_token: CancellationToken::new(),
      started: AtomicBool::new(false),
      stopped: AtomicBool::new(false),
      counters: Arc::new(PoolCounters::default()),
      active_task_info: Arc::new(DashMap::new()),
      worker_join_handles: Mutex::new(Vec::new()),
    }))
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  pub fn worker_count(&self) -> usize {
    self.worker_count
  }

  pub fn queue_capacity(&self) -> usize {
    self.queue_capacity
  }

  /// Returns the number of tasks sitting in the queue, not yet dequeued.
  pub fn queued_task_count(&self) -> usize {
    self.producer.len()
  }

  /// Returns the number of tasks a worker is executing right now.
  pub fn active_task_count(&self) -> usize {
    self.active_task_info.len()
  }

  /// Returns the number of worker loops that have not exited yet.
  pub fn live_worker_count(&self) -> usize {
    self.counters.live_workers.load(AtomicOrdering::Acquire)
  }

  /// Returns the number of non-blocking submissions still racing to enqueue.
  pub fn pending_submissions(&self) -> usize {
    self.counters.pending_submissions.load(AtomicOrdering::Acquire)
  }

  /// Returns how many submitted tasks were dropped because the pool was stopping.
  pub fn dropped_task_count(&self) -> u64 {
    self.counters.dropped_tasks.load(AtomicOrdering::Acquire)
  }

  pub fn is_stopped(&self) -> bool {
    self.quit_token.is_cancelled()
  }

  pub fn state(&self) -> PoolState {
    let started = self.started.load(AtomicOrdering::Acquire);
    let stopped = self.is_stopped();
    let live = self.live_worker_count();
    match (started, stopped) {
      (false, false) => PoolState::Created,
      (false, true) => PoolState::Terminated,
      _ if live == 0 => PoolState::Terminated,
      (true, true) => PoolState::Draining,
      (true, false) => PoolState::Running,
    }
  }

  /// Spawns `worker_count` workers bound to `cancel_token`.
  ///
  /// Only the first call spawns anything, including under concurrent callers.
  /// Workers exit when either `cancel_token` or the pool's own quit signal fires.
  pub fn start(&self, cancel_token: CancellationToken) {
    if self
      .started
      .compare_exchange(false, true, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
      .is_ok()
    {
      self.spawn_workers(cancel_token);
    }
  }

  fn spawn_workers(&self, cancel_token: CancellationToken) {
    info!(pool_name = %*self.pool_name, workers = self.worker_count, "Starting worker pool.");

    let mut handles = self.worker_join_handles.lock();
    for worker_id in 0..self.worker_count {
      self.counters.live_workers.fetch_add(1, AtomicOrdering::AcqRel);
      let ctx = WorkerContext {
        pool_name: self.pool_name.clone(),
        worker_id,
        queue: self.consumer.clone(),
        completions: self.completion_tx.clone(),
        cancel_token: cancel_token.clone(),
        quit_token: self.quit_token.clone(),
        active_task_info: self.active_task_info.clone(),
        _live: LiveWorkerGuard {
          counters: self.counters.clone(),
        },
      };
      let span = info_span!("pool_worker", pool_name = %*self.pool_name, worker_id);
      handles.push(self.tokio_handle.spawn(run_worker_loop(ctx).instrument(span)));
    }
  }

  /// Submits `task`, waiting while the queue is full.
  ///
  /// Returns once the task is enqueued or, if the pool is stopped first, once
  /// it has been dropped. A dropped task is never executed and produces no
  /// completion notification; it is only counted in
  /// [`dropped_task_count`](Self::dropped_task_count).
  pub async fn add_task(&self, task: Task) {
    submit(&self.pool_name, &self.producer, &self.quit_token, &self.counters, task).await;
  }

  /// Submits `task` from a detached helper and returns immediately.
  ///
  /// Each call spawns its own helper, so a caller that outpaces the workers
  /// accumulates helpers without bound. See
  /// [`pending_submissions`](Self::pending_submissions).
  pub fn add_task_nonblocking(&self, task: Task) {
    let pool_name = self.pool_name.clone();
    let producer = self.producer.clone();
    let quit_token = self.quit_token.clone();
    let counters = self.counters.clone();

    counters.pending_submissions.fetch_add(1, AtomicOrdering::AcqRel);
    self.tokio_handle.spawn(async move {
      submit(&pool_name, &producer, &quit_token, &counters, task).await;
      counters.pending_submissions.fetch_sub(1, AtomicOrdering::AcqRel);
    });
  }

  /// Returns a receiver for completion notifications.
  pub fn task_completed(&self) -> CompletionReceiver {
    self.completion_rx.clone()
  }

  /// Signals every worker to exit after its current task.
  ///
  /// Tasks still queued are abandoned without notification. Only the first
  /// call has an effect.
  pub fn stop(&self) {
    if self
      .stopped
      .compare_exchange(false, true, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
      .is_err()
    {
      return;
    }
    info!(
      pool_name = %*self.pool_name,
      queued_tasks = self.queued_task_count(),
      active_tasks = self.active_task_count(),
      "Stopping worker pool."
    );
    self.quit_token.cancel();
  }

  /// Stops the pool and waits for every worker to exit.
  ///
  /// A worker that finished a task waits for its completion notification to be
  /// received, so keep draining [`task_completed`](Self::task_completed) (or
  /// cancel the start token) while awaiting this.
  pub async fn shutdown(&self) {
    self.stop();

    let handles = std::mem::take(&mut *self.worker_join_handles.lock());
    if handles.is_empty() {
      trace!(pool_name = %*self.pool_name, "No worker handles to join.");
      return;
    }

    info!(pool_name = %*self.pool_name, workers = handles.len(), "Waiting for workers to exit.");
    for handle in handles {
      if let Err(join_error) = handle.await {
        error!(pool_name = %*self.pool_name, "Error joining worker: {:?}", join_error);
      }
    }
    info!(pool_name = %*self.pool_name, "Worker pool terminated.");
  }
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    if !self.quit_token.is_cancelled() {
      debug!(pool_name = %*self.pool_name, "WorkerPool dropped without stop. Signaling workers to exit.");
    }
    self.stop();
  }
}

async fn submit(
  pool_name: &str,
  producer: &QueueProducer,
  quit_token: &CancellationToken,
  counters: &PoolCounters,
  task: Task,
) {
  let task_id = task.id();
  match producer.send_or_abandon(task, quit_token).await {
    Enqueued::Accepted => {
      trace!(%pool_name, %task_id, queued = producer.len(), "Task enqueued.");
    }
    Enqueued::Abandoned => {
      counters.dropped_tasks.fetch_add(1, AtomicOrdering::AcqRel);
      debug!(%pool_name, %task_id, "Task abandoned: pool is stopping.");
    }
  }
}

async fn run_worker_loop(ctx: WorkerContext) {
  info!(pool_name = %*ctx.pool_name, "Worker started.");

  loop {
    // The queue's receive is cancel-safe: when a signal wins this race, any
    // task not yet received stays in the queue.
    let task = tokio::select! {
      biased;
      _ = ctx.cancel_token.cancelled() => {
        info!(pool_name = %*ctx.pool_name, "Cancellation received. Worker exiting.");
        break;
      }
      _ = ctx.quit_token.cancelled() => {
        info!(pool_name = %*ctx.pool_name, "Quit signal received. Worker exiting.");
        break;
      }
      received = ctx.queue.recv() => match received {
        Some(task) => task,
        None => {
          info!(pool_name = %*ctx.pool_name, "Task queue closed. Worker exiting.");
          break;
        }
      },
    };

    let task_id = task.id();
    execute_task(&ctx, task).await;

    if ctx.completions.notify(&ctx.cancel_token).await {
      debug!(pool_name = %*ctx.pool_name, %task_id, "Worker finished task.");
    } else {
      debug!(pool_name = %*ctx.pool_name, %task_id, "Worker finished task; completion notification not delivered.");
    }
  }
}

/// Runs the task and, if it failed, its error handler. Neither may take the worker down.
async fn execute_task(ctx: &WorkerContext, mut task: Task) {
  let task_id = task.id();
  ctx.active_task_info.insert(task_id, ctx.worker_id);
  debug!(pool_name = %*ctx.pool_name, %task_id, "Dequeued task. Executing.");

  let outcome: Result<(), TaskError> = match AssertUnwindSafe(task.execute()).catch_unwind().await {
    Ok(result) => result,
    Err(_panic_payload) => {
      error!(pool_name = %*ctx.pool_name, %task_id, "Task panicked during execution.");
      Err(PoolError::TaskPanicked.into())
    }
  };

  if let Err(err) = outcome {
    if std::panic::catch_unwind(AssertUnwindSafe(|| task.on_error(err))).is_err() {
      error!(pool_name = %*ctx.pool_name, %task_id, "Task error handler panicked.");
    }
  }

  ctx.active_task_info.remove(&task_id);
}
