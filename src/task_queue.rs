use crate::task::Task;

use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

/// A task in flight through the queue.
///
/// `handoff` is only set on rendezvous queues: the submitter waits on the
/// other end and the task counts as dequeued only once the worker's
/// acknowledgement has been delivered.
struct Envelope {
  task: Task,
  handoff: Option<oneshot::Sender<()>>,
}

impl Envelope {
  /// Commits the handoff. `None` means the submitter already gave up and
  /// counted the task as abandoned.
  fn accept(self) -> Option<Task> {
    match self.handoff {
      None => Some(self.task),
      Some(ack) => ack.send(()).ok().map(|()| self.task),
    }
  }
}

/// A bounded FIFO queue of tasks, shared by every submitter and every worker.
///
/// Capacity `0` makes the queue a rendezvous point: a submission completes only
/// when a worker has taken the task.
///
/// Receiving is cancel-safe: a task leaves the queue only when the receiving
/// future resolves, so a worker that stops waiting never takes a task with it.
pub(crate) struct TaskQueue {
  capacity: usize,
  tx: mpsc::Sender<Envelope>,
  rx: mpsc::Receiver<Envelope>,
}

impl TaskQueue {
  pub(crate) fn new(capacity: usize) -> Self {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    Self { capacity, tx, rx }
  }

  /// Splits the queue into its producer and consumer halves.
  pub(crate) fn split(self) -> (QueueProducer, QueueConsumer) {
    (
      QueueProducer {
        rendezvous: self.capacity == 0,
        tx: self.tx,
      },
      QueueConsumer {
        rx: Arc::new(AsyncMutex::new(self.rx)),
      },
    )
  }
}

/// Outcome of a single enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueued {
  Accepted,
  /// The quit signal fired first, or the queue is gone. The task was dropped.
  Abandoned,
}

/// The producer handle. Cloned into every non-blocking submission helper.
#[derive(Clone)]
pub(crate) struct QueueProducer {
  rendezvous: bool,
  tx: mpsc::Sender<Envelope>,
}

impl fmt::Debug for QueueProducer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueProducer")
      .field("rendezvous", &self.rendezvous)
      .field("len", &self.len())
      .finish_non_exhaustive()
  }
}

impl QueueProducer {
  /// Enqueues `task`, waiting for space, unless `quit` fires first.
  ///
  /// `quit` is polled first, so once it has fired no further task is accepted
  /// even if the queue has room.
  pub(crate) async fn send_or_abandon(&self, task: Task, quit: &CancellationToken) -> Enqueued {
    let permit = tokio::select! {
      biased;
      _ = quit.cancelled() => return Enqueued::Abandoned,
      reserved = self.tx.reserve() => match reserved {
        Ok(permit) => permit,
        Err(_) => return Enqueued::Abandoned,
      },
    };

    if !self.rendezvous {
      permit.send(Envelope { task, handoff: None });
      return Enqueued::Accepted;
    }

    let (ack_tx, mut ack_rx) = oneshot::channel();
    permit.send(Envelope {
      task,
      handoff: Some(ack_tx),
    });

    tokio::select! {
      biased;
      acked = &mut ack_rx => match acked {
        Ok(()) => Enqueued::Accepted,
        Err(_) => Enqueued::Abandoned,
      },
      _ = quit.cancelled() => {
        // Closing first settles any race with a worker acknowledging right now.
        ack_rx.close();
        match ack_rx.try_recv() {
          Ok(()) => Enqueued::Accepted,
          Err(_) => Enqueued::Abandoned,
        }
      }
    }
  }

  /// Number of tasks waiting in the buffer. Always `0` for a rendezvous queue,
  /// which never holds a task on its own.
  pub(crate) fn len(&self) -> usize {
    if self.rendezvous {
      return 0;
    }
    self.tx.max_capacity() - self.tx.capacity()
  }
}

/// The consumer handle. Every worker holds a clone; each task is received by
/// exactly one of them.
#[derive(Clone)]
pub(crate) struct QueueConsumer {
  rx: Arc<AsyncMutex<mpsc::Receiver<Envelope>>>,
}

impl fmt::Debug for QueueConsumer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueConsumer").finish_non_exhaustive()
  }
}

impl QueueConsumer {
  /// Receives the next task. `None` means every producer is gone.
  ///
  /// Cancel-safe: dropping the future before it resolves leaves every task in
  /// the queue.
  pub(crate) async fn recv(&self) -> Option<Task> {
    let mut rx = self.rx.lock().await;
    loop {
      let envelope = rx.recv().await?;
      if let Some(task) = envelope.accept() {
        return Some(task);
      }
    }
  }
}
