use kanal::{AsyncReceiver, AsyncSender};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Creates the unbuffered completion channel shared by all workers of a pool.
pub(crate) fn completion_channel() -> (CompletionSender, CompletionReceiver) {
  let (tx, rx) = kanal::bounded_async(0);
  (CompletionSender { tx }, CompletionReceiver { rx })
}

/// Worker-side half of the completion channel.
#[derive(Clone)]
pub(crate) struct CompletionSender {
  tx: AsyncSender<bool>,
}

impl CompletionSender {
  /// Hands one completion notification to a receiver, waiting until one is ready.
  ///
  /// Returns `false` if the notification was not delivered, either because
  /// `cancel` fired first or because every receiver is gone.
  pub(crate) async fn notify(&self, cancel: &CancellationToken) -> bool {
    tokio::select! {
      biased;
      sent = self.tx.send(true) => sent.is_ok(),
      _ = cancel.cancelled() => {
        trace!("Completion notification abandoned: cancellation fired while waiting for a receiver.");
        false
      }
    }
  }
}

/// Read-only handle to a pool's completion notifications.
///
/// Every task a worker dequeues and runs yields exactly one `true`, whether its
/// action succeeded or failed. The channel is unbuffered: a worker that finishes
/// a task stalls until someone receives its notification, so keep draining.
#[derive(Clone)]
pub struct CompletionReceiver {
  rx: AsyncReceiver<bool>,
}

impl fmt::Debug for CompletionReceiver {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CompletionReceiver")
      .field("closed", &self.rx.is_closed())
      .finish()
  }
}

impl CompletionReceiver {
  /// Waits for the next notification.
  ///
  /// Returns `None` once every worker and the pool itself are gone.
  ///
  /// Not cancel-safe: dropping this future while a worker is handing over a
  /// notification discards that notification. Drain from one long-lived loop
  /// rather than racing `recv` against timers.
  pub async fn recv(&self) -> Option<bool> {
    self.rx.recv().await.ok()
  }

  /// Takes a notification only if a worker is already waiting to deliver one.
  pub fn try_recv(&self) -> Option<bool> {
    self.rx.try_recv().ok().flatten()
  }

  /// Drains notifications until `count` of them have been received.
  ///
  /// Returns the number actually received, which is less than `count` only if
  /// the channel closed first.
  pub async fn wait_for(&self, count: usize) -> usize {
    let mut received = 0;
    while received < count {
      match self.recv().await {
        Some(_) => received += 1,
        None => break,
      }
    }
    received
  }
}
