use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use worker_pool::{PoolConfig, Task, TaskError, WorkerPool};

const TASK_COUNT: usize = 20;

// Stands in for an HTTP GET: a short delay and, now and then, a failure.
async fn fetch(id: usize, url: &'static str) -> Result<(), TaskError> {
  info!("Task {}: fetching {}", id, url);
  tokio::time::sleep(Duration::from_millis(100 + (id as u64 % 4) * 50)).await;
  if id % 7 == 3 {
    return Err(format!("connection reset while fetching {url}").into());
  }
  info!("Task {}: fetched {}, status code: 200", id, url);
  Ok(())
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Fetch Simulation Example ---");

  let config = PoolConfig::from_env().unwrap_or_else(|e| {
    error!("Ignoring invalid environment configuration: {}", e);
    PoolConfig::new(5, 5)
  });
  let pool = WorkerPool::with_config(config.with_name("fetch_pool"), tokio::runtime::Handle::current())
    .expect("Pool construction failed");

  let cancel_token = CancellationToken::new();
  pool.start(cancel_token.clone());

  for id in 0..TASK_COUNT {
    let task = Task::new(
      move || fetch(id, "https://www.example.com"),
      |err| error!("Error fetching: {}", err),
    );
    pool.add_task_nonblocking(task);
  }

  let completed = pool.task_completed().wait_for(TASK_COUNT).await;
  info!("{} tasks completed. Shutting down pool.", completed);

  pool.shutdown().await;
  cancel_token.cancel();
  info!("--- Fetch Simulation Example End ---");
}
