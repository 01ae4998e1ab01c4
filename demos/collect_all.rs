use futures_ensemble::{AbortHandle, RunOptions, TaskError, TaskPool};
use std::time::Duration;
use tracing::info;

// Resource 3 is missing and resource 6 hangs until the timeout fires.
async fn fetch(id: u32, _index: usize) -> Result<String, String> {
  let ms = if id == 6 { 10_000 } else { 100 * u64::from(id % 4 + 1) };
  tokio::time::sleep(Duration::from_millis(ms)).await;
  if id == 3 {
    return Err(format!("resource {} is unavailable", id));
  }
  Ok(format!("resource {}", id))
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  info!("--- Collect-All Example ---");

  let abort = AbortHandle::new();
  let pool = TaskPool::new(3, "collect_all_pool").with_options(
    RunOptions::new()
      .with_task_timeout(Duration::from_millis(800))
      .with_abort_handle(abort.clone()),
  );

  // Stop admitting new fetches after 1.5 seconds; whatever is in flight still finishes.
  tokio::spawn({
    let abort = abort.clone();
    async move {
      tokio::time::sleep(Duration::from_millis(1500)).await;
      info!("Aborting: no further fetches will be started.");
      abort.abort();
    }
  });

  let outcomes = match pool.run_settled(0..10u32, fetch).await {
    Ok(outcomes) => outcomes,
    Err(e) => {
      tracing::error!("Run rejected: {}", e);
      return;
    }
  };

  for (index, outcome) in outcomes.iter().enumerate() {
    match outcome {
      Ok(body) => info!("#{}: {}", index, body),
      Err(TaskError::TimedOut(limit)) => info!("#{}: gave up after {:?}", index, limit),
      Err(e) => info!("#{}: {}", index, e),
    }
  }

  info!("--- Collect-All Example End ---");
}
