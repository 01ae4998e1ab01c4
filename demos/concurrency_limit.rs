use futures_ensemble::TaskPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  info!("--- Concurrency Limit Example (Limit: 2) ---");

  let concurrency_limit = 2;
  let num_tasks = 5;
  let pool = TaskPool::new(concurrency_limit, "concurrency_pool");
  let running = Arc::new(AtomicUsize::new(0));

  info!(
    "Running {} tasks, each takes 1 sec. With concurrency {}, this should take ~{} secs.",
    num_tasks,
    concurrency_limit,
    (num_tasks as f32 / concurrency_limit as f32).ceil()
  );

  pool.add_completion_handler(|info| {
    tracing::info!("Task {} settled with {:?} after {:?}", info.index, info.status, info.elapsed);
  });

  let started_at = Instant::now();
  let results = pool
    .run(0..num_tasks, {
      let running = running.clone();
      move |id: usize, _index| {
        let running = running.clone();
        async move {
          let now = running.fetch_add(1, Ordering::SeqCst) + 1;
          info!("Task {} started, {} running", id, now);
          tokio::time::sleep(Duration::from_secs(1)).await;
          running.fetch_sub(1, Ordering::SeqCst);
          Ok::<_, String>(format!("Task {} finished", id))
        }
      }
    })
    .await;

  match results {
    Ok(results) => {
      for result in results {
        info!("{}", result);
      }
    }
    Err(e) => tracing::error!("Run failed: {}", e),
  }

  info!(
    "All tasks processed in {:?}; at most {} ran at once.",
    started_at.elapsed(),
    pool.peak_in_flight()
  );
  info!("--- Concurrency Limit Example End ---");
}
