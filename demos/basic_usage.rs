use futures_ensemble::async_pool;
use std::time::Duration;
use tracing::info;

// Resolves after `ms` milliseconds with `ms`.
async fn delay(ms: u64, index: usize) -> Result<u64, String> {
  info!("Task {} starting, will sleep for {}ms", index, ms);
  tokio::time::sleep(Duration::from_millis(ms)).await;
  info!("Task {} finished after {}ms", index, ms);
  Ok(ms)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  // At most two sleeps run at once; 3000 starts when 1000 finishes, 2000 when 3000 finishes.
  match async_pool(2, vec![1000, 5000, 3000, 2000], delay).await {
    Ok(results) => info!("Results in input order: {:?}", results),
    Err(e) => tracing::error!("Run failed: {}", e),
  }

  info!("--- Basic Usage Example End ---");
}
