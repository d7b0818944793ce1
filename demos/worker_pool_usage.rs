use bounded_exec::FixedWorkerPool;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();
  info!("--- Fixed Worker Pool Example ---");

  let pool = FixedWorkerPool::new(
    3, // Workers
    4, // Queue bound
    Handle::current(),
    "demo_pool",
  );

  for i in 0..12 {
    pool
      .submit(async move {
        info!("Task {}: running.", i);
        tokio::time::sleep(Duration::from_millis(100)).await;
      })
      .await
      .expect("Failed to submit task");
    info!(
      "Submitted task {}. Queued: {}, active: {}",
      i,
      pool.queued_task_count(),
      pool.active_task_count()
    );
  }

  info!("Shutting down pool (drains the queue first).");
  pool.shutdown().await;
  info!("--- Fixed Worker Pool Example End ---");
}
