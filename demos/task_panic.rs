use bounded_exec::{AdmissionGate, FixedWorkerPool};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Task Panic Example ---");

  let gate = AdmissionGate::new(1, Handle::current(), "panic_gate");
  gate
    .submit(async {
      info!("Panicking Task: Starting...");
      tokio::time::sleep(Duration::from_millis(100)).await;
      panic!("This task is designed to panic!");
    })
    .await;
  gate.submit(async { info!("Task after the panic still got a slot.") }).await;
  gate.join().await;
  info!("Gate settled. Faults: {}, admitted: {}", gate.fault_count(), gate.admitted());

  let pool = FixedWorkerPool::new(1, 2, Handle::current(), "panic_pool");
  pool
    .submit_blocking(|| panic!("Blocking task designed to panic!"))
    .await
    .expect("Failed to submit panicking task");
  pool
    .submit_blocking(|| info!("The single worker survived the panic."))
    .await
    .expect("Failed to submit follow-up task");
  pool.shutdown().await;

  info!("--- Task Panic Example End ---");
}
