use bounded_exec::{dyn_args, AdmissionGate, DynamicCall};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();
  info!("--- Admission Gate Example ---");

  let gate = AdmissionGate::new(2, Handle::current(), "demo_gate");
  let running = Arc::new(AtomicUsize::new(0));

  for i in 0..6 {
    let running = running.clone();
    gate
      .submit(async move {
        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Task {}: started ({} running).", i, now);
        tokio::time::sleep(Duration::from_millis(150)).await;
        running.fetch_sub(1, Ordering::SeqCst);
        info!("Task {}: finished.", i);
      })
      .await;
    info!("Submitted task {}. Admitted: {}/{}", i, gate.admitted(), gate.capacity());
  }

  gate
    .submit_with(|label: &'static str, n: u32| info!("Typed call: {} {}", label, n), ("answer", 42_u32))
    .await;

  gate
    .submit_dynamic(DynamicCall::new(
      |label: String| info!("Dynamic call: {}", label),
      dyn_args![String::from("resolved at runtime")],
    ))
    .await;

  info!("Waiting for all submitted tasks (outstanding: {}).", gate.outstanding());
  gate.join().await;
  info!("All tasks done. Faults: {}", gate.fault_count());
  info!("--- Admission Gate Example End ---");
}
