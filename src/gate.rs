use crate::dynamic::DynamicCall;
use crate::error::PoolError;
use crate::task::{async_job, blocking_job, next_task_id, run_guarded, Job, TaskFn};

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info_span, trace, warn, Instrument};

struct GateInner {
  name: Arc<String>,
  capacity: usize,
  semaphore: Semaphore,
  /// Slots currently held. Never exceeds `capacity`.
  admitted: AtomicUsize,
  /// Registered-but-unfinished units of work. Always `>= admitted`.
  outstanding: AtomicUsize,
  faults: AtomicUsize,
  all_done: Notify,
  tokio_handle: TokioHandle,
}

impl GateInner {
  fn release(&self) {
    if self
      .admitted
      .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |held| held.checked_sub(1))
      .is_err()
    {
      error!(gate = %self.name, "Release called with no admission held.");
      panic!("AdmissionGate '{}': release() without a matching acquire()", self.name);
    }
    self.semaphore.add_permits(1);
    self.finish_outstanding();
  }

  fn finish_outstanding(&self) {
    if self.outstanding.fetch_sub(1, AtomicOrdering::SeqCst) == 1 {
      trace!(gate = %self.name, "Outstanding count reached zero, waking joiners.");
      self.all_done.notify_waiters();
    }
  }
}

/// Rolls back the outstanding registration if `acquire` is dropped while waiting.
struct PendingAdmission<'a> {
  inner: &'a GateInner,
  admitted: bool,
}

impl Drop for PendingAdmission<'_> {
  fn drop(&mut self) {
    if !self.admitted {
      debug!(gate = %self.inner.name, "Acquire abandoned before admission.");
      self.inner.finish_outstanding();
    }
  }
}

/// One held admission slot. Releasing happens exactly once: on drop, or
/// earlier through [`AdmissionPermit::release`].
#[derive(Debug)]
pub struct AdmissionPermit {
  gate: AdmissionGate,
}

impl AdmissionPermit {
  /// Releases the slot now instead of at end of scope.
  pub fn release(self) {
    drop(self);
  }
}

impl Drop for AdmissionPermit {
  fn drop(&mut self) {
    self.gate.inner.release();
  }
}

/// A counting gate that bounds how many submitted tasks run at once and lets
/// the caller wait for every submitted task to finish.
///
/// Cloning is cheap; all clones share the same slots and counters.
#[derive(Clone)]
pub struct AdmissionGate {
  inner: Arc<GateInner>,
}

impl std::fmt::Debug for AdmissionGate {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AdmissionGate")
      .field("name", &*self.inner.name)
      .field("capacity", &self.inner.capacity)
      .field("admitted", &self.admitted())
      .field("outstanding", &self.outstanding())
      .finish()
  }
}

impl AdmissionGate {
  /// Creates a gate admitting at most `capacity` tasks at a time. Tasks started
  /// through the `submit` family are spawned on `tokio_handle`.
  pub fn new(capacity: usize, tokio_handle: TokioHandle, name: &str) -> Self {
    if capacity == 0 {
      warn!(gate = %name, "Capacity of 0 requested; clamping to 1.");
    }
    let capacity = capacity.max(1);

    Self {
      inner: Arc::new(GateInner {
        name: Arc::new(name.to_string()),
        capacity,
        semaphore: Semaphore::new(capacity),
        admitted: AtomicUsize::new(0),
        outstanding: AtomicUsize::new(0),
        faults: AtomicUsize::new(0),
        all_done: Notify::new(),
        tokio_handle,
      }),
    }
  }

  pub fn name(&self) -> &str {
    &self.inner.name
  }

  pub fn capacity(&self) -> usize {
    self.inner.capacity
  }

  /// Slots currently held.
  pub fn admitted(&self) -> usize {
    self.inner.admitted.load(AtomicOrdering::SeqCst)
  }

  /// Units of work registered through `acquire` and not yet released.
  pub fn outstanding(&self) -> usize {
    self.inner.outstanding.load(AtomicOrdering::SeqCst)
  }

  /// Slots free right now.
  pub fn available(&self) -> usize {
    self.inner.semaphore.available_permits()
  }

  /// Number of submitted tasks that panicked or could not be invoked.
  pub fn fault_count(&self) -> usize {
    self.inner.faults.load(AtomicOrdering::SeqCst)
  }

  /// Registers one unit of outstanding work and waits for a free slot.
  ///
  /// Every completed `acquire` must be paired with exactly one [`release`](Self::release).
  /// Cancel safe: dropping the future before it completes leaves the counters untouched.
  pub async fn acquire(&self) {
    let inner = &*self.inner;
    inner.outstanding.fetch_add(1, AtomicOrdering::SeqCst);
    let mut pending = PendingAdmission { inner, admitted: false };

    match inner.semaphore.acquire().await {
      Ok(permit) => permit.forget(),
      // The semaphore is owned by the gate and never closed.
      Err(_) => unreachable!("admission semaphore closed"),
    }
    inner.admitted.fetch_add(1, AtomicOrdering::SeqCst);
    pending.admitted = true;
    trace!(gate = %inner.name, "Admitted. Available: {}", inner.semaphore.available_permits());
  }

  /// Frees one slot and marks one unit of outstanding work as complete.
  ///
  /// # Panics
  /// Panics if no slot is currently held, as the capacity bound would
  /// otherwise be silently broken.
  pub fn release(&self) {
    self.inner.release();
  }

  /// Like [`acquire`](Self::acquire), but returns a guard that releases on drop.
  pub async fn acquire_permit(&self) -> AdmissionPermit {
    self.acquire().await;
    AdmissionPermit { gate: self.clone() }
  }

  /// Waits for a slot, then runs `task` on a newly spawned tokio task.
  ///
  /// The slot is released when the task finishes, panics included.
  pub async fn submit<F>(&self, task: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    self.submit_job(async_job(task)).await;
  }

  /// Waits for a slot, then runs the synchronous `task` on tokio's blocking pool.
  pub async fn submit_blocking<F>(&self, task: F)
  where
    F: FnOnce() + Send + 'static,
  {
    self
      .submit_job(blocking_job(move || {
        task();
        Ok(())
      }))
      .await;
  }

  /// Waits for a slot, then calls `callable` with the `args` tuple on the blocking pool.
  pub async fn submit_with<F, Args>(&self, callable: F, args: Args)
  where
    F: TaskFn<Args>,
    Args: Send + 'static,
  {
    self
      .submit_job(blocking_job(move || {
        callable.call(args);
        Ok(())
      }))
      .await;
  }

  /// Waits for a slot, then invokes a type-erased call on the blocking pool.
  ///
  /// An argument mismatch is logged and counted as a fault of that task only.
  pub async fn submit_dynamic(&self, call: DynamicCall) {
    self.submit_job(blocking_job(move || call.invoke())).await;
  }

  async fn submit_job(&self, job: Job) {
    let permit = self.acquire_permit().await;
    let task_id = next_task_id();
    let gate_name = self.inner.name.clone();
    let inner = self.inner.clone();

    debug!(gate = %gate_name, %task_id, "Admitted task. Spawning.");

    self.inner.tokio_handle.spawn(
      async move {
        let _permit = permit;
        match run_guarded(job).await {
          Ok(()) => trace!(gate = %gate_name, %task_id, "Task executed successfully."),
          Err(PoolError::TaskAborted) => warn!(gate = %gate_name, %task_id, "Task dropped by the runtime before running."),
          Err(task_error) => {
            inner.faults.fetch_add(1, AtomicOrdering::SeqCst);
            error!(gate = %gate_name, %task_id, "Task failed: {}", task_error);
          }
        }
      }
      .instrument(info_span!("gated_task", gate = %self.inner.name, %task_id)),
    );
  }

  /// Waits until the outstanding count is zero.
  ///
  /// Submissions racing with `join` are not blocked; stop submitting first if
  /// a precise cutoff is needed.
  pub async fn join(&self) {
    loop {
      // Register before checking so a wake between check and await is not lost.
      let notified = self.inner.all_done.notified();
      if self.inner.outstanding.load(AtomicOrdering::SeqCst) == 0 {
        return;
      }
      notified.await;
    }
  }
}
