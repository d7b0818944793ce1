use crate::dynamic::DynamicCall;
use crate::error::PoolError;
use crate::task::{async_job, blocking_job, next_task_id, run_guarded, Job, TaskFn};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use kanal;
use tokio::runtime::Handle as TokioHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// A task waiting in the pool queue.
pub(crate) struct QueuedTask {
  pub(crate) task_id: u64,
  pub(crate) job: Job,
}

impl fmt::Debug for QueuedTask {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueuedTask")
      .field("task_id", &self.task_id)
      .finish_non_exhaustive()
  }
}

#[derive(Debug, Default)]
struct PoolStats {
  active: AtomicUsize,
  completed: AtomicUsize,
  faults: AtomicUsize,
}

/// A clonable producer handle for a [`FixedWorkerPool`].
///
/// Handles outliving the pool's shutdown get `PoolError::PoolShutDown` back.
#[derive(Clone)]
pub struct PoolSubmitter {
  pool_name: Arc<String>,
  task_queue_tx: kanal::AsyncSender<QueuedTask>,
  shutdown_token: CancellationToken,
}

impl fmt::Debug for PoolSubmitter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PoolSubmitter")
      .field("pool_name", &*self.pool_name)
      .field("is_shut_down", &self.is_shut_down())
      .finish()
  }
}

impl PoolSubmitter {
  /// Returns `true` once shutdown of the owning pool has started.
  pub fn is_shut_down(&self) -> bool {
    self.shutdown_token.is_cancelled() || self.task_queue_tx.is_closed()
  }

  /// Enqueues an async task, waiting while the queue is full.
  pub async fn submit<F>(&self, task: F) -> Result<(), PoolError>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    self.enqueue(async_job(task)).await
  }

  /// Enqueues a synchronous closure; the worker runs it on tokio's blocking pool.
  pub async fn submit_blocking<F>(&self, task: F) -> Result<(), PoolError>
  where
    F: FnOnce() + Send + 'static,
  {
    self
      .enqueue(blocking_job(move || {
        task();
        Ok(())
      }))
      .await
  }

  /// Enqueues `callable` applied to the `args` tuple.
  pub async fn submit_with<F, Args>(&self, callable: F, args: Args) -> Result<(), PoolError>
  where
    F: TaskFn<Args>,
    Args: Send + 'static,
  {
    self
      .enqueue(blocking_job(move || {
        callable.call(args);
        Ok(())
      }))
      .await
  }

  /// Enqueues a type-erased call. Argument mismatches are reported when a
  /// worker runs it, as a fault confined to that task.
  pub async fn submit_dynamic(&self, call: DynamicCall) -> Result<(), PoolError> {
    self.enqueue(blocking_job(move || call.invoke())).await
  }

  async fn enqueue(&self, job: Job) -> Result<(), PoolError> {
    if self.is_shut_down() {
      error!(pool_name = %self.pool_name, "Submit: Attempted to submit task to a pool that has been shut down.");
      return Err(PoolError::PoolShutDown);
    }

    let task_id = next_task_id();
    trace!(pool_name = %self.pool_name, %task_id, "Enqueueing task. Queued: {}", self.task_queue_tx.len());

    // A producer parked on a full queue (or waiting for a hand-off) gives up
    // once shutdown starts.
    let sent = tokio::select! {
      biased;
      sent = self.task_queue_tx.send(QueuedTask { task_id, job }) => sent.is_ok(),
      _ = self.shutdown_token.cancelled() => false,
    };

    if sent {
      debug!(pool_name = %self.pool_name, %task_id, "Task enqueued.");
      Ok(())
    } else {
      error!(pool_name = %self.pool_name, %task_id, "Submit: Pool shut down before the task could be enqueued.");
      Err(PoolError::PoolShutDown)
    }
  }
}

/// A fixed set of long-lived workers draining a bounded FIFO queue.
///
/// Submission waits while `max_queued` tasks are pending, so producers are
/// slowed to the pace of the workers instead of spawning unbounded work.
/// A `max_queued` of 0 makes every submission a direct hand-off to an idle
/// worker.
pub struct FixedWorkerPool {
  submitter: PoolSubmitter,
  task_queue_rx: kanal::AsyncReceiver<QueuedTask>,
  worker_count: usize,
  max_queued: usize,
  stats: Arc<PoolStats>,
  worker_handles: Vec<JoinHandle<()>>,
}

impl fmt::Debug for FixedWorkerPool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FixedWorkerPool")
      .field("name", &*self.submitter.pool_name)
      .field("worker_count", &self.worker_count)
      .field("max_queued", &self.max_queued)
      .field("queued", &self.queued_task_count())
      .field("active", &self.active_task_count())
      .finish()
  }
}

impl FixedWorkerPool {
  /// Starts `worker_count` workers on `tokio_handle`, sharing a queue bounded
  /// to `max_queued` pending tasks.
  pub fn new(worker_count: usize, max_queued: usize, tokio_handle: TokioHandle, pool_name: &str) -> Self {
    let (tx, task_queue_rx) = kanal::bounded_async(max_queued);
    let pool_name = Arc::new(pool_name.to_string());
    let shutdown_token = CancellationToken::new();
    let stats = Arc::new(PoolStats::default());

    let worker_handles = (0..worker_count)
      .map(|worker_index| {
        tokio_handle.spawn(
          Self::run_worker_loop(
            pool_name.clone(),
            task_queue_rx.clone(),
            shutdown_token.clone(),
            stats.clone(),
          )
          .instrument(info_span!("pool_worker", pool_name = %pool_name, worker = worker_index)),
        )
      })
      .collect();

    info!(pool_name = %pool_name, worker_count, max_queued, "Worker pool started.");

    Self {
      submitter: PoolSubmitter {
        pool_name,
        task_queue_tx: tx,
        shutdown_token,
      },
      task_queue_rx,
      worker_count,
      max_queued,
      stats,
      worker_handles,
    }
  }

  pub fn name(&self) -> &str {
    &self.submitter.pool_name
  }

  pub fn worker_count(&self) -> usize {
    self.worker_count
  }

  pub fn max_queued(&self) -> usize {
    self.max_queued
  }

  /// Tasks waiting in the queue, not yet picked up by a worker.
  pub fn queued_task_count(&self) -> usize {
    self.submitter.task_queue_tx.len()
  }

  /// Tasks currently executing inside a worker.
  pub fn active_task_count(&self) -> usize {
    self.stats.active.load(AtomicOrdering::SeqCst)
  }

  pub fn completed_task_count(&self) -> usize {
    self.stats.completed.load(AtomicOrdering::SeqCst)
  }

  /// Tasks that panicked or could not be invoked.
  pub fn fault_count(&self) -> usize {
    self.stats.faults.load(AtomicOrdering::SeqCst)
  }

  /// A clonable handle for submitting from several places at once.
  pub fn submitter(&self) -> PoolSubmitter {
    self.submitter.clone()
  }

  /// See [`PoolSubmitter::submit`].
  pub async fn submit<F>(&self, task: F) -> Result<(), PoolError>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    self.submitter.submit(task).await
  }

  /// See [`PoolSubmitter::submit_blocking`].
  pub async fn submit_blocking<F>(&self, task: F) -> Result<(), PoolError>
  where
    F: FnOnce() + Send + 'static,
  {
    self.submitter.submit_blocking(task).await
  }

  /// See [`PoolSubmitter::submit_with`].
  pub async fn submit_with<F, Args>(&self, callable: F, args: Args) -> Result<(), PoolError>
  where
    F: TaskFn<Args>,
    Args: Send + 'static,
  {
    self.submitter.submit_with(callable, args).await
  }

  /// See [`PoolSubmitter::submit_dynamic`].
  pub async fn submit_dynamic(&self, call: DynamicCall) -> Result<(), PoolError> {
    self.submitter.submit_dynamic(call).await
  }

  /// Stops intake and waits until every enqueued task has run and every
  /// worker has exited. With zero workers, queued tasks are discarded.
  pub async fn shutdown(mut self) {
    let pool_name = self.submitter.pool_name.clone();
    info!(pool_name = %pool_name, "Initiating pool shutdown.");
    self.submitter.shutdown_token.cancel();

    for (worker_index, handle) in std::mem::take(&mut self.worker_handles).into_iter().enumerate() {
      match handle.await {
        Ok(()) => trace!(pool_name = %pool_name, worker = worker_index, "Worker joined."),
        Err(join_error) => {
          error!(pool_name = %pool_name, worker = worker_index, "Error joining worker during shutdown: {:?}", join_error);
        }
      }
    }

    // Workers have drained everything they could; what is left only happens
    // when there were no workers.
    let discarded = self.task_queue_rx.len();
    let _ = self.task_queue_rx.close();
    if discarded > 0 {
      warn!(pool_name = %pool_name, discarded, "Pool had no workers left; discarded queued tasks.");
    }

    info!(
      pool_name = %pool_name,
      completed = self.completed_task_count(),
      faults = self.fault_count(),
      "Pool shutdown complete."
    );
  }

  async fn run_worker_loop(
    pool_name: Arc<String>,
    task_queue_rx: kanal::AsyncReceiver<QueuedTask>,
    shutdown_token: CancellationToken,
    stats: Arc<PoolStats>,
  ) {
    debug!(pool_name = %pool_name, "Worker loop started.");

    loop {
      let next_task = tokio::select! {
        biased;
        received = task_queue_rx.recv() => received.ok(),
        // Nothing ready; after shutdown only already-queued tasks are taken.
        _ = shutdown_token.cancelled() => task_queue_rx.try_recv().ok().flatten(),
      };

      let Some(QueuedTask { task_id, job }) = next_task else {
        break;
      };

      stats.active.fetch_add(1, AtomicOrdering::SeqCst);
      trace!(pool_name = %pool_name, %task_id, "Dequeued task. Executing.");
      let outcome = run_guarded(job).await;
      stats.active.fetch_sub(1, AtomicOrdering::SeqCst);

      match outcome {
        Ok(()) => {
          stats.completed.fetch_add(1, AtomicOrdering::SeqCst);
          trace!(pool_name = %pool_name, %task_id, "Task executed successfully.");
        }
        Err(PoolError::TaskAborted) => {
          warn!(pool_name = %pool_name, %task_id, "Task dropped by the runtime before running.");
        }
        Err(task_error) => {
          stats.faults.fetch_add(1, AtomicOrdering::SeqCst);
          error!(pool_name = %pool_name, %task_id, "Task failed: {}", task_error);
        }
      }
    }

    debug!(pool_name = %pool_name, "Task queue closed and drained. Worker loop stopped.");
  }
}

impl Drop for FixedWorkerPool {
  fn drop(&mut self) {
    if !self.submitter.shutdown_token.is_cancelled() {
      // Workers drain the queue and exit on their own; nothing is awaited here.
      info!(
        pool_name = %self.submitter.pool_name,
        "FixedWorkerPool dropped without shutdown. Signalling workers to drain and stop."
      );
      self.submitter.shutdown_token.cancel();
    }
  }
}
