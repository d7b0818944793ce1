use crate::error::{InvocationError, PoolError};

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use futures::FutureExt;
use tracing::warn;

lazy_static::lazy_static! {
  static ref NEXT_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// The type of future that the gate and the pool execute.
/// It must be `Send` and `'static`; tasks communicate only through side effects.
pub type TaskToExecute = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Internal unit of work. The `Err` arm carries failures that are not panics:
/// dynamic invocation errors and blocking bodies the runtime never ran.
pub(crate) type Job = Pin<Box<dyn Future<Output = Result<(), PoolError>> + Send + 'static>>;

pub(crate) fn next_task_id() -> u64 {
  NEXT_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed)
}

pub(crate) fn async_job<F>(task: F) -> Job
where
  F: Future<Output = ()> + Send + 'static,
{
  Box::pin(async move {
    task.await;
    Ok(())
  })
}

/// Wraps a synchronous closure so it runs on tokio's blocking pool.
/// A panic inside the closure is resumed on the awaiting side so the caller's
/// `catch_unwind` sees it.
pub(crate) fn blocking_job<F>(body: F) -> Job
where
  F: FnOnce() -> Result<(), InvocationError> + Send + 'static,
{
  Box::pin(async move {
    match tokio::task::spawn_blocking(body).await {
      Ok(result) => result.map_err(PoolError::from),
      Err(join_error) if join_error.is_panic() => std::panic::resume_unwind(join_error.into_panic()),
      Err(join_error) => {
        warn!("Blocking task was cancelled before running (runtime shutting down): {}", join_error);
        Err(PoolError::TaskAborted)
      }
    }
  })
}

/// Runs a job to completion, converting a panic into `PoolError::TaskPanicked`.
pub(crate) async fn run_guarded(job: Job) -> Result<(), PoolError> {
  match AssertUnwindSafe(job).catch_unwind().await {
    Ok(outcome) => outcome,
    Err(panic_payload) => Err(PoolError::TaskPanicked(panic_message(panic_payload.as_ref()))),
  }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&'static str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "<non-string panic payload>".to_string()
  }
}

/// A callable that can be applied to an argument tuple `Args`.
///
/// Implemented for every `FnOnce` of arity 0 through 6, so
/// `submit_with(|name: String, n: u32| ..., ("a".to_string(), 1))` type-checks
/// the arguments against the callable at compile time.
pub trait TaskFn<Args>: Send + 'static {
  fn call(self, args: Args);
}

macro_rules! impl_task_fn {
  ($($arg:ident),*) => {
    impl<Func, $($arg,)*> TaskFn<($($arg,)*)> for Func
    where
      Func: FnOnce($($arg),*) + Send + 'static,
    {
      #[allow(non_snake_case)]
      fn call(self, ($($arg,)*): ($($arg,)*)) {
        self($($arg),*)
      }
    }
  };
}

impl_task_fn!();
impl_task_fn!(A);
impl_task_fn!(A, B);
impl_task_fn!(A, B, C);
impl_task_fn!(A, B, C, D);
impl_task_fn!(A, B, C, D, E);
impl_task_fn!(A, B, C, D, E, F);

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;
  use std::sync::Arc;

  fn apply<Args, F: TaskFn<Args>>(f: F, args: Args) {
    f.call(args);
  }

  #[test]
  fn test_task_fn_applies_tuple_arguments() {
    let total = Arc::new(AtomicUsize::new(0));
    let t = total.clone();
    apply(
      move |a: usize, b: usize, c: usize| {
        t.fetch_add(a + b + c, AtomicOrdering::SeqCst);
      },
      (1, 2, 3),
    );
    let t = total.clone();
    apply(
      move || {
        t.fetch_add(10, AtomicOrdering::SeqCst);
      },
      (),
    );
    assert_eq!(total.load(AtomicOrdering::SeqCst), 16);
  }

  #[test]
  fn test_task_ids_are_unique() {
    let first = next_task_id();
    let second = next_task_id();
    assert!(second > first);
  }

  #[tokio::test]
  async fn test_run_guarded_reports_panic_message() {
    let job = async_job(async {
      panic!("boom");
    });
    assert_eq!(run_guarded(job).await, Err(PoolError::TaskPanicked("boom".to_string())));
  }

  #[tokio::test]
  async fn test_blocking_job_panic_is_caught() {
    let job = blocking_job(|| panic!("blocking {}", 7));
    assert_eq!(run_guarded(job).await, Err(PoolError::TaskPanicked("blocking 7".to_string())));
  }

  #[tokio::test]
  async fn test_run_guarded_passes_invocation_errors_through() {
    let job = blocking_job(|| Err(InvocationError::ArityMismatch { expected: 2, found: 1 }));
    assert_eq!(
      run_guarded(job).await,
      Err(PoolError::Invocation(InvocationError::ArityMismatch { expected: 2, found: 1 }))
    );
  }

  #[test]
  fn test_blocking_job_on_stopped_runtime_is_aborted_not_completed() {
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let handle = runtime.handle().clone();
    runtime.shutdown_background();

    let _guard = handle.enter();
    let ran = Arc::new(AtomicUsize::new(0));
    let r = ran.clone();
    let outcome = futures::executor::block_on(run_guarded(blocking_job(move || {
      r.fetch_add(1, AtomicOrdering::SeqCst);
      Ok(())
    })));
    assert_eq!(outcome, Err(PoolError::TaskAborted));
    assert_eq!(ran.load(AtomicOrdering::SeqCst), 0);
  }
}
