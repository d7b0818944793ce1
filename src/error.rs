use thiserror::Error;

/// Errors that can occur within the `bounded_exec` gate and pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
  #[error("Pool has been shut down, cannot accept new tasks")]
  PoolShutDown,

  #[error("Submitted task panicked: {0}")]
  TaskPanicked(String),

  #[error("Task was dropped by the runtime before it could run")]
  TaskAborted,

  #[error("Task could not be invoked: {0}")]
  Invocation(#[from] InvocationError),
}

/// Raised when a dynamically supplied argument list does not fit the callable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
  #[error("callable takes {expected} argument(s) but {found} were supplied")]
  ArityMismatch { expected: usize, found: usize },

  #[error("argument {index} is not of the expected type `{expected}`")]
  TypeMismatch { index: usize, expected: &'static str },
}
