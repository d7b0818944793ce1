//! Tokio-based bounded concurrency.
//!
//! Two independent tools:
//! - [`AdmissionGate`]: a counting gate. Every submission gets its own spawned
//!   task once a slot is free, and [`AdmissionGate::join`] waits for all of them.
//! - [`FixedWorkerPool`]: a fixed number of long-lived workers draining a
//!   bounded FIFO queue. Submission waits while the queue is full.

mod dynamic;
mod error;
mod gate;
mod task;
mod worker_pool;

pub use dynamic::{DynArg, DynamicCall, FromDynArgs};
pub use error::{InvocationError, PoolError};
pub use gate::{AdmissionGate, AdmissionPermit};
pub use task::{TaskFn, TaskToExecute};
pub use worker_pool::{FixedWorkerPool, PoolSubmitter};
