//! Boundary adapter for callables whose signature is only known at runtime.
//!
//! Prefer `submit_with`, which checks arguments at compile time. `DynamicCall`
//! exists for call sites that must carry heterogeneous task signatures through
//! one type (plugin tables, script bindings). Arguments travel as boxed `Any`
//! values and are downcast when the task runs; a mismatch surfaces as an
//! [`InvocationError`] for that one task.

use crate::error::InvocationError;
use crate::task::TaskFn;

use std::any::Any;
use std::fmt;

/// A single type-erased argument.
pub type DynArg = Box<dyn Any + Send>;

/// Builds a `Vec<DynArg>` from a list of expressions.
///
/// ```
/// let args = bounded_exec::dyn_args!["job", 3_u32];
/// assert_eq!(args.len(), 2);
/// ```
#[macro_export]
macro_rules! dyn_args {
  ($($value:expr),* $(,)?) => {
    vec![$(Box::new($value) as $crate::DynArg),*]
  };
}

/// Argument tuples that can be rebuilt from a type-erased argument list.
pub trait FromDynArgs: Sized + Send + 'static {
  /// Number of arguments the tuple holds.
  const ARITY: usize;

  fn from_dyn_args(args: Vec<DynArg>) -> Result<Self, InvocationError>;
}

macro_rules! count_idents {
  () => { 0usize };
  ($head:ident $($tail:ident)*) => { 1usize + count_idents!($($tail)*) };
}

macro_rules! impl_from_dyn_args {
  ($($arg:ident),*) => {
    impl<$($arg: Any + Send,)*> FromDynArgs for ($($arg,)*) {
      const ARITY: usize = count_idents!($($arg)*);

      #[allow(non_snake_case, unused_mut, unused_variables)]
      fn from_dyn_args(args: Vec<DynArg>) -> Result<Self, InvocationError> {
        let found = args.len();
        if found != Self::ARITY {
          return Err(InvocationError::ArityMismatch { expected: Self::ARITY, found });
        }
        let mut args = args.into_iter().enumerate();
        $(
          let (index, value) = args
            .next()
            .ok_or(InvocationError::ArityMismatch { expected: Self::ARITY, found })?;
          let $arg = *value.downcast::<$arg>().map_err(|_| InvocationError::TypeMismatch {
            index,
            expected: std::any::type_name::<$arg>(),
          })?;
        )*
        Ok(($($arg,)*))
      }
    }
  };
}

impl_from_dyn_args!();
impl_from_dyn_args!(A);
impl_from_dyn_args!(A, B);
impl_from_dyn_args!(A, B, C);
impl_from_dyn_args!(A, B, C, D);
impl_from_dyn_args!(A, B, C, D, E);
impl_from_dyn_args!(A, B, C, D, E, F);

type Invoker = Box<dyn FnOnce(Vec<DynArg>) -> Result<(), InvocationError> + Send + 'static>;

/// A callable paired with a loosely typed argument list.
pub struct DynamicCall {
  arity: usize,
  invoker: Invoker,
  args: Vec<DynArg>,
}

impl fmt::Debug for DynamicCall {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DynamicCall")
      .field("arity", &self.arity)
      .field("supplied_args", &self.args.len())
      .finish_non_exhaustive()
  }
}

impl DynamicCall {
  /// Pairs `callable` with `args`. Nothing is checked until [`invoke`](Self::invoke).
  pub fn new<F, Args>(callable: F, args: Vec<DynArg>) -> Self
  where
    F: TaskFn<Args>,
    Args: FromDynArgs,
  {
    Self {
      arity: Args::ARITY,
      invoker: Box::new(move |args| {
        let typed_args = Args::from_dyn_args(args)?;
        callable.call(typed_args);
        Ok(())
      }),
      args,
    }
  }

  /// Number of parameters the callable declares.
  pub fn arity(&self) -> usize {
    self.arity
  }

  /// Number of arguments supplied with the call.
  pub fn supplied_args(&self) -> usize {
    self.args.len()
  }

  /// Downcasts the arguments and calls the callable on the current thread.
  pub fn invoke(self) -> Result<(), InvocationError> {
    (self.invoker)(self.args)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{Arc, Mutex};

  #[test]
  fn test_invoke_with_matching_arguments() {
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = results.clone();
    let call = DynamicCall::new(
      move |prefix: String, value: i32| sink.lock().unwrap().push(format!("{}{}", prefix, value)),
      dyn_args!["test".to_string(), 4_i32],
    );
    assert_eq!(call.arity(), 2);
    assert_eq!(call.invoke(), Ok(()));
    assert_eq!(*results.lock().unwrap(), vec!["test4".to_string()]);
  }

  #[test]
  fn test_wrong_arity_is_reported() {
    let call = DynamicCall::new(|_a: u8, _b: u8| {}, dyn_args![1_u8]);
    assert_eq!(call.supplied_args(), 1);
    assert_eq!(
      call.invoke(),
      Err(InvocationError::ArityMismatch { expected: 2, found: 1 })
    );
  }

  #[test]
  fn test_wrong_type_is_reported_with_position() {
    let call = DynamicCall::new(|_name: String, _n: u64| {}, dyn_args!["not a String", 1_u64]);
    match call.invoke() {
      Err(InvocationError::TypeMismatch { index, expected }) => {
        assert_eq!(index, 0);
        assert!(expected.contains("String"));
      }
      other => panic!("Expected TypeMismatch, got {:?}", other),
    }
  }

  #[test]
  fn test_zero_arity_call() {
    let flag = Arc::new(Mutex::new(false));
    let f = flag.clone();
    let call = DynamicCall::new(move || *f.lock().unwrap() = true, dyn_args![]);
    assert_eq!(call.arity(), 0);
    call.invoke().unwrap();
    assert!(*flag.lock().unwrap());
  }
}
