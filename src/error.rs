//! Error taxonomy: contract errors, shared failure tokens, tagged outcomes.

use std::sync::Arc;

use thiserror::Error;

/// Contract violations surfaced synchronously to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
  /// Caller violated a precondition (negative delta, zero capacity).
  #[error("invalid argument: {0}")]
  InvalidArgument(&'static str),
  /// Caller violated a one-shot or ordering invariant.
  #[error("invalid state: {0}")]
  InvalidState(&'static str),
  /// A pending outcome was resolved with no value.
  #[error("cancelled")]
  Cancelled,
  /// A blocking accessor gave up waiting.
  #[error("timed out")]
  Timeout,
}

/// Shared failure token forwarded between connectors.
///
/// Cloneable, so a single upstream failure can multicast to any number of
/// downstream observers without copying the underlying error.
pub type Fault = Arc<dyn std::error::Error + Send + Sync>;

/// Wraps an error into a [Fault].
pub fn fault<E>(err: E) -> Fault
where
  E: std::error::Error + Send + Sync + 'static,
{
  Arc::new(err)
}

/// A panic caught escaping a node body.
#[derive(Debug, Error)]
#[error("node body panicked: {0}")]
pub struct BodyPanic(pub String);

/// Tagged completion of a node, promise or combinator.
///
/// Normal termination (`Cancelled`) is distinct from failure: `stop()` on a
/// never-run node resolves its promise `Cancelled`, not `Fault`.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
  /// Completed with a value.
  Value(T),
  /// A failure propagated from a body or an upstream source.
  Fault(Fault),
  /// Terminated without a value.
  Cancelled,
}

impl<T> Outcome<T> {
  pub fn is_value(&self) -> bool {
    matches!(self, Outcome::Value(_))
  }

  pub fn is_fault(&self) -> bool {
    matches!(self, Outcome::Fault(_))
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, Outcome::Cancelled)
  }

  /// Converts into a result, mapping `Cancelled` to [FlowError::Cancelled].
  pub fn into_result(self) -> Result<T, Fault> {
    match self {
      Outcome::Value(value) => Ok(value),
      Outcome::Fault(fault) => Err(fault),
      Outcome::Cancelled => Err(Arc::new(FlowError::Cancelled)),
    }
  }
}
