//! Receiving-side connector traits.

use crate::error::{Fault, FlowError};

/// Receiving side of a token connector.
///
/// Implemented by [crate::node::Slot], [crate::promise::Promise] and
/// [crate::conduit::Conduit], so any producer can target any of them.
pub trait Port<T: Send>: Send + Sync {
  /// Delivers one token.
  fn accept(&self, token: T) -> Result<(), FlowError>;

  /// Delivers one upstream failure.
  fn fail(&self, fault: Fault) -> Result<(), FlowError>;
}

/// A port that additionally understands a terminal completion signal.
pub trait StreamPort<T: Send>: Port<T> {
  /// Signals that no more tokens will arrive.
  fn close(&self) -> Result<(), FlowError>;
}
