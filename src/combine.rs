//! Joins and races over promises.

use std::sync::Arc;

use crate::error::{FlowError, Outcome};
use crate::executor::InlineExecutor;
use crate::node::Node;
use crate::promise::Promise;

/// Join: resolves `Value(())` once every source has resolved successfully.
///
/// Each source holds one single-use gate on an internal node; the first
/// source fault resolves the join with that fault immediately, without
/// waiting for the remaining sources (their resolutions still drain the
/// gates, they just no longer affect the result).
pub struct AllOf {
  node: Node,
  result: Promise<()>,
}

impl AllOf {
  pub fn new() -> Self {
    // The join body is a plain promise resolution, so it runs inline rather
    // than taking a trip through a pool.
    let node = Node::with_executor(Arc::new(InlineExecutor));
    let result = Promise::new();
    node
      .set_body({
        let result = result.clone();
        move || {
          result.complete(());
          Ok(())
        }
      })
      .expect("body set before start");
    AllOf { node, result }
  }

  /// Blocks the join until `source` resolves. Must precede [AllOf::start].
  pub fn add<T: Clone + Send + 'static>(&self, source: &Promise<T>) -> Result<(), FlowError> {
    let gate = self.node.gate()?;
    let result = self.result.clone();
    source.subscribe(move |outcome| {
      match outcome {
        Outcome::Value(_) => {}
        Outcome::Fault(fault) => {
          result.fail(fault);
        }
        Outcome::Cancelled => {
          result.cancel();
        }
      }
      // drain the gate regardless of the outcome kind
      gate.turn_on();
    });
    Ok(())
  }

  /// Seals the source set; the join may now fire. A join over zero sources
  /// resolves immediately.
  pub fn start(&self) -> Result<(), FlowError> {
    self.node.start()
  }

  pub fn result(&self) -> Promise<()> {
    self.result.clone()
  }
}

impl Default for AllOf {
  fn default() -> Self {
    Self::new()
  }
}

/// Race: resolves with the outcome of whichever source resolves first,
/// forwarded verbatim; later resolutions are observably ignored.
pub struct AnyOf<T> {
  result: Promise<T>,
}

impl<T: Clone + Send + 'static> AnyOf<T> {
  pub fn new() -> Self {
    AnyOf {
      result: Promise::new(),
    }
  }

  pub fn add(&self, source: &Promise<T>) {
    let result = self.result.clone();
    source.subscribe(move |outcome| {
      match outcome {
        Outcome::Value(value) => {
          result.complete(value);
        }
        Outcome::Fault(fault) => {
          result.fail(fault);
        }
        Outcome::Cancelled => {
          result.cancel();
        }
      };
    });
  }

  pub fn result(&self) -> Promise<T> {
    self.result.clone()
  }
}

impl<T: Clone + Send + 'static> Default for AnyOf<T> {
  fn default() -> Self {
    Self::new()
  }
}
