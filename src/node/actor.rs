//! Reusable nodes.

use std::sync::Arc;

use crate::error::{Fault, FlowError};
use crate::executor::{Executor, default_executor};
use crate::promise::Promise;

use super::{Gate, Node, Permit, QueueSlot, Slot};

/// A reusable [Node]: after each successful body run it purges consumed
/// tokens (slots clear and re-block, permits lose one credit) and re-opens
/// its control gate, which may immediately re-trigger activation if every
/// other gate is already satisfied. Runs until [Actor::stop] or a body
/// failure.
pub struct Actor {
  node: Node,
}

impl Actor {
  /// Creates an actor on the process-wide default executor.
  pub fn new() -> Self {
    Self::with_executor(default_executor())
  }

  /// Creates an actor on the given executor.
  pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
    Actor {
      node: Node::recurrent(executor),
    }
  }

  /// The underlying node, for connectors that attach to a `&Node`.
  pub fn node(&self) -> &Node {
    &self.node
  }

  pub fn set_body<F>(&self, body: F) -> Result<(), FlowError>
  where
    F: FnMut() -> Result<(), Fault> + Send + 'static,
  {
    self.node.set_body(body)
  }

  pub fn gate(&self) -> Result<Gate, FlowError> {
    self.node.gate()
  }

  pub fn slot<T: Send + 'static>(&self) -> Result<Slot<T>, FlowError> {
    self.node.slot()
  }

  pub fn const_slot<T: Send + 'static>(&self) -> Result<Slot<T>, FlowError> {
    self.node.const_slot()
  }

  pub fn queue_slot<T: Send + 'static>(&self) -> Result<QueueSlot<T>, FlowError> {
    self.node.queue_slot()
  }

  pub fn permit(&self) -> Result<Permit, FlowError> {
    self.node.permit()
  }

  pub fn permit_with(&self, credit: i64) -> Result<Permit, FlowError> {
    self.node.permit_with(credit)
  }

  /// Arms the first activation; see [Node::start].
  pub fn start(&self) -> Result<(), FlowError> {
    self.node.start()
  }

  /// Prevents re-arming; the current activation, if any, still completes.
  pub fn stop(&self) {
    self.node.stop()
  }

  pub fn completion(&self) -> Promise<()> {
    self.node.completion()
  }

  pub fn is_stopped(&self) -> bool {
    self.node.is_stopped()
  }
}

impl Default for Actor {
  fn default() -> Self {
    Self::new()
  }
}
