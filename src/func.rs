//! One-shot closure nodes with pre-wired inputs and result.

use std::sync::Arc;

use crate::error::{Fault, FlowError};
use crate::executor::{Executor, default_executor};
use crate::node::{Node, Slot};
use crate::port::Port;
use crate::promise::Promise;

/// A one-shot node applying a closure to one input token.
///
/// Fires as soon as the input arrives; the closure's value (or fault)
/// resolves [FuncNode::result]. An upstream fault in the input is forwarded
/// to the result verbatim without invoking the closure. The node is also a
/// [Port], so a promise can feed it directly.
pub struct FuncNode<A, R> {
  node: Node,
  input: Slot<A>,
  result: Promise<R>,
}

impl<A, R> FuncNode<A, R>
where
  A: Clone + Send + 'static,
  R: Clone + Send + 'static,
{
  pub fn new<F>(func: F) -> Result<Self, FlowError>
  where
    F: FnOnce(A) -> Result<R, Fault> + Send + 'static,
  {
    Self::with_executor(default_executor(), func)
  }

  pub fn with_executor<F>(executor: Arc<dyn Executor>, func: F) -> Result<Self, FlowError>
  where
    F: FnOnce(A) -> Result<R, Fault> + Send + 'static,
  {
    let node = Node::with_executor(executor);
    let input = node.slot::<A>()?;
    let result = Promise::new();
    let mut func = Some(func);
    node.set_body({
      let input = input.clone();
      let result = result.clone();
      move || {
        let Some(func) = func.take() else {
          return Ok(());
        };
        match input.read() {
          Ok(arg) => match func(arg) {
            Ok(value) => {
              result.complete(value);
              Ok(())
            }
            Err(fault) => {
              result.fail(Fault::clone(&fault));
              Err(fault)
            }
          },
          Err(fault) => {
            result.fail(Fault::clone(&fault));
            Err(fault)
          }
        }
      }
    })?;
    node.start()?;
    Ok(FuncNode {
      node,
      input,
      result,
    })
  }

  pub fn input(&self) -> &Slot<A> {
    &self.input
  }

  pub fn result(&self) -> Promise<R> {
    self.result.clone()
  }

  pub fn node(&self) -> &Node {
    &self.node
  }
}

impl<A, R> Port<A> for FuncNode<A, R>
where
  A: Clone + Send + 'static,
  R: Clone + Send + 'static,
{
  fn accept(&self, token: A) -> Result<(), FlowError> {
    self.input.accept(token)
  }

  fn fail(&self, fault: Fault) -> Result<(), FlowError> {
    self.input.fail(fault)
  }
}

/// A one-shot node applying a closure to two input tokens.
///
/// Fires once both inputs are present. The first input fault encountered is
/// forwarded to the result without invoking the closure.
pub struct BiFuncNode<A, B, R> {
  node: Node,
  first: Slot<A>,
  second: Slot<B>,
  result: Promise<R>,
}

impl<A, B, R> BiFuncNode<A, B, R>
where
  A: Clone + Send + 'static,
  B: Clone + Send + 'static,
  R: Clone + Send + 'static,
{
  pub fn new<F>(func: F) -> Result<Self, FlowError>
  where
    F: FnOnce(A, B) -> Result<R, Fault> + Send + 'static,
  {
    Self::with_executor(default_executor(), func)
  }

  pub fn with_executor<F>(executor: Arc<dyn Executor>, func: F) -> Result<Self, FlowError>
  where
    F: FnOnce(A, B) -> Result<R, Fault> + Send + 'static,
  {
    let node = Node::with_executor(executor);
    let first = node.slot::<A>()?;
    let second = node.slot::<B>()?;
    let result = Promise::new();
    let mut func = Some(func);
    node.set_body({
      let first = first.clone();
      let second = second.clone();
      let result = result.clone();
      move || {
        let Some(func) = func.take() else {
          return Ok(());
        };
        let args = first.read().and_then(|a| second.read().map(|b| (a, b)));
        match args {
          Ok((a, b)) => match func(a, b) {
            Ok(value) => {
              result.complete(value);
              Ok(())
            }
            Err(fault) => {
              result.fail(Fault::clone(&fault));
              Err(fault)
            }
          },
          Err(fault) => {
            result.fail(Fault::clone(&fault));
            Err(fault)
          }
        }
      }
    })?;
    node.start()?;
    Ok(BiFuncNode {
      node,
      first,
      second,
      result,
    })
  }

  pub fn first(&self) -> &Slot<A> {
    &self.first
  }

  pub fn second(&self) -> &Slot<B> {
    &self.second
  }

  pub fn result(&self) -> Promise<R> {
    self.result.clone()
  }

  pub fn node(&self) -> &Node {
    &self.node
  }
}
