//! Node activation core: gate arena, firing protocol, purge and restart.
//!
//! A [Node] owns an arena of gates. Every gate mutation goes through the
//! node's mutex, so clearing the last blocking gate and handing the node to
//! the executor is one atomic step: a node fires exactly once per transition
//! of its blocked-gate count from one to zero. The control gate (arena index
//! zero) is re-blocked inside that same critical section, which is what keeps
//! two activations of the same body from ever overlapping.

mod actor;
pub(crate) mod gate;
mod permit;
mod queue_slot;
mod slot;
#[cfg(test)]
mod slot_test;

pub use actor::Actor;
pub use gate::Gate;
pub use permit::Permit;
pub use queue_slot::QueueSlot;
pub use slot::Slot;

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, instrument, trace};

use crate::error::{BodyPanic, Fault, FlowError};
use crate::executor::{Executor, default_executor};
use crate::node::gate::GateRef;
use crate::promise::Promise;

/// Arena index of the control gate present in every node.
const CONTROL: usize = 0;

/// A node body: invoked once per activation, on an executor thread.
type Body = Box<dyn FnMut() -> Result<(), Fault> + Send>;

/// Connector-side purge hook, run once after each successful activation.
pub(crate) trait Purgeable: Send + Sync {
  fn purge(&self);
}

struct GateState {
  blocked: bool,
}

struct NodeInner {
  gates: Vec<GateState>,
  /// Count of currently blocked gates; the node fires when it reaches zero.
  blocked: usize,
  /// Latched by `start()`; freezes gate registration.
  started: bool,
  stopped: bool,
  purgers: Vec<Weak<dyn Purgeable>>,
}

pub(crate) struct NodeCore {
  inner: Mutex<NodeInner>,
  body: Mutex<Option<Body>>,
  executor: Arc<dyn Executor>,
  completion: Promise<()>,
  /// Re-arm after each successful run (actor) instead of finishing.
  restart: bool,
}

impl NodeCore {
  fn new(executor: Arc<dyn Executor>, restart: bool) -> Arc<Self> {
    Arc::new(NodeCore {
      inner: Mutex::new(NodeInner {
        // the control gate occupies index zero, blocked until start()
        gates: vec![GateState { blocked: true }],
        blocked: 1,
        started: false,
        stopped: false,
        purgers: Vec::new(),
      }),
      body: Mutex::new(None),
      executor,
      completion: Promise::new(),
      restart,
    })
  }

  fn lock_inner(&self) -> MutexGuard<'_, NodeInner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn lock_body(&self) -> MutexGuard<'_, Option<Body>> {
    self.body.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Appends a gate to the arena. Gates register only before `start()`.
  pub(crate) fn register_gate(&self, blocked: bool) -> Result<usize, FlowError> {
    let mut inner = self.lock_inner();
    if inner.started {
      return Err(FlowError::InvalidState("cannot register a gate after start"));
    }
    let index = inner.gates.len();
    inner.gates.push(GateState { blocked });
    if blocked {
      inner.blocked += 1;
    }
    Ok(index)
  }

  pub(crate) fn register_purger(&self, purger: Weak<dyn Purgeable>) {
    let mut inner = self.lock_inner();
    inner.purgers.push(purger);
  }

  /// Clears a gate. Returns true when this cleared the last blocking gate;
  /// the caller must then call [NodeCore::submit] once every lock it holds
  /// has been released.
  pub(crate) fn raise(&self, index: usize) -> bool {
    let mut inner = self.lock_inner();
    if !inner.gates[index].blocked {
      return false;
    }
    inner.gates[index].blocked = false;
    inner.blocked -= 1;
    if inner.blocked == 0 && !inner.stopped {
      // Re-block the control gate before the ready state can be observed:
      // the next activation requires an explicit re-arm.
      inner.gates[CONTROL].blocked = true;
      inner.blocked = 1;
      trace!(gate = index, "last gate cleared, node ready");
      return true;
    }
    false
  }

  pub(crate) fn lower(&self, index: usize) {
    let mut inner = self.lock_inner();
    if inner.gates[index].blocked {
      return;
    }
    inner.gates[index].blocked = true;
    inner.blocked += 1;
  }

  pub(crate) fn gate_blocked(&self, index: usize) -> bool {
    self.lock_inner().gates[index].blocked
  }

  fn is_stopped(&self) -> bool {
    self.lock_inner().stopped
  }

  /// Hands the node to its executor.
  pub(crate) fn submit(self: Arc<Self>) {
    let executor = Arc::clone(&self.executor);
    trace!("submitting node to executor");
    executor.submit(Box::new(move || self.run()));
  }

  /// One activation: runs the body, then finishes, fails or re-arms.
  fn run(self: Arc<Self>) {
    let Some(mut body) = self.lock_body().take() else {
      debug!("activation skipped: node has no body");
      return;
    };
    let outcome = catch_unwind(AssertUnwindSafe(|| body()));
    *self.lock_body() = Some(body);
    match outcome {
      Ok(Ok(())) => {
        if self.restart {
          if !self.is_stopped() {
            self.purge_all();
            if self.raise(CONTROL) {
              self.submit();
            }
          }
        } else {
          self.finish();
        }
      }
      Ok(Err(fault)) => self.fail(fault),
      Err(panic) => self.fail(Arc::new(BodyPanic(panic_message(panic)))),
    }
  }

  /// Runs every registered connector's purge hook, outside the node mutex.
  fn purge_all(&self) {
    let purgers: Vec<Arc<dyn Purgeable>> = {
      let mut inner = self.lock_inner();
      inner.purgers.retain(|weak| weak.strong_count() > 0);
      inner.purgers.iter().filter_map(Weak::upgrade).collect()
    };
    for purger in &purgers {
      purger.purge();
    }
  }

  /// One-shot success: the node is terminal with a resolved completion.
  fn finish(&self) {
    {
      let mut inner = self.lock_inner();
      inner.stopped = true;
    }
    self.completion.complete(());
  }

  fn fail(&self, fault: Fault) {
    debug!(error = %fault, "node body failed");
    {
      let mut inner = self.lock_inner();
      inner.stopped = true;
    }
    self.completion.fail(fault);
  }

  fn stop(&self) {
    {
      let mut inner = self.lock_inner();
      if inner.stopped {
        return;
      }
      inner.stopped = true;
    }
    debug!("node stopped");
    self.completion.cancel();
  }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "opaque panic payload".to_string()
  }
}

/// A unit of asynchronous computation with declared input gates.
///
/// The node fires - hands itself to its executor - exactly once each time its
/// blocked-gate count drops to zero. Construction protocol: create the node,
/// attach gates/slots/permits, set the body, then [Node::start]. A node with
/// zero declared gates is submitted synchronously from `start()`.
///
/// One-shot by construction; see [Actor] for the self-restarting variant.
/// Connectors hold weak back-references, so keep a `Node` (or [Actor]) handle
/// alive for as long as the node should run.
#[derive(Clone)]
pub struct Node {
  core: Arc<NodeCore>,
}

impl Node {
  /// Creates a one-shot node on the process-wide default executor.
  pub fn new() -> Self {
    Self::with_executor(default_executor())
  }

  /// Creates a one-shot node on the given executor.
  pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
    Node {
      core: NodeCore::new(executor, false),
    }
  }

  /// Creates a restarting node; used by [Actor].
  pub(crate) fn recurrent(executor: Arc<dyn Executor>) -> Self {
    Node {
      core: NodeCore::new(executor, true),
    }
  }

  pub(crate) fn core(&self) -> &Arc<NodeCore> {
    &self.core
  }

  /// Sets the body invoked on each activation. Must precede [Node::start].
  pub fn set_body<F>(&self, body: F) -> Result<(), FlowError>
  where
    F: FnMut() -> Result<(), Fault> + Send + 'static,
  {
    if self.core.lock_inner().started {
      return Err(FlowError::InvalidState("cannot set the body after start"));
    }
    *self.core.lock_body() = Some(Box::new(body));
    Ok(())
  }

  /// Attaches a manually driven gate, created blocked.
  pub fn gate(&self) -> Result<Gate, FlowError> {
    let index = self.core.register_gate(true)?;
    Ok(Gate::new(GateRef::new(&self.core, index)))
  }

  /// Attaches a one-token input slot, created blocked.
  pub fn slot<T: Send + 'static>(&self) -> Result<Slot<T>, FlowError> {
    Slot::attach(&self.core, false)
  }

  /// Attaches a sticky slot: its token survives purges, so an [Actor] reads
  /// the same value on every activation.
  pub fn const_slot<T: Send + 'static>(&self) -> Result<Slot<T>, FlowError> {
    Slot::attach(&self.core, true)
  }

  /// Attaches a queued input slot: one token per activation, any number
  /// backlogged behind it.
  pub fn queue_slot<T: Send + 'static>(&self) -> Result<QueueSlot<T>, FlowError> {
    QueueSlot::attach(&self.core)
  }

  /// Attaches a counting permit gate with zero credit.
  pub fn permit(&self) -> Result<Permit, FlowError> {
    Permit::attach(&self.core, 0)
  }

  /// Attaches a counting permit gate with the given initial credit.
  pub fn permit_with(&self, credit: i64) -> Result<Permit, FlowError> {
    Permit::attach(&self.core, credit)
  }

  /// Ends the construction phase and arms the node. Gate registration is
  /// rejected from here on. Fires immediately if every gate is already clear.
  #[instrument(level = "trace", skip_all)]
  pub fn start(&self) -> Result<(), FlowError> {
    if self.core.lock_body().is_none() {
      return Err(FlowError::InvalidState("node has no body"));
    }
    {
      let mut inner = self.core.lock_inner();
      if inner.stopped {
        return Err(FlowError::InvalidState("node is stopped"));
      }
      inner.started = true;
    }
    if self.core.raise(CONTROL) {
      Arc::clone(&self.core).submit();
    }
    Ok(())
  }

  /// Prevents all future activations and resolves the node's completion with
  /// `Cancelled` if it is still pending. Idempotent; a body that is already
  /// running is not interrupted.
  #[instrument(level = "trace", skip_all)]
  pub fn stop(&self) {
    self.core.stop();
  }

  /// The node's own result: `Value(())` after a one-shot run, `Cancelled`
  /// after [Node::stop], or the fault of a failed body.
  pub fn completion(&self) -> Promise<()> {
    self.core.completion.clone()
  }

  pub fn is_started(&self) -> bool {
    self.core.lock_inner().started
  }

  pub fn is_stopped(&self) -> bool {
    self.core.is_stopped()
  }
}

impl Default for Node {
  fn default() -> Self {
    Self::new()
  }
}
