//! Queued input slots.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::{Fault, FlowError};
use crate::port::{Port, StreamPort};

use super::gate::GateRef;
use super::{NodeCore, Purgeable};

struct QueueSlotState<T> {
  current: Option<T>,
  backlog: VecDeque<T>,
  fault: Option<Fault>,
  closed: bool,
}

pub(crate) struct QueueSlotShared<T> {
  gate: GateRef,
  state: Mutex<QueueSlotState<T>>,
}

impl<T: Send> QueueSlotShared<T> {
  fn lock(&self) -> MutexGuard<'_, QueueSlotState<T>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl<T: Send> Purgeable for QueueSlotShared<T> {
  /// Consumes the current token and promotes the next queued one; the gate
  /// stays clear while tokens (or a terminal signal) remain observable.
  fn purge(&self) {
    let mut state = self.lock();
    state.current = state.backlog.pop_front();
    if state.current.is_none() && state.fault.is_none() && !state.closed {
      self.gate.lower();
    }
  }
}

/// The queued variant of [crate::node::Slot]: one token per activation, any
/// number queued behind it.
///
/// `accept` never refuses a token for being early - it backlogs. Each purge
/// promotes the next queued token, which keeps the gate clear and re-fires
/// the owning actor until the backlog drains. A fault preempts queued
/// tokens; a `close` becomes observable once the backlog is consumed (the
/// gate stays clear and `read` keeps failing, so the body can notice the
/// end of input and stop its node).
pub struct QueueSlot<T> {
  shared: Arc<QueueSlotShared<T>>,
}

impl<T> Clone for QueueSlot<T> {
  fn clone(&self) -> Self {
    QueueSlot {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<T: Send + 'static> QueueSlot<T> {
  pub(crate) fn attach(core: &Arc<NodeCore>) -> Result<Self, FlowError> {
    let index = core.register_gate(true)?;
    let shared = Arc::new(QueueSlotShared {
      gate: GateRef::new(core, index),
      state: Mutex::new(QueueSlotState {
        current: None,
        backlog: VecDeque::new(),
        fault: None,
        closed: false,
      }),
    });
    let dyn_shared: Arc<dyn Purgeable> = shared.clone();
    let weak: Weak<dyn Purgeable> = Arc::downgrade(&dyn_shared);
    core.register_purger(weak);
    Ok(QueueSlot { shared })
  }

  /// Queues one token; the first one becomes current and clears the gate.
  pub fn accept(&self, token: T) -> Result<(), FlowError> {
    let fire = {
      let mut state = self.shared.lock();
      if state.fault.is_some() || state.closed {
        return Err(FlowError::InvalidState("queue slot already terminated"));
      }
      if state.current.is_none() {
        state.current = Some(token);
        self.shared.gate.raise()
      } else {
        state.backlog.push_back(token);
        false
      }
    };
    if fire {
      self.shared.gate.submit();
    }
    Ok(())
  }

  /// Stores a terminal failure; it preempts any queued tokens on `read`.
  pub fn fail(&self, fault: Fault) -> Result<(), FlowError> {
    let fire = {
      let mut state = self.shared.lock();
      if state.fault.is_some() || state.closed {
        return Err(FlowError::InvalidState("queue slot already terminated"));
      }
      state.fault = Some(fault);
      self.shared.gate.raise()
    };
    if fire {
      self.shared.gate.submit();
    }
    Ok(())
  }

  /// Reads the current token without consuming it; a stored fault is
  /// re-raised first.
  pub fn read(&self) -> Result<T, Fault>
  where
    T: Clone,
  {
    let state = self.shared.lock();
    if let Some(fault) = &state.fault {
      return Err(Fault::clone(fault));
    }
    match &state.current {
      Some(value) => Ok(value.clone()),
      None => Err(Arc::new(FlowError::InvalidState("queue slot is empty"))),
    }
  }

  /// True once `close` was observed; `read` on a closed, drained slot fails,
  /// and this is how a body tells end-of-input from a real fault.
  pub fn is_closed(&self) -> bool {
    self.shared.lock().closed
  }

  /// Current plus queued token count.
  pub fn len(&self) -> usize {
    let state = self.shared.lock();
    state.backlog.len() + usize::from(state.current.is_some())
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl<T: Send + 'static> Port<T> for QueueSlot<T> {
  fn accept(&self, token: T) -> Result<(), FlowError> {
    QueueSlot::accept(self, token)
  }

  fn fail(&self, fault: Fault) -> Result<(), FlowError> {
    QueueSlot::fail(self, fault)
  }
}

impl<T: Send + 'static> StreamPort<T> for QueueSlot<T> {
  /// Terminal signal: once the backlog drains, the gate stays clear with an
  /// empty slot so the body can observe the end of input.
  fn close(&self) -> Result<(), FlowError> {
    let fire = {
      let mut state = self.shared.lock();
      if state.fault.is_some() || state.closed {
        return Err(FlowError::InvalidState("queue slot already terminated"));
      }
      state.closed = true;
      self.shared.gate.raise()
    };
    if fire {
      self.shared.gate.submit();
    }
    Ok(())
  }
}
