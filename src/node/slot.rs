//! One-token input slots.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::{Fault, FlowError};
use crate::port::{Port, StreamPort};

use super::gate::GateRef;
use super::{NodeCore, Purgeable};

struct SlotState<T> {
  value: Option<T>,
  fault: Option<Fault>,
}

pub(crate) struct SlotShared<T> {
  gate: GateRef,
  /// Sticky slots keep their token across purges.
  sticky: bool,
  state: Mutex<SlotState<T>>,
}

impl<T: Send> SlotShared<T> {
  fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl<T: Send> Purgeable for SlotShared<T> {
  fn purge(&self) {
    if self.sticky {
      return;
    }
    let mut state = self.lock();
    state.value = None;
    state.fault = None;
    self.gate.lower();
  }
}

/// A gate that carries one token (value or fault) per activation cycle.
///
/// Created blocked; filling it clears the gate. The node body reads it
/// without consuming; the engine purges it after the body returns, which
/// clears the token and re-blocks the gate for the next cycle.
pub struct Slot<T> {
  shared: Arc<SlotShared<T>>,
}

impl<T> Clone for Slot<T> {
  fn clone(&self) -> Self {
    Slot {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<T: Send + 'static> Slot<T> {
  pub(crate) fn attach(core: &Arc<NodeCore>, sticky: bool) -> Result<Self, FlowError> {
    let index = core.register_gate(true)?;
    let shared = Arc::new(SlotShared {
      gate: GateRef::new(core, index),
      sticky,
      state: Mutex::new(SlotState {
        value: None,
        fault: None,
      }),
    });
    let dyn_shared: Arc<dyn Purgeable> = shared.clone();
    let weak: Weak<dyn Purgeable> = Arc::downgrade(&dyn_shared);
    core.register_purger(weak);
    Ok(Slot { shared })
  }

  /// Stores the activation token. One token per activation cycle: a second
  /// fill before the purge is a contract violation, never an overwrite.
  pub fn accept(&self, token: T) -> Result<(), FlowError> {
    let fire = {
      let mut state = self.shared.lock();
      if state.value.is_some() || state.fault.is_some() {
        return Err(FlowError::InvalidState("slot already holds a token"));
      }
      state.value = Some(token);
      self.shared.gate.raise()
    };
    if fire {
      self.shared.gate.submit();
    }
    Ok(())
  }

  /// Stores an upstream failure. The gate still clears, so the owning node
  /// fires and its body observes the fault through [Slot::read].
  pub fn fail(&self, fault: Fault) -> Result<(), FlowError> {
    let fire = {
      let mut state = self.shared.lock();
      if state.value.is_some() || state.fault.is_some() {
        return Err(FlowError::InvalidState("slot already holds a token"));
      }
      state.fault = Some(fault);
      self.shared.gate.raise()
    };
    if fire {
      self.shared.gate.submit();
    }
    Ok(())
  }

  /// Reads the current token without consuming it; re-raises a stored fault.
  pub fn read(&self) -> Result<T, Fault>
  where
    T: Clone,
  {
    let state = self.shared.lock();
    if let Some(fault) = &state.fault {
      return Err(Fault::clone(fault));
    }
    match &state.value {
      Some(value) => Ok(value.clone()),
      None => Err(Arc::new(FlowError::InvalidState("slot is empty"))),
    }
  }

  pub fn is_filled(&self) -> bool {
    let state = self.shared.lock();
    state.value.is_some() || state.fault.is_some()
  }

  pub fn is_blocked(&self) -> bool {
    self.shared.gate.is_blocked()
  }

  /// Clears the token and re-blocks the gate. The engine calls this after
  /// each actor activation; for one-shot nodes it is optional cleanup.
  pub fn purge(&self) {
    Purgeable::purge(self.shared.as_ref());
  }
}

impl<T: Send + 'static> Port<T> for Slot<T> {
  fn accept(&self, token: T) -> Result<(), FlowError> {
    Slot::accept(self, token)
  }

  fn fail(&self, fault: Fault) -> Result<(), FlowError> {
    Slot::fail(self, fault)
  }
}

impl<T: Send + 'static> StreamPort<T> for Slot<T> {
  /// Terminal signal with no token: clears the gate so the node can run and
  /// discover the empty slot itself (an empty read surfaces as a fault).
  fn close(&self) -> Result<(), FlowError> {
    let fire = {
      let state = self.shared.lock();
      if state.value.is_some() || state.fault.is_some() {
        return Ok(());
      }
      self.shared.gate.raise()
    };
    if fire {
      self.shared.gate.submit();
    }
    Ok(())
  }
}
