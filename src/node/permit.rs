//! Counting permit gates for admission control and backpressure.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::FlowError;

use super::gate::GateRef;
use super::{NodeCore, Purgeable};

pub(crate) struct PermitShared {
  gate: GateRef,
  credit: Mutex<i64>,
}

impl PermitShared {
  fn lock(&self) -> MutexGuard<'_, i64> {
    self.credit.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl Purgeable for PermitShared {
  /// The engine-side acquire: one credit consumed per activation.
  fn purge(&self) {
    let mut credit = self.lock();
    let prev = *credit;
    *credit -= 1;
    if prev > 0 && *credit <= 0 {
      self.gate.lower();
    }
  }
}

/// A gate holding an integer credit instead of a boolean.
///
/// Blocked exactly while credit is non-positive. Credit may go arbitrarily
/// negative: over-consumption models owed permits, not an error state.
#[derive(Clone)]
pub struct Permit {
  shared: Arc<PermitShared>,
}

impl Permit {
  pub(crate) fn attach(core: &Arc<NodeCore>, credit: i64) -> Result<Self, FlowError> {
    let index = core.register_gate(credit <= 0)?;
    let shared = Arc::new(PermitShared {
      gate: GateRef::new(core, index),
      credit: Mutex::new(credit),
    });
    let dyn_shared: Arc<dyn Purgeable> = shared.clone();
    let weak: Weak<dyn Purgeable> = Arc::downgrade(&dyn_shared);
    core.register_purger(weak);
    Ok(Permit { shared })
  }

  /// Adds `delta` credits; clears the gate on a non-positive to positive
  /// crossing.
  pub fn release(&self, delta: i64) -> Result<(), FlowError> {
    if delta < 0 {
      return Err(FlowError::InvalidArgument("permit delta must be >= 0"));
    }
    let fire = {
      let mut credit = self.shared.lock();
      let prev = *credit;
      *credit += delta;
      if prev <= 0 && *credit > 0 {
        self.shared.gate.raise()
      } else {
        false
      }
    };
    if fire {
      self.shared.gate.submit();
    }
    Ok(())
  }

  pub fn release_one(&self) -> Result<(), FlowError> {
    self.release(1)
  }

  /// Consumes one credit; blocks the gate on a positive to non-positive
  /// crossing. The engine calls this once per activation; it is public for
  /// permit-feeder interop, and over-consumption below zero is allowed.
  pub fn acquire(&self) {
    Purgeable::purge(self.shared.as_ref());
  }

  pub fn credit(&self) -> i64 {
    *self.shared.lock()
  }

  pub fn is_blocked(&self) -> bool {
    self.shared.gate.is_blocked()
  }
}
