//! One-shot multicast results.

use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use tracing::warn;

use crate::error::{Fault, FlowError, Outcome};
use crate::port::Port;

type ObserverFn<T> = Box<dyn FnOnce(Outcome<T>) + Send>;

enum PromiseState<T> {
  Pending {
    observers: Vec<ObserverFn<T>>,
    wakers: Vec<Waker>,
  },
  Done(Outcome<T>),
}

struct PromiseShared<T> {
  state: Mutex<PromiseState<T>>,
}

impl<T> PromiseShared<T> {
  fn lock(&self) -> MutexGuard<'_, PromiseState<T>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// A single-assignment, multicast completion value.
///
/// Transitions Pending to resolved exactly once; the resolving call reports
/// whether it performed the transition, later calls are no-ops. Observers
/// attached before resolution are notified exactly once, in attachment
/// order; observers attached afterwards are notified synchronously from
/// `subscribe`. Clones share the same underlying state.
pub struct Promise<T> {
  shared: Arc<PromiseShared<T>>,
}

impl<T> Clone for Promise<T> {
  fn clone(&self) -> Self {
    Promise {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<T: Clone + Send + 'static> Promise<T> {
  pub fn new() -> Self {
    Promise {
      shared: Arc::new(PromiseShared {
        state: Mutex::new(PromiseState::Pending {
          observers: Vec::new(),
          wakers: Vec::new(),
        }),
      }),
    }
  }

  /// An already-resolved promise.
  pub fn resolved(value: T) -> Self {
    let promise = Self::new();
    promise.complete(value);
    promise
  }

  fn settle(&self, outcome: Outcome<T>) -> bool {
    let (observers, wakers) = {
      let mut state = self.shared.lock();
      match &mut *state {
        PromiseState::Done(_) => return false,
        PromiseState::Pending { observers, wakers } => {
          let observers = std::mem::take(observers);
          let wakers = std::mem::take(wakers);
          *state = PromiseState::Done(outcome.clone());
          (observers, wakers)
        }
      }
    };
    for observer in observers {
      observer(outcome.clone());
    }
    for waker in wakers {
      waker.wake();
    }
    true
  }

  /// Resolves with a value. First resolution wins; returns whether this call
  /// performed the transition.
  pub fn complete(&self, value: T) -> bool {
    self.settle(Outcome::Value(value))
  }

  /// Resolves with a failure. First resolution wins.
  pub fn fail(&self, fault: Fault) -> bool {
    self.settle(Outcome::Fault(fault))
  }

  /// Resolves with no value. First resolution wins.
  pub fn cancel(&self) -> bool {
    self.settle(Outcome::Cancelled)
  }

  pub fn is_done(&self) -> bool {
    matches!(&*self.shared.lock(), PromiseState::Done(_))
  }

  /// The outcome, if resolved.
  pub fn peek(&self) -> Option<Outcome<T>> {
    match &*self.shared.lock() {
      PromiseState::Done(outcome) => Some(outcome.clone()),
      PromiseState::Pending { .. } => None,
    }
  }

  /// Attaches an observer, notified exactly once with the outcome.
  pub fn subscribe<F>(&self, observer: F)
  where
    F: FnOnce(Outcome<T>) + Send + 'static,
  {
    let run_now = {
      let mut state = self.shared.lock();
      match &mut *state {
        PromiseState::Pending { observers, .. } => {
          observers.push(Box::new(observer));
          None
        }
        PromiseState::Done(outcome) => Some((observer, outcome.clone())),
      }
    };
    if let Some((observer, outcome)) = run_now {
      observer(outcome);
    }
  }

  /// Forwards the outcome into a port: `Value` becomes `accept`, `Fault`
  /// becomes `fail`, `Cancelled` becomes `fail` with [FlowError::Cancelled].
  pub fn feed<P>(&self, port: P)
  where
    P: Port<T> + 'static,
  {
    self.subscribe(move |outcome| {
      let delivery = match outcome {
        Outcome::Value(value) => port.accept(value),
        Outcome::Fault(fault) => port.fail(fault),
        Outcome::Cancelled => port.fail(Arc::new(FlowError::Cancelled)),
      };
      if let Err(error) = delivery {
        warn!(error = %error, "promise outcome dropped: port refused delivery");
      }
    });
  }

  /// Blocks the calling thread until the promise resolves.
  ///
  /// Implemented by parking on an internal one-shot observer, never by
  /// busy-waiting. Interop accessor for blocking callers; inside the engine
  /// use [Promise::subscribe] or [Promise::wait].
  pub fn get(&self) -> Result<T, Fault> {
    self.get_inner(None)
  }

  /// Like [Promise::get] with a timeout; expiry yields [FlowError::Timeout].
  pub fn get_timeout(&self, timeout: Duration) -> Result<T, Fault> {
    self.get_inner(Some(timeout))
  }

  fn get_inner(&self, timeout: Option<Duration>) -> Result<T, Fault> {
    let (tx, rx) = mpsc::sync_channel::<Outcome<T>>(1);
    self.subscribe(move |outcome| {
      let _ = tx.try_send(outcome);
    });
    let outcome = match timeout {
      Some(timeout) => match rx.recv_timeout(timeout) {
        Ok(outcome) => outcome,
        Err(_) => return Err(Arc::new(FlowError::Timeout)),
      },
      None => match rx.recv() {
        Ok(outcome) => outcome,
        Err(_) => return Err(Arc::new(FlowError::Cancelled)),
      },
    };
    outcome.into_result()
  }

  /// An awaitable view of this promise.
  pub fn wait(&self) -> PromiseFuture<T> {
    PromiseFuture {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Clone + Send + 'static> Port<T> for Promise<T> {
  /// Resolution through the port interface is idempotent, like
  /// [Promise::complete]: a second delivery is ignored, not an error.
  fn accept(&self, token: T) -> Result<(), FlowError> {
    self.complete(token);
    Ok(())
  }

  fn fail(&self, fault: Fault) -> Result<(), FlowError> {
    Promise::fail(self, fault);
    Ok(())
  }
}

/// Future resolving to the promise's [Outcome].
pub struct PromiseFuture<T> {
  shared: Arc<PromiseShared<T>>,
}

impl<T: Clone + Send + 'static> Future for PromiseFuture<T> {
  type Output = Outcome<T>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut state = self.shared.lock();
    match &mut *state {
      PromiseState::Done(outcome) => Poll::Ready(outcome.clone()),
      PromiseState::Pending { wakers, .. } => {
        if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
          wakers.push(cx.waker().clone());
        }
        Poll::Pending
      }
    }
  }
}
