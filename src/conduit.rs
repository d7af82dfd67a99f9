//! Bounded multi-producer/multi-subscriber token pipes.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use futures::Stream;
use tracing::{instrument, trace, warn};

use crate::error::{Fault, FlowError};
use crate::node::Node;
use crate::node::gate::GateRef;
use crate::port::{Port, StreamPort};

/// Default buffer capacity of a [Conduit].
pub const DEFAULT_CAPACITY: usize = 16;

/// Handle identifying one subscription, for [Conduit::unsubscribe].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

struct Waiter<T> {
  id: u64,
  port: Arc<dyn StreamPort<T>>,
  /// One-shot waiters (blocking take, stream polls) leave the rotation
  /// after a single delivery instead of re-queueing.
  once: bool,
}

struct ConduitState<T> {
  buffer: VecDeque<T>,
  waiters: VecDeque<Waiter<T>>,
  done: bool,
  fault: Option<Fault>,
  producer_gate: Option<GateRef>,
  next_id: u64,
}

struct ConduitShared<T> {
  capacity: usize,
  state: Mutex<ConduitState<T>>,
}

impl<T> ConduitShared<T> {
  fn lock(&self) -> MutexGuard<'_, ConduitState<T>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// A bounded, ordered token pipe between nodes.
///
/// A produced token goes straight to the oldest waiting subscriber if one
/// exists (round-robin across the rotation), otherwise it is buffered; a
/// full buffer blocks the producer-side gate until a subscriber drains it.
/// Invariant: the buffer and the waiting-subscriber queue are never both
/// non-empty.
///
/// Terminal signals (`complete`/`fail`) are one-shot; queued and future
/// subscribers receive them instead of tokens. Clones share the same pipe.
pub struct Conduit<T> {
  shared: Arc<ConduitShared<T>>,
}

impl<T> Clone for Conduit<T> {
  fn clone(&self) -> Self {
    Conduit {
      shared: Arc::clone(&self.shared),
    }
  }
}

enum Handoff<T> {
  Deliver {
    port: Arc<dyn StreamPort<T>>,
    token: T,
    /// Producer gate to submit after the lock is dropped, when the pop
    /// re-opened it and made the producing node ready.
    reopened: Option<GateRef>,
  },
  Terminal(Option<Fault>),
  Queued,
}

impl<T: Send + 'static> Conduit<T> {
  /// A standalone conduit. Without a producer gate, overflow surfaces to the
  /// producer as `InvalidState`.
  pub fn new(capacity: usize) -> Result<Self, FlowError> {
    if capacity == 0 {
      return Err(FlowError::InvalidArgument("conduit capacity must be > 0"));
    }
    Ok(Conduit {
      shared: Arc::new(ConduitShared {
        capacity,
        state: Mutex::new(ConduitState {
          buffer: VecDeque::new(),
          waiters: VecDeque::new(),
          done: false,
          fault: None,
          producer_gate: None,
          next_id: 0,
        }),
      }),
    })
  }

  /// A standalone conduit with [DEFAULT_CAPACITY].
  pub fn with_default_capacity() -> Self {
    Self::new(DEFAULT_CAPACITY).expect("default capacity is non-zero")
  }

  /// A conduit whose backpressure drives `node`: an unblocked gate registers
  /// on the node and closes while the buffer sits at capacity.
  pub fn attached(node: &Node, capacity: usize) -> Result<Self, FlowError> {
    let conduit = Self::new(capacity)?;
    let index = node.core().register_gate(false)?;
    conduit.shared.lock().producer_gate = Some(GateRef::new(node.core(), index));
    Ok(conduit)
  }

  /// Delivers one token: direct handoff to the oldest waiting subscriber,
  /// else buffered, blocking the producer gate when the buffer fills.
  #[instrument(level = "trace", skip_all)]
  pub fn produce(&self, token: T) -> Result<(), FlowError> {
    let handoff = {
      let mut state = self.shared.lock();
      if state.done {
        return Err(FlowError::InvalidState("conduit already completed"));
      }
      if let Some(waiter) = state.waiters.pop_front() {
        let port = Arc::clone(&waiter.port);
        if !waiter.once {
          state.waiters.push_back(waiter);
        }
        Some((port, token))
      } else if state.buffer.len() == self.shared.capacity {
        return Err(FlowError::InvalidState("conduit buffer overflow"));
      } else {
        state.buffer.push_back(token);
        if state.buffer.len() == self.shared.capacity {
          trace!("buffer full, blocking producer gate");
          if let Some(gate) = &state.producer_gate {
            gate.lower();
          }
        }
        None
      }
    };
    if let Some((port, token)) = handoff {
      if let Err(error) = port.accept(token) {
        warn!(error = %error, "token dropped: subscriber refused delivery");
      }
    }
    Ok(())
  }

  /// Adds a persistent subscriber. Buffered tokens are drained to it in FIFO
  /// order first (releasing producer backpressure as they go); it then joins
  /// the round-robin rotation, or receives the terminal signal if the
  /// conduit is already done.
  pub fn subscribe<P>(&self, port: P) -> Subscription
  where
    P: StreamPort<T> + 'static,
  {
    self.subscribe_port(Arc::new(port), false)
  }

  pub(crate) fn subscribe_port(&self, port: Arc<dyn StreamPort<T>>, once: bool) -> Subscription {
    let id = {
      let mut state = self.shared.lock();
      let id = state.next_id;
      state.next_id += 1;
      id
    };
    loop {
      let step = {
        let mut state = self.shared.lock();
        if let Some(token) = state.buffer.pop_front() {
          let reopened = match &state.producer_gate {
            Some(gate) if gate.raise() => Some(gate.clone()),
            _ => None,
          };
          Handoff::Deliver {
            port: Arc::clone(&port),
            token,
            reopened,
          }
        } else if state.done {
          Handoff::Terminal(state.fault.clone())
        } else {
          state.waiters.push_back(Waiter {
            id,
            port: Arc::clone(&port),
            once,
          });
          Handoff::Queued
        }
      };
      match step {
        Handoff::Deliver {
          port: target,
          token,
          reopened,
        } => {
          if let Some(gate) = reopened {
            gate.submit();
          }
          if let Err(error) = target.accept(token) {
            warn!(error = %error, "token dropped: subscriber refused delivery");
          }
          if once {
            return Subscription(id);
          }
        }
        Handoff::Terminal(fault) => {
          let delivery = match fault {
            Some(fault) => port.fail(fault),
            None => port.close(),
          };
          if let Err(error) = delivery {
            warn!(error = %error, "terminal signal refused by subscriber");
          }
          return Subscription(id);
        }
        Handoff::Queued => return Subscription(id),
      }
    }
  }

  /// Terminal success signal. One-shot: a second terminal is `InvalidState`.
  #[instrument(level = "trace", skip_all)]
  pub fn complete(&self) -> Result<(), FlowError> {
    self.finish(None)
  }

  /// Terminal failure signal, forwarded verbatim to every subscriber.
  #[instrument(level = "trace", skip_all)]
  pub fn fail(&self, fault: Fault) -> Result<(), FlowError> {
    self.finish(Some(fault))
  }

  fn finish(&self, fault: Option<Fault>) -> Result<(), FlowError> {
    let waiters = {
      let mut state = self.shared.lock();
      if state.done {
        return Err(FlowError::InvalidState("conduit already completed"));
      }
      state.done = true;
      state.fault = fault.clone();
      std::mem::take(&mut state.waiters)
    };
    for waiter in waiters {
      let delivery = match &fault {
        Some(fault) => waiter.port.fail(Fault::clone(fault)),
        None => waiter.port.close(),
      };
      if let Err(error) = delivery {
        warn!(error = %error, "terminal signal refused by subscriber");
      }
    }
    Ok(())
  }

  /// Pops a buffered token without waiting, releasing one unit of producer
  /// backpressure.
  pub fn poll(&self) -> Option<T> {
    let (token, reopened) = {
      let mut state = self.shared.lock();
      let token = state.buffer.pop_front()?;
      let reopened = match &state.producer_gate {
        Some(gate) if gate.raise() => Some(gate.clone()),
        _ => None,
      };
      (token, reopened)
    };
    if let Some(gate) = reopened {
      gate.submit();
    }
    Some(token)
  }

  /// Blocks until one token, the terminal signal, or timeout expiry.
  ///
  /// `Ok(Some(token))` for a delivery, `Ok(None)` for normal completion,
  /// `Err` for a terminal fault or [FlowError::Timeout].
  pub fn take(&self, timeout: Option<Duration>) -> Result<Option<T>, Fault> {
    enum TakeMsg<T> {
      Token(T),
      End,
      Fault(Fault),
    }

    struct TakePort<T> {
      tx: mpsc::SyncSender<TakeMsg<T>>,
    }

    impl<T: Send> Port<T> for TakePort<T> {
      fn accept(&self, token: T) -> Result<(), FlowError> {
        let _ = self.tx.try_send(TakeMsg::Token(token));
        Ok(())
      }

      fn fail(&self, fault: Fault) -> Result<(), FlowError> {
        let _ = self.tx.try_send(TakeMsg::Fault(fault));
        Ok(())
      }
    }

    impl<T: Send> StreamPort<T> for TakePort<T> {
      fn close(&self) -> Result<(), FlowError> {
        let _ = self.tx.try_send(TakeMsg::End);
        Ok(())
      }
    }

    let (tx, rx) = mpsc::sync_channel(1);
    let subscription = self.subscribe_port(Arc::new(TakePort { tx }), true);
    let message = match timeout {
      Some(timeout) => match rx.recv_timeout(timeout) {
        Ok(message) => message,
        Err(_) => {
          self.unsubscribe(subscription);
          return Err(Arc::new(FlowError::Timeout));
        }
      },
      None => match rx.recv() {
        Ok(message) => message,
        Err(_) => return Err(Arc::new(FlowError::Cancelled)),
      },
    };
    match message {
      TakeMsg::Token(token) => Ok(Some(token)),
      TakeMsg::End => Ok(None),
      TakeMsg::Fault(fault) => Err(fault),
    }
  }

  /// An async subscriber view yielding each delivered token.
  ///
  /// The stream requests one token per poll (a one-shot subscription at a
  /// time), ends on the terminal signal, and yields a terminal fault as the
  /// final `Err` item.
  pub fn stream(&self) -> ConduitStream<T> {
    ConduitStream {
      conduit: self.clone(),
      inbox: Arc::new(InboxPort {
        state: Mutex::new(InboxState {
          event: None,
          waker: None,
        }),
      }),
      pending: None,
      finished: false,
    }
  }
}

impl<T> Conduit<T> {
  /// Removes a subscriber from future fan-out. No-op if it already left or
  /// was never queued.
  pub fn unsubscribe(&self, subscription: Subscription) {
    let mut state = self.shared.lock();
    state.waiters.retain(|waiter| waiter.id != subscription.0);
  }

  pub fn is_done(&self) -> bool {
    self.shared.lock().done
  }

  /// Currently buffered token count.
  pub fn buffered(&self) -> usize {
    self.shared.lock().buffer.len()
  }
}

impl<T: Send + 'static> Port<T> for Conduit<T> {
  fn accept(&self, token: T) -> Result<(), FlowError> {
    self.produce(token)
  }

  /// An upstream failure is the conduit's terminal signal.
  fn fail(&self, fault: Fault) -> Result<(), FlowError> {
    Conduit::fail(self, fault)
  }
}

impl<T: Send + 'static> StreamPort<T> for Conduit<T> {
  fn close(&self) -> Result<(), FlowError> {
    self.complete()
  }
}

enum StreamEvent<T> {
  Token(T),
  End,
  Fault(Fault),
}

struct InboxState<T> {
  event: Option<StreamEvent<T>>,
  waker: Option<Waker>,
}

struct InboxPort<T> {
  state: Mutex<InboxState<T>>,
}

impl<T> InboxPort<T> {
  fn lock(&self) -> MutexGuard<'_, InboxState<T>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn push(&self, event: StreamEvent<T>) {
    let waker = {
      let mut state = self.lock();
      state.event = Some(event);
      state.waker.take()
    };
    if let Some(waker) = waker {
      waker.wake();
    }
  }
}

impl<T: Send> Port<T> for InboxPort<T> {
  fn accept(&self, token: T) -> Result<(), FlowError> {
    self.push(StreamEvent::Token(token));
    Ok(())
  }

  fn fail(&self, fault: Fault) -> Result<(), FlowError> {
    self.push(StreamEvent::Fault(fault));
    Ok(())
  }
}

impl<T: Send> StreamPort<T> for InboxPort<T> {
  fn close(&self) -> Result<(), FlowError> {
    self.push(StreamEvent::End);
    Ok(())
  }
}

/// See [Conduit::stream].
pub struct ConduitStream<T> {
  conduit: Conduit<T>,
  inbox: Arc<InboxPort<T>>,
  /// Outstanding one-shot subscription, if any.
  pending: Option<Subscription>,
  finished: bool,
}

impl<T: Send + 'static> Stream for ConduitStream<T> {
  type Item = Result<T, Fault>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.get_mut();
    if this.finished {
      return Poll::Ready(None);
    }
    {
      let mut inbox = this.inbox.lock();
      if let Some(event) = inbox.event.take() {
        this.pending = None;
        return match event {
          StreamEvent::Token(token) => Poll::Ready(Some(Ok(token))),
          StreamEvent::End => {
            this.finished = true;
            Poll::Ready(None)
          }
          StreamEvent::Fault(fault) => {
            this.finished = true;
            Poll::Ready(Some(Err(fault)))
          }
        };
      }
      inbox.waker = Some(cx.waker().clone());
    }
    if this.pending.is_none() {
      let port: Arc<dyn StreamPort<T>> = this.inbox.clone();
      this.pending = Some(this.conduit.subscribe_port(port, true));
    }
    Poll::Pending
  }
}

impl<T> Drop for ConduitStream<T> {
  fn drop(&mut self) {
    if let Some(subscription) = self.pending.take() {
      self.conduit.unsubscribe(subscription);
    }
  }
}
