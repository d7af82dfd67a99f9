//! Tests for `Conduit`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use proptest::prelude::*;

use crate::conduit::Conduit;
use crate::error::{Fault, FlowError, fault};
use crate::port::{Port, StreamPort};

/// Recording subscriber used across these tests.
#[derive(Clone)]
struct Collector {
  items: Arc<Mutex<Vec<i32>>>,
  closed: Arc<AtomicBool>,
  fault: Arc<Mutex<Option<Fault>>>,
}

impl Collector {
  fn new() -> Self {
    Collector {
      items: Arc::new(Mutex::new(Vec::new())),
      closed: Arc::new(AtomicBool::new(false)),
      fault: Arc::new(Mutex::new(None)),
    }
  }

  fn items(&self) -> Vec<i32> {
    self.items.lock().unwrap().clone()
  }

  fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }
}

impl Port<i32> for Collector {
  fn accept(&self, token: i32) -> Result<(), FlowError> {
    self.items.lock().unwrap().push(token);
    Ok(())
  }

  fn fail(&self, fault: Fault) -> Result<(), FlowError> {
    *self.fault.lock().unwrap() = Some(fault);
    Ok(())
  }
}

impl StreamPort<i32> for Collector {
  fn close(&self) -> Result<(), FlowError> {
    self.closed.store(true, Ordering::SeqCst);
    Ok(())
  }
}

#[test]
fn tokens_buffer_in_order_without_a_subscriber() {
  let conduit = Conduit::<i32>::new(4).unwrap();
  conduit.produce(1).unwrap();
  conduit.produce(2).unwrap();
  conduit.produce(3).unwrap();
  assert_eq!(conduit.buffered(), 3);
  assert_eq!(conduit.poll(), Some(1));
  assert_eq!(conduit.poll(), Some(2));
  assert_eq!(conduit.poll(), Some(3));
  assert_eq!(conduit.poll(), None);
}

#[test]
fn default_capacity_buffers_sixteen_tokens() {
  let conduit = Conduit::<i32>::with_default_capacity();
  for token in 0..16 {
    conduit.produce(token).unwrap();
  }
  assert!(matches!(
    conduit.produce(16),
    Err(FlowError::InvalidState(_))
  ));
}

#[test]
fn zero_capacity_is_rejected() {
  assert!(matches!(
    Conduit::<i32>::new(0),
    Err(FlowError::InvalidArgument(_))
  ));
}

#[test]
fn overflow_without_a_producer_gate_is_a_contract_violation() {
  let conduit = Conduit::<i32>::new(1).unwrap();
  conduit.produce(1).unwrap();
  assert!(matches!(
    conduit.produce(2),
    Err(FlowError::InvalidState(_))
  ));
}

#[test]
fn produce_after_terminal_is_rejected() {
  let conduit = Conduit::<i32>::new(2).unwrap();
  conduit.complete().unwrap();
  assert!(matches!(
    conduit.produce(1),
    Err(FlowError::InvalidState(_))
  ));
  assert!(matches!(
    conduit.complete(),
    Err(FlowError::InvalidState(_))
  ));
}

#[test]
fn a_waiting_subscriber_gets_tokens_directly() {
  let conduit = Conduit::<i32>::new(2).unwrap();
  let collector = Collector::new();
  conduit.subscribe(collector.clone());
  conduit.produce(5).unwrap();
  conduit.produce(6).unwrap();
  assert_eq!(collector.items(), vec![5, 6]);
  assert_eq!(conduit.buffered(), 0);
}

#[test]
fn fan_out_is_round_robin_across_subscribers() {
  let conduit = Conduit::<i32>::new(2).unwrap();
  let left = Collector::new();
  let right = Collector::new();
  conduit.subscribe(left.clone());
  conduit.subscribe(right.clone());
  for token in 1..=4 {
    conduit.produce(token).unwrap();
  }
  assert_eq!(left.items(), vec![1, 3]);
  assert_eq!(right.items(), vec![2, 4]);
}

#[test]
fn a_new_subscriber_drains_buffered_tokens_in_fifo_order() {
  let conduit = Conduit::<i32>::new(4).unwrap();
  conduit.produce(1).unwrap();
  conduit.produce(2).unwrap();
  let collector = Collector::new();
  conduit.subscribe(collector.clone());
  assert_eq!(collector.items(), vec![1, 2]);
  // drained and now in rotation: the next token is a direct handoff
  conduit.produce(3).unwrap();
  assert_eq!(collector.items(), vec![1, 2, 3]);
}

#[test]
fn unsubscribe_removes_a_port_from_fan_out() {
  let conduit = Conduit::<i32>::new(2).unwrap();
  let left = Collector::new();
  let right = Collector::new();
  let subscription = conduit.subscribe(left.clone());
  conduit.subscribe(right.clone());
  conduit.unsubscribe(subscription);
  conduit.produce(1).unwrap();
  conduit.produce(2).unwrap();
  assert!(left.items().is_empty());
  assert_eq!(right.items(), vec![1, 2]);
}

#[test]
fn terminal_completion_drains_waiting_subscribers() {
  let conduit = Conduit::<i32>::new(2).unwrap();
  let collector = Collector::new();
  conduit.subscribe(collector.clone());
  conduit.complete().unwrap();
  assert!(collector.is_closed());

  // late subscribers get the signal immediately
  let late = Collector::new();
  conduit.subscribe(late.clone());
  assert!(late.is_closed());
}

#[test]
fn terminal_fault_reaches_every_subscriber_verbatim() {
  let conduit = Conduit::<i32>::new(2).unwrap();
  let collector = Collector::new();
  conduit.subscribe(collector.clone());
  conduit.fail(fault(std::io::Error::other("feed lost"))).unwrap();
  assert_eq!(
    collector.fault.lock().unwrap().as_ref().unwrap().to_string(),
    "feed lost"
  );
}

#[test]
fn buffered_tokens_outlive_the_terminal_signal() {
  let conduit = Conduit::<i32>::new(4).unwrap();
  conduit.produce(1).unwrap();
  conduit.produce(2).unwrap();
  conduit.complete().unwrap();
  let collector = Collector::new();
  conduit.subscribe(collector.clone());
  assert_eq!(collector.items(), vec![1, 2]);
  assert!(collector.is_closed());
}

#[test]
fn take_pops_a_buffered_token_or_times_out() {
  let conduit = Conduit::<i32>::new(2).unwrap();
  conduit.produce(9).unwrap();
  assert_eq!(
    conduit.take(Some(Duration::from_millis(50))).unwrap(),
    Some(9)
  );
  let error = conduit
    .take(Some(Duration::from_millis(20)))
    .unwrap_err();
  assert!(matches!(
    error.downcast_ref::<FlowError>(),
    Some(FlowError::Timeout)
  ));
}

#[test]
fn take_sees_normal_completion_as_end_of_stream() {
  let conduit = Conduit::<i32>::new(2).unwrap();
  conduit.complete().unwrap();
  assert_eq!(
    conduit.take(Some(Duration::from_millis(50))).unwrap(),
    None
  );
}

#[test]
fn take_blocks_until_a_producer_thread_delivers() {
  let conduit = Conduit::<i32>::new(2).unwrap();
  let remote = conduit.clone();
  let handle = std::thread::spawn(move || {
    std::thread::sleep(Duration::from_millis(10));
    remote.produce(3).unwrap();
  });
  assert_eq!(
    conduit.take(Some(Duration::from_secs(1))).unwrap(),
    Some(3)
  );
  handle.join().unwrap();
}

#[tokio::test]
async fn stream_yields_tokens_then_ends_on_completion() {
  let conduit = Conduit::<i32>::new(4).unwrap();
  conduit.produce(1).unwrap();
  conduit.produce(2).unwrap();
  conduit.complete().unwrap();
  let mut stream = conduit.stream();
  assert_eq!(stream.next().await.unwrap().unwrap(), 1);
  assert_eq!(stream.next().await.unwrap().unwrap(), 2);
  assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn stream_surfaces_a_terminal_fault_as_the_final_item() {
  let conduit = Conduit::<i32>::new(4).unwrap();
  conduit.produce(1).unwrap();
  conduit.fail(fault(std::io::Error::other("wire cut"))).unwrap();
  let mut stream = conduit.stream();
  assert_eq!(stream.next().await.unwrap().unwrap(), 1);
  let error = stream.next().await.unwrap().unwrap_err();
  assert_eq!(error.to_string(), "wire cut");
  assert!(stream.next().await.is_none());
}

proptest! {
  /// Any interleaving of produce and poll behaves like a FIFO of the
  /// conduit's capacity: accepted exactly while below capacity, delivered
  /// exactly once, in order.
  #[test]
  fn produce_poll_interleavings_match_a_fifo_model(
    ops in proptest::collection::vec(any::<bool>(), 1..64)
  ) {
    let capacity = 4;
    let conduit = Conduit::<u32>::new(capacity).unwrap();
    let mut model: VecDeque<u32> = VecDeque::new();
    let mut next = 0u32;
    for is_produce in ops {
      if is_produce {
        let produced = conduit.produce(next);
        if model.len() < capacity {
          prop_assert!(produced.is_ok());
          model.push_back(next);
        } else {
          prop_assert!(produced.is_err());
        }
        next += 1;
      } else {
        prop_assert_eq!(conduit.poll(), model.pop_front());
      }
    }
    prop_assert_eq!(conduit.buffered(), model.len());
  }
}
