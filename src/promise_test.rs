//! Tests for `Promise`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{FlowError, Outcome, fault};
use crate::executor::InlineExecutor;
use crate::node::Node;
use crate::promise::Promise;

#[test]
fn first_resolution_wins_and_later_calls_report_no_transition() {
  let promise = Promise::new();
  assert!(promise.complete(1));
  assert!(!promise.complete(2));
  assert!(!promise.fail(fault(std::io::Error::other("late"))));
  assert!(!promise.cancel());
  assert!(matches!(promise.peek(), Some(Outcome::Value(1))));
}

#[test]
fn observers_attached_before_resolution_fire_once_in_attachment_order() {
  let promise = Promise::new();
  let order = Arc::new(Mutex::new(Vec::new()));
  for tag in ["first", "second", "third"] {
    let order = Arc::clone(&order);
    promise.subscribe(move |outcome| {
      assert!(outcome.is_value());
      order.lock().unwrap().push(tag);
    });
  }
  promise.complete(9);
  assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
}

#[test]
fn observers_attached_after_resolution_fire_synchronously() {
  let promise = Promise::resolved(5);
  let seen = Arc::new(Mutex::new(None));
  promise.subscribe({
    let seen = Arc::clone(&seen);
    move |outcome| {
      if let Outcome::Value(v) = outcome {
        *seen.lock().unwrap() = Some(v);
      }
    }
  });
  assert_eq!(*seen.lock().unwrap(), Some(5));
}

#[test]
fn get_re_raises_a_stored_fault() {
  let promise: Promise<i32> = Promise::new();
  promise.fail(fault(std::io::Error::other("upstream died")));
  let error = promise.get().unwrap_err();
  assert_eq!(error.to_string(), "upstream died");
}

#[test]
fn get_on_a_cancelled_promise_reports_cancellation() {
  let promise: Promise<i32> = Promise::new();
  promise.cancel();
  let error = promise.get().unwrap_err();
  assert!(matches!(
    error.downcast_ref::<FlowError>(),
    Some(FlowError::Cancelled)
  ));
}

#[test]
fn get_timeout_expires_on_a_pending_promise() {
  let promise: Promise<i32> = Promise::new();
  let error = promise.get_timeout(Duration::from_millis(20)).unwrap_err();
  assert!(matches!(
    error.downcast_ref::<FlowError>(),
    Some(FlowError::Timeout)
  ));
}

#[test]
fn get_blocks_until_another_thread_resolves() {
  let promise: Promise<i32> = Promise::new();
  let remote = promise.clone();
  let handle = std::thread::spawn(move || {
    std::thread::sleep(Duration::from_millis(10));
    remote.complete(77);
  });
  assert_eq!(promise.get_timeout(Duration::from_secs(1)).unwrap(), 77);
  handle.join().unwrap();
}

#[test]
fn feed_wires_an_outcome_into_a_slot() {
  let node = Node::with_executor(Arc::new(InlineExecutor));
  let input = node.slot::<i32>().unwrap();
  let promise = Promise::new();
  promise.feed(input.clone());
  assert!(!input.is_filled());
  promise.complete(11);
  assert_eq!(input.read().unwrap(), 11);
}

#[test]
fn feed_forwards_a_fault_verbatim() {
  let node = Node::with_executor(Arc::new(InlineExecutor));
  let input = node.slot::<i32>().unwrap();
  let promise: Promise<i32> = Promise::new();
  promise.feed(input.clone());
  promise.fail(fault(std::io::Error::other("socket reset")));
  assert_eq!(input.read().unwrap_err().to_string(), "socket reset");
}

#[tokio::test]
async fn wait_resolves_the_future_with_the_outcome() {
  let promise = Promise::new();
  let remote = promise.clone();
  std::thread::spawn(move || {
    std::thread::sleep(Duration::from_millis(10));
    remote.complete(42);
  });
  match promise.wait().await {
    Outcome::Value(v) => assert_eq!(v, 42),
    other => panic!("expected value, got {other:?}"),
  }
}

#[tokio::test]
async fn wait_on_a_resolved_promise_is_immediate() {
  let promise = Promise::resolved("done".to_string());
  match promise.wait().await {
    Outcome::Value(v) => assert_eq!(v, "done"),
    other => panic!("expected value, got {other:?}"),
  }
}
