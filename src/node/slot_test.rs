//! Tests for `Slot`.

use std::sync::{Arc, Mutex};

use crate::error::{FlowError, fault};
use crate::executor::InlineExecutor;
use crate::node::Node;
use crate::port::StreamPort;

#[test]
fn accept_fills_the_slot_and_fires_the_node() {
  let node = Node::with_executor(Arc::new(InlineExecutor));
  let input = node.slot::<i32>().unwrap();
  let seen = Arc::new(Mutex::new(None));
  node
    .set_body({
      let input = input.clone();
      let seen = Arc::clone(&seen);
      move || {
        *seen.lock().unwrap() = Some(input.read()?);
        Ok(())
      }
    })
    .unwrap();
  node.start().unwrap();
  input.accept(42).unwrap();
  assert_eq!(*seen.lock().unwrap(), Some(42));
}

#[test]
fn second_fill_is_a_contract_violation_not_an_overwrite() {
  let node = Node::with_executor(Arc::new(InlineExecutor));
  let input = node.slot::<i32>().unwrap();
  input.accept(1).unwrap();
  assert!(matches!(
    input.accept(2),
    Err(FlowError::InvalidState(_))
  ));
  assert!(matches!(
    input.fail(fault(std::io::Error::other("late"))),
    Err(FlowError::InvalidState(_))
  ));
  assert_eq!(input.read().unwrap(), 1);
}

#[test]
fn fill_after_fail_is_rejected_too() {
  let node = Node::with_executor(Arc::new(InlineExecutor));
  let input = node.slot::<i32>().unwrap();
  input.fail(fault(std::io::Error::other("upstream"))).unwrap();
  assert!(matches!(
    input.accept(1),
    Err(FlowError::InvalidState(_))
  ));
}

#[test]
fn a_stored_fault_clears_the_gate_and_read_re_raises_it() {
  let node = Node::with_executor(Arc::new(InlineExecutor));
  let input = node.slot::<i32>().unwrap();
  let observed = Arc::new(Mutex::new(None));
  node
    .set_body({
      let input = input.clone();
      let observed = Arc::clone(&observed);
      move || {
        // the body, not the engine, decides what an upstream failure means
        *observed.lock().unwrap() = Some(input.read().unwrap_err().to_string());
        Ok(())
      }
    })
    .unwrap();
  node.start().unwrap();
  input.fail(fault(std::io::Error::other("upstream broke"))).unwrap();
  assert_eq!(
    observed.lock().unwrap().as_deref(),
    Some("upstream broke")
  );
}

#[test]
fn read_on_an_empty_slot_is_a_fault() {
  let node = Node::with_executor(Arc::new(InlineExecutor));
  let input = node.slot::<i32>().unwrap();
  let error = input.read().unwrap_err();
  assert!(error.to_string().contains("empty"));
}

#[test]
fn purge_clears_the_token_and_re_blocks_the_gate() {
  let node = Node::with_executor(Arc::new(InlineExecutor));
  let input = node.slot::<i32>().unwrap();
  input.accept(7).unwrap();
  assert!(input.is_filled());
  assert!(!input.is_blocked());
  input.purge();
  assert!(!input.is_filled());
  assert!(input.is_blocked());
  input.accept(8).unwrap();
  assert_eq!(input.read().unwrap(), 8);
}

#[test]
fn sticky_slot_keeps_its_token_across_purges() {
  let node = Node::with_executor(Arc::new(InlineExecutor));
  let config = node.const_slot::<String>().unwrap();
  config.accept("scale=2".to_string()).unwrap();
  config.purge();
  assert!(config.is_filled());
  assert_eq!(config.read().unwrap(), "scale=2");
}

#[test]
fn close_on_an_empty_slot_fires_the_node_without_a_token() {
  let node = Node::with_executor(Arc::new(InlineExecutor));
  let input = node.slot::<i32>().unwrap();
  let ran = Arc::new(Mutex::new(false));
  node
    .set_body({
      let input = input.clone();
      let ran = Arc::clone(&ran);
      move || {
        assert!(input.read().is_err());
        *ran.lock().unwrap() = true;
        Ok(())
      }
    })
    .unwrap();
  node.start().unwrap();
  input.close().unwrap();
  assert!(*ran.lock().unwrap());
}
