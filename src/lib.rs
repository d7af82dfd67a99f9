//! # tokenweave
//!
//! Gated dataflow nodes and token connectors for in-process async pipelines.
//!
//! ## Architecture
//!
//! A [Node] owns a set of readiness gates and a body; the body is handed to
//! an [Executor] exactly once per activation, as soon as the last blocking
//! gate clears. Tokens arrive through connectors:
//!
//! - [Slot]: one token per activation cycle (the standard node argument)
//! - [Permit]: counting credit gate for admission control
//! - [Promise]: one-shot multicast result, awaitable and blockable
//! - [Conduit]: bounded multi-producer/multi-subscriber pipe with
//!   producer-gate backpressure
//!
//! [Actor] re-arms after each run; [AllOf]/[AnyOf] join and race promises;
//! [FuncNode]/[BiFuncNode] wrap plain closures as one-shot nodes.

pub mod combine;
pub mod conduit;
#[cfg(test)]
mod conduit_test;
pub mod error;
pub mod executor;
pub mod func;
pub mod node;
pub mod port;
pub mod promise;
#[cfg(test)]
mod promise_test;

pub use combine::{AllOf, AnyOf};
pub use conduit::{Conduit, ConduitStream, DEFAULT_CAPACITY, Subscription};
pub use error::{BodyPanic, Fault, FlowError, Outcome, fault};
pub use executor::{Executor, InlineExecutor, Task, TokioExecutor, default_executor};
pub use func::{BiFuncNode, FuncNode};
pub use node::{Actor, Gate, Node, Permit, QueueSlot, Slot};
pub use port::{Port, StreamPort};
pub use promise::{Promise, PromiseFuture};
