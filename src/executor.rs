//! Pluggable task executor collaborator.
//!
//! The activation core never runs a node body itself: a ready node is handed
//! to an [Executor] as a boxed runnable. Executors may run it inline or on a
//! pool; the engine only requires that the task eventually runs.

use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::trace;

/// A unit of work handed to an executor.
pub type Task = Box<dyn FnOnce() + Send>;

/// Executor collaborator: must eventually invoke the task.
pub trait Executor: Send + Sync {
  fn submit(&self, task: Task);
}

/// Runs tasks immediately on the calling thread.
///
/// Keep direct activation chains short: every chained firing adds a stack
/// frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
  fn submit(&self, task: Task) {
    task();
  }
}

/// Dispatches tasks onto a tokio runtime's blocking pool.
///
/// Node bodies are plain synchronous callables, so they go through
/// `spawn_blocking` rather than occupying an async worker thread.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
  handle: tokio::runtime::Handle,
}

impl TokioExecutor {
  pub fn new(handle: tokio::runtime::Handle) -> Self {
    Self { handle }
  }
}

impl Executor for TokioExecutor {
  fn submit(&self, task: Task) {
    let _ = self.handle.spawn_blocking(task);
  }
}

struct DefaultRuntime {
  /// Kept alive for the life of the process; torn down never.
  _runtime: tokio::runtime::Runtime,
  executor: Arc<dyn Executor>,
}

static DEFAULT: Lazy<DefaultRuntime> = Lazy::new(|| {
  let runtime = tokio::runtime::Builder::new_multi_thread()
    .thread_name("tokenweave-exec")
    .build()
    .expect("default tokenweave runtime");
  let executor: Arc<dyn Executor> = Arc::new(TokioExecutor::new(runtime.handle().clone()));
  trace!("default executor runtime created");
  DefaultRuntime {
    _runtime: runtime,
    executor,
  }
});

/// Process-wide default executor, created lazily on first use.
///
/// Nodes constructed without an explicit executor fall back to this one.
pub fn default_executor() -> Arc<dyn Executor> {
  Arc::clone(&DEFAULT.executor)
}
