//! Serialized execution contexts.
//!
//! A context applies an engine's mutations in one total order regardless of
//! the thread a change notification arrives on. The engine has no thread of
//! its own: the default context runs each mutation inline on the notifying
//! thread, under the engine's mutation lock.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// A mutation task routed through a context.
pub type Task = Box<dyn FnOnce() + Send>;

/// Applies mutations of one engine instance in a single serialized order.
pub trait ExecutionContext: Send + Sync {
    /// Runs or enqueues one mutation.
    fn execute(&self, task: Task);
}

/// Runs every mutation immediately on the calling thread.
#[derive(Default)]
pub struct InlineContext;

impl ExecutionContext for InlineContext {
    fn execute(&self, task: Task) {
        task();
    }
}

/// Queues mutations for explicit draining.
///
/// Stands in for an event-loop context: callers decide when the queued
/// mutations are applied, and the queue order is the application order.
#[derive(Default)]
pub struct QueueContext {
    queue: Mutex<VecDeque<Task>>,
}

impl QueueContext {
    /// Creates an empty queue context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued mutations.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Applies every queued mutation in order.
    pub fn run_pending(&self) {
        loop {
            let task = self.queue.lock().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }
}

impl ExecutionContext for QueueContext {
    fn execute(&self, task: Task) {
        self.queue.lock().push_back(task);
    }
}
