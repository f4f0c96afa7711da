//! Private serial execution contexts.
//!
//! An [`ExecutionContext`] owns a piece of mutable state on a dedicated
//! thread and processes tasks against it strictly one at a time. It is the
//! only place the state is ever touched, so callers on any thread can drive
//! it without locks of their own.
//!
//! # Reentrancy
//!
//! [`run_serialized`](ExecutionContext::run_serialized) follows a single rule:
//!
//! - Called from outside the worker: the task is queued and the call returns
//!   immediately.
//! - Called from inside the worker while the state is free: the task runs
//!   inline, before `run_serialized` returns, preserving call-stack order.
//!
//! Callbacks that user code supplies (connect completions, for instance) are
//! returned by the state through [`SerialState::drain_deferred`] and run on
//! the worker after the state borrow is released. From there they may call
//! back into the context and take the inline path.
//!
//! # Example
//!
//! ```no_run
//! use horizon_socket_core::context::{ExecutionContext, SerialState};
//!
//! #[derive(Default)]
//! struct Counter {
//!     value: u64,
//! }
//!
//! impl SerialState for Counter {}
//!
//! let context = ExecutionContext::new("counter", |_weak| Counter::default())?;
//!
//! for _ in 0..10 {
//!     context.run_serialized(|counter| counter.value += 1);
//! }
//! # Ok::<(), horizon_socket_core::CoreError>(())
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::affinity::WorkerToken;
use crate::error::{CoreError, Result};
use crate::logging::targets;

/// A type-erased unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

type StateTask<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

/// State owned by an [`ExecutionContext`].
pub trait SerialState: Send + 'static {
    /// Hand back callbacks that must run on the worker once the state is
    /// no longer borrowed.
    ///
    /// Called after every task. The default has nothing to defer.
    fn drain_deferred(&mut self) -> Vec<Task> {
        Vec::new()
    }
}

impl SerialState for () {}

/// Configuration for creating an execution context.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Name for the worker thread.
    pub name: String,
    /// Stack size for the worker thread in bytes. `None` uses the default.
    pub stack_size: Option<usize>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            name: "horizon-serial".to_string(),
            stack_size: None,
        }
    }
}

impl ContextConfig {
    /// Create a new configuration with the given thread name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the stack size for the worker thread.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }
}

/// State shared between the context handles and the worker thread.
struct Shared<S> {
    state: Mutex<S>,
    token: WorkerToken,
    pending_tasks: AtomicUsize,
    running: AtomicBool,
}

impl<S: SerialState> Shared<S> {
    /// Run one task against the state, then its deferred callbacks.
    fn execute(&self, task: StateTask<S>) {
        let deferred = {
            let mut state = self.state.lock();
            task(&mut state);
            state.drain_deferred()
        };
        run_deferred(deferred);
    }
}

/// The owning half. Dropping the last one closes the queue.
struct Inner<S> {
    sender: Sender<StateTask<S>>,
    shared: Arc<Shared<S>>,
}

impl<S: SerialState> Inner<S> {
    fn run_serialized(&self, task: StateTask<S>) {
        if self.shared.token.is_current()
            && let Some(mut state) = self.shared.state.try_lock()
        {
            task(&mut state);
            let deferred = state.drain_deferred();
            drop(state);
            run_deferred(deferred);
            return;
        }

        // Either a foreign thread, or the running task still holds the state:
        // in both cases the task goes behind whatever is already queued.
        self.shared.pending_tasks.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(task).is_err() {
            self.shared.pending_tasks.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!(
                target: targets::CONTEXT,
                worker = self.shared.token.id(),
                "task dropped, worker has stopped"
            );
        }
    }
}

/// A private serial worker owning state of type `S`.
///
/// Handles are cheap to clone. The worker thread stops once every
/// `ExecutionContext` handle has been dropped and the queue is drained; the
/// state is dropped on the worker thread at that point. [`WeakContext`]
/// handles do not keep the worker alive.
pub struct ExecutionContext<S: SerialState> {
    inner: Arc<Inner<S>>,
}

impl<S: SerialState> Clone for ExecutionContext<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: SerialState> ExecutionContext<S> {
    /// Create a context with a named worker thread.
    ///
    /// `init` builds the state and receives a weak handle to the context so
    /// the state can schedule work on itself.
    pub fn new<F>(name: impl Into<String>, init: F) -> Result<Self>
    where
        F: FnOnce(WeakContext<S>) -> S,
    {
        Self::with_config(ContextConfig::with_name(name), init)
    }

    /// Create a context with custom configuration.
    pub fn with_config<F>(config: ContextConfig, init: F) -> Result<Self>
    where
        F: FnOnce(WeakContext<S>) -> S,
    {
        let (sender, receiver) = unbounded();

        let inner = Arc::new_cyclic(|weak: &Weak<Inner<S>>| {
            let state = init(WeakContext {
                inner: weak.clone(),
            });
            Inner {
                sender,
                shared: Arc::new(Shared {
                    state: Mutex::new(state),
                    token: WorkerToken::new(),
                    pending_tasks: AtomicUsize::new(0),
                    running: AtomicBool::new(true),
                }),
            }
        });

        let mut builder = thread::Builder::new().name(config.name.clone());
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let shared = inner.shared.clone();
        // Detached: the worker ends on its own once the queue closes.
        builder
            .spawn(move || worker_loop(receiver, shared))
            .map_err(|e| CoreError::ThreadSpawn(e.to_string()))?;

        tracing::debug!(
            target: targets::CONTEXT,
            worker = inner.shared.token.id(),
            name = %config.name,
            "execution context started"
        );

        Ok(Self { inner })
    }

    /// Run `task` against the state, inline if already on the worker,
    /// otherwise asynchronously. Never blocks.
    pub fn run_serialized<F>(&self, task: F)
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.inner.run_serialized(Box::new(task));
    }

    /// Check if the calling thread is this context's worker.
    #[inline]
    pub fn is_current(&self) -> bool {
        self.inner.shared.token.is_current()
    }

    /// The identity token of this context's worker.
    pub fn token(&self) -> WorkerToken {
        self.inner.shared.token
    }

    /// Number of tasks queued but not yet executed.
    pub fn pending_tasks(&self) -> usize {
        self.inner.shared.pending_tasks.load(Ordering::Acquire)
    }

    /// Check if the worker thread is still processing tasks.
    pub fn is_running(&self) -> bool {
        self.inner.shared.running.load(Ordering::Acquire)
    }

    /// Create a weak handle that does not keep the worker alive.
    pub fn downgrade(&self) -> WeakContext<S> {
        WeakContext {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<S: SerialState> std::fmt::Debug for ExecutionContext<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("worker", &self.inner.shared.token.id())
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}

/// Non-owning handle to an [`ExecutionContext`].
///
/// Transport tasks and timers hold this so they never extend the lifetime of
/// the state they report to.
pub struct WeakContext<S: SerialState> {
    inner: Weak<Inner<S>>,
}

impl<S: SerialState> Clone for WeakContext<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: SerialState> WeakContext<S> {
    /// Same as [`ExecutionContext::run_serialized`].
    ///
    /// Returns `false` if the context is gone and the task was dropped.
    pub fn run_serialized<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        match self.inner.upgrade() {
            Some(inner) => {
                inner.run_serialized(Box::new(task));
                true
            }
            None => false,
        }
    }

    /// Upgrade to an owning handle if the context is still alive.
    pub fn upgrade(&self) -> Option<ExecutionContext<S>> {
        self.inner.upgrade().map(|inner| ExecutionContext { inner })
    }

    /// Check if the calling thread is this context's worker.
    pub fn is_current(&self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.shared.token.is_current())
    }
}

impl<S: SerialState> std::fmt::Debug for WeakContext<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakContext")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

static_assertions::assert_impl_all!(ExecutionContext<()>: Send, Sync);
static_assertions::assert_impl_all!(WeakContext<()>: Send, Sync);

/// The worker loop. Exits once every sender is gone and the queue is empty.
fn worker_loop<S: SerialState>(receiver: Receiver<StateTask<S>>, shared: Arc<Shared<S>>) {
    let _scope = shared.token.enter();

    for task in receiver.iter() {
        shared.execute(task);
        shared.pending_tasks.fetch_sub(1, Ordering::AcqRel);
    }

    shared.running.store(false, Ordering::Release);
    tracing::debug!(
        target: targets::CONTEXT,
        worker = shared.token.id(),
        "execution context stopped"
    );
}

/// Run deferred callbacks, isolating panics so the worker survives them.
fn run_deferred(deferred: Vec<Task>) {
    for callback in deferred {
        if catch_unwind(AssertUnwindSafe(callback)).is_err() {
            tracing::error!(target: targets::CONTEXT, "deferred callback panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        order: Vec<i32>,
        deferred: Vec<Task>,
        weak: Option<WeakContext<Recorder>>,
    }

    impl SerialState for Recorder {
        fn drain_deferred(&mut self) -> Vec<Task> {
            std::mem::take(&mut self.deferred)
        }
    }

    fn recorder_context() -> ExecutionContext<Recorder> {
        ExecutionContext::new("test-serial", |weak| Recorder {
            weak: Some(weak),
            ..Default::default()
        })
        .unwrap()
    }

    fn wait_idle<S: SerialState>(context: &ExecutionContext<S>) {
        for _ in 0..100 {
            if context.pending_tasks() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn snapshot(context: &ExecutionContext<Recorder>) -> Vec<i32> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        context.run_serialized(move |state| {
            let _ = tx.send(state.order.clone());
        });
        rx.recv_timeout(Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_sequential_processing() {
        let context = recorder_context();
        for i in 0..10 {
            context.run_serialized(move |state| state.order.push(i));
        }
        assert_eq!(snapshot(&context), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_not_current_from_caller_thread() {
        let context = recorder_context();
        assert!(!context.is_current());

        let (tx, rx) = crossbeam_channel::bounded(1);
        let inner = context.clone();
        context.run_serialized(move |_| {
            let _ = tx.send(inner.is_current());
        });
        assert!(rx.recv_timeout(Duration::from_secs(1)).unwrap());
    }

    #[test]
    fn test_deferred_callback_reenters_inline() {
        let context = recorder_context();

        context.run_serialized(|state| {
            state.order.push(1);
            let weak = state.weak.clone().unwrap();
            state.deferred.push(Box::new(move || {
                // The state is free again, so this runs before the push of 3.
                weak.run_serialized(|state| state.order.push(2));
            }));
        });
        context.run_serialized(|state| state.order.push(3));

        assert_eq!(snapshot(&context), vec![1, 2, 3]);
    }

    #[test]
    fn test_reentry_while_borrowed_is_queued() {
        let context = recorder_context();

        context.run_serialized(|state| {
            let weak = state.weak.clone().unwrap();
            // The running task still holds the state: this must queue
            // behind the current task instead of deadlocking.
            weak.run_serialized(|state| state.order.push(2));
            state.order.push(1);
        });

        wait_idle(&context);
        assert_eq!(snapshot(&context), vec![1, 2]);
    }

    #[test]
    fn test_multiple_senders() {
        let context = recorder_context();
        let counter = Arc::new(AtomicI32::new(0));

        let mut handles = vec![];
        for _ in 0..5 {
            let c = context.clone();
            let counter = counter.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..10 {
                    let counter = counter.clone();
                    c.run_serialized(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    });
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        wait_idle(&context);
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_weak_handle_after_drop() {
        let context = recorder_context();
        let weak = context.downgrade();
        assert!(weak.upgrade().is_some());

        drop(context);
        assert!(weak.upgrade().is_none());
        assert!(!weak.run_serialized(|state| state.order.push(1)));
    }

    #[test]
    fn test_worker_stops_after_last_handle() {
        let context = recorder_context();
        let observer = context.clone();
        let shared = observer.inner.shared.clone();
        drop(context);
        drop(observer);

        for _ in 0..100 {
            if !shared.running.load(Ordering::Acquire) {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!shared.running.load(Ordering::Acquire));
    }

    #[test]
    fn test_deferred_panic_does_not_kill_worker() {
        let context = recorder_context();
        context.run_serialized(|state| {
            state.deferred.push(Box::new(|| panic!("callback failure")));
        });
        context.run_serialized(|state| state.order.push(7));
        assert_eq!(snapshot(&context), vec![7]);
        assert!(context.is_running());
    }
}
