//! Executors for delivering callbacks off the serial worker.
//!
//! Observer notifications and send completions never run on a socket's own
//! execution context. They are handed to an [`Executor`] instead:
//!
//! - [`SerialQueue`]: a dedicated thread running tasks in FIFO order.
//! - [`SerialQueue::shared`]: the process-wide default delegate queue.
//! - [`tokio::runtime::Handle`]: tasks run on the runtime's blocking pool,
//!   with no ordering guarantee between them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;

use crate::completion;
use crate::context::Task;
use crate::error::{CoreError, Result};
use crate::logging::targets;

/// Something that runs type-erased tasks, possibly on another thread.
pub trait Executor: Send + Sync + 'static {
    /// Schedule `task` for execution. Must not run it on the caller's stack
    /// unless the executor documents otherwise.
    fn execute(&self, task: Task);
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, task: Task) {
        (**self).execute(task);
    }
}

impl Executor for tokio::runtime::Handle {
    fn execute(&self, task: Task) {
        // Callbacks are synchronous user code; keep them off the async workers.
        drop(self.spawn_blocking(task));
    }
}

static SHARED_QUEUE: OnceLock<Arc<SerialQueue>> = OnceLock::new();
static SHARED_QUEUE_INIT: Mutex<()> = Mutex::new(());

/// A FIFO executor backed by one dedicated thread.
///
/// The thread exits once the queue has been dropped and every task queued
/// before that has run.
pub struct SerialQueue {
    sender: Sender<Task>,
    name: String,
    pending: Arc<AtomicUsize>,
}

impl SerialQueue {
    /// Spawn a new queue with a named thread.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = unbounded::<Task>();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_pending = pending.clone();
        let worker_name = name.clone();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                for task in receiver.iter() {
                    worker_pending.fetch_sub(1, Ordering::AcqRel);
                    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)).is_err() {
                        tracing::error!(
                            target: targets::EXECUTOR,
                            queue = %worker_name,
                            "queued task panicked"
                        );
                    }
                }
                tracing::trace!(target: targets::EXECUTOR, queue = %worker_name, "queue drained");
            })
            .map_err(|e| CoreError::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            sender,
            name,
            pending,
        })
    }

    /// The process-wide default delegate queue.
    ///
    /// Created on first use and never torn down.
    pub fn shared() -> Result<Arc<SerialQueue>> {
        if let Some(queue) = SHARED_QUEUE.get() {
            return Ok(queue.clone());
        }

        let _guard = SHARED_QUEUE_INIT.lock();
        if let Some(queue) = SHARED_QUEUE.get() {
            return Ok(queue.clone());
        }
        let queue = Arc::new(SerialQueue::new("horizon-socket-delegate")?);
        Ok(SHARED_QUEUE.get_or_init(|| queue).clone())
    }

    /// The queue's thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of tasks queued but not yet started.
    pub fn pending_tasks(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Block until every task queued before this call has run.
    ///
    /// Returns `false` if `timeout` elapsed first. Calling this from a task
    /// on the same queue always times out.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let (resolver, waiter) = completion::pair::<()>();
        self.execute(Box::new(move || resolver.resolve(())));
        waiter.wait_timeout(timeout).is_ok()
    }
}

impl Executor for SerialQueue {
    fn execute(&self, task: Task) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(task).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!(target: targets::EXECUTOR, queue = %self.name, "queue thread is gone");
        }
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("name", &self.name)
            .field("pending", &self.pending_tasks())
            .finish()
    }
}

static_assertions::assert_impl_all!(SerialQueue: Send, Sync);
static_assertions::assert_obj_safe!(Executor);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let queue = SerialQueue::new("test-fifo").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let seen = seen.clone();
            queue.execute(Box::new(move || seen.lock().push(i)));
        }

        assert!(queue.wait_idle(Duration::from_secs(1)));
        assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
        assert_eq!(queue.pending_tasks(), 0);
    }

    #[test]
    fn test_runs_off_caller_thread() {
        let queue = SerialQueue::new("test-thread").unwrap();
        let name = Arc::new(Mutex::new(None));

        let n = name.clone();
        queue.execute(Box::new(move || {
            *n.lock() = thread::current().name().map(str::to_owned);
        }));

        assert!(queue.wait_idle(Duration::from_secs(1)));
        assert_eq!(name.lock().as_deref(), Some("test-thread"));
    }

    #[test]
    fn test_shared_is_singleton() {
        let a = SerialQueue::shared().unwrap();
        let b = SerialQueue::shared().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "horizon-socket-delegate");
    }

    #[test]
    fn test_panicking_task_keeps_queue_alive() {
        let queue = SerialQueue::new("test-panic").unwrap();
        queue.execute(Box::new(|| panic!("task failure")));

        let ran = Arc::new(Mutex::new(false));
        let r = ran.clone();
        queue.execute(Box::new(move || *r.lock() = true));

        assert!(queue.wait_idle(Duration::from_secs(1)));
        assert!(*ran.lock());
    }

    #[test]
    fn test_tokio_handle_executor() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let executor: Arc<dyn Executor> = Arc::new(runtime.handle().clone());

        let (resolver, waiter) = completion::pair();
        executor.execute(Box::new(move || resolver.resolve(7)));
        assert_eq!(waiter.wait_timeout(Duration::from_secs(1)), Ok(7));
    }
}
