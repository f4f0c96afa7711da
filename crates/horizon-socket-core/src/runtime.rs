//! Process-wide async runtime for transport I/O.
//!
//! Sockets run their connect, read and write futures on a Tokio runtime. By
//! default that is the lazily created [`AsyncRuntime::global`] runtime, which
//! owns its own worker threads. Callers blocked in a synchronous wait can
//! therefore never starve the I/O that would wake them.
//!
//! # Example
//!
//! ```no_run
//! use horizon_socket_core::runtime::{AsyncRuntime, AsyncRuntimeConfig};
//!
//! // Optional: configure before first use.
//! AsyncRuntime::init_global(AsyncRuntimeConfig::default().with_worker_threads(2))?;
//!
//! let handle = AsyncRuntime::global()?.handle().clone();
//! handle.spawn(async { /* ... */ });
//! # Ok::<(), horizon_socket_core::CoreError>(())
//! ```

use std::sync::OnceLock;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::{CoreError, Result};
use crate::logging::targets;

static GLOBAL_RUNTIME: OnceLock<AsyncRuntime> = OnceLock::new();
static GLOBAL_RUNTIME_INIT: Mutex<()> = Mutex::new(());

/// Configuration for the async runtime.
#[derive(Debug, Clone)]
pub struct AsyncRuntimeConfig {
    /// Number of worker threads. Defaults to the number of CPU cores.
    pub worker_threads: Option<usize>,
    /// Name prefix for runtime threads.
    pub thread_name: String,
}

impl Default for AsyncRuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            thread_name: "horizon-socket-io".to_string(),
        }
    }
}

impl AsyncRuntimeConfig {
    /// Set the number of worker threads.
    pub fn with_worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = Some(count);
        self
    }

    /// Set the thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// An owned multi-threaded Tokio runtime with I/O and time drivers enabled.
pub struct AsyncRuntime {
    // Kept alive so the runtime does not shut down.
    _runtime: Runtime,
    handle: Handle,
}

impl AsyncRuntime {
    /// Get the global async runtime, creating it with default settings on
    /// first use.
    pub fn global() -> Result<&'static AsyncRuntime> {
        if let Some(runtime) = GLOBAL_RUNTIME.get() {
            return Ok(runtime);
        }
        Self::init_global_with(AsyncRuntimeConfig::default(), false)
    }

    /// Initialize the global runtime with custom configuration.
    ///
    /// Fails with [`CoreError::RuntimeAlreadyInitialized`] if it already
    /// exists.
    pub fn init_global(config: AsyncRuntimeConfig) -> Result<&'static AsyncRuntime> {
        Self::init_global_with(config, true)
    }

    fn init_global_with(config: AsyncRuntimeConfig, exclusive: bool) -> Result<&'static AsyncRuntime> {
        let _guard = GLOBAL_RUNTIME_INIT.lock();
        if let Some(runtime) = GLOBAL_RUNTIME.get() {
            return if exclusive {
                Err(CoreError::RuntimeAlreadyInitialized)
            } else {
                Ok(runtime)
            };
        }

        let runtime = AsyncRuntime::new(config)?;
        Ok(GLOBAL_RUNTIME.get_or_init(|| runtime))
    }

    /// Create a new runtime with the given configuration.
    pub fn new(config: AsyncRuntimeConfig) -> Result<Self> {
        let mut builder = Builder::new_multi_thread();
        builder.thread_name(&config.thread_name).enable_io().enable_time();

        if let Some(workers) = config.worker_threads {
            builder.worker_threads(workers);
        }

        let runtime = builder
            .build()
            .map_err(|e| CoreError::RuntimeBuild(e.to_string()))?;
        let handle = runtime.handle().clone();

        tracing::debug!(
            target: targets::RUNTIME,
            thread_name = %config.thread_name,
            worker_threads = ?config.worker_threads,
            "async runtime started"
        );

        Ok(Self {
            _runtime: runtime,
            handle,
        })
    }

    /// Get a handle to the Tokio runtime.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl std::fmt::Debug for AsyncRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncRuntime")
            .field("handle", &self.handle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_global_is_singleton() {
        let a = AsyncRuntime::global().unwrap();
        let b = AsyncRuntime::global().unwrap();
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn test_init_global_after_use_fails() {
        AsyncRuntime::global().unwrap();
        let result = AsyncRuntime::init_global(AsyncRuntimeConfig::default());
        assert!(matches!(result, Err(CoreError::RuntimeAlreadyInitialized)));
    }

    #[test]
    fn test_timers_enabled() {
        let runtime = AsyncRuntime::new(AsyncRuntimeConfig::default().with_thread_name("test-io")).unwrap();
        runtime.handle().block_on(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
        });
    }
}
