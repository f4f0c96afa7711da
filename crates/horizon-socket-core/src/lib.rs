//! Core systems for Horizon Socket.
//!
//! This crate provides the execution primitives the socket layer is built on,
//! with no networking of its own:
//!
//! - **Execution contexts**: private serial workers owning mutable state
//! - **Worker affinity**: the "already inside this worker" predicate
//! - **Executors**: FIFO delegate queues for callbacks
//! - **Completions**: one-shot resolver/waiter pairs with deadlines
//! - **Deadlines**: single-shot timers whose expiry runs on a context
//! - **Async runtime**: the process-wide Tokio runtime for transport I/O
//!
//! # Serial Context Example
//!
//! ```no_run
//! use std::time::Duration;
//! use horizon_socket_core::{ExecutionContext, SerialState, completion};
//!
//! #[derive(Default)]
//! struct Tally {
//!     items: Vec<u32>,
//! }
//!
//! impl SerialState for Tally {}
//!
//! let context = ExecutionContext::new("tally", |_| Tally::default())?;
//!
//! // Safe to call from any thread; tasks run one at a time.
//! context.run_serialized(|tally| tally.items.push(1));
//! context.run_serialized(|tally| tally.items.push(2));
//!
//! let (resolver, waiter) = completion::pair();
//! context.run_serialized(move |tally| resolver.resolve(tally.items.len()));
//! assert_eq!(waiter.wait_timeout(Duration::from_secs(1)), Ok(2));
//! # Ok::<(), horizon_socket_core::CoreError>(())
//! ```

pub mod affinity;
pub mod completion;
pub mod context;
pub mod deadline;
mod error;
pub mod executor;
pub mod logging;
pub mod runtime;

pub use affinity::WorkerToken;
pub use context::{ContextConfig, ExecutionContext, SerialState, Task, WeakContext};
pub use deadline::DeadlineTimer;
pub use error::{CoreError, Result};
pub use executor::{Executor, SerialQueue};
pub use logging::PerfSpan;
pub use runtime::{AsyncRuntime, AsyncRuntimeConfig};
