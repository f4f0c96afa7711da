//! Logging facilities for Horizon Socket.
//!
//! Horizon Socket uses the `tracing` crate for instrumentation. Nothing is
//! printed unless the application installs a subscriber:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("horizon_socket=debug,horizon_socket_core=info")
//!         .init();
//! }
//! ```
//!
//! Every event is emitted with one of the fixed [`targets`], so filters can
//! pick out a single subsystem.

/// Span names used throughout Horizon Socket for tracing.
pub mod span_names {
    /// A single connect attempt, from `connect` to its resolution.
    pub const CONNECT: &str = "horizon_socket::connect";
    /// A transport receive loop.
    pub const RECEIVE: &str = "horizon_socket::receive";
    /// A transport writer loop.
    pub const WRITE: &str = "horizon_socket::write";
}

/// Target names for log filtering.
pub mod targets {
    /// Socket state machine target.
    pub const SOCKET: &str = "horizon_socket::socket";
    /// Transport establishment and I/O target.
    pub const TRANSPORT: &str = "horizon_socket::transport";
    /// Serial execution context target.
    pub const CONTEXT: &str = "horizon_socket_core::context";
    /// Deadline timer target.
    pub const TIMER: &str = "horizon_socket_core::timer";
    /// Executor and delegate queue target.
    pub const EXECUTOR: &str = "horizon_socket_core::executor";
    /// Async runtime target.
    pub const RUNTIME: &str = "horizon_socket_core::runtime";
}

/// A guard that keeps a tracing span entered until dropped.
///
/// Useful for tracking the duration of blocking operations.
#[derive(Debug)]
pub struct PerfSpan {
    _span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: "horizon_socket::perf", "perf", operation = name);
        Self {
            _span: span.entered(),
        }
    }
}
