//! Error types for Horizon Socket core primitives.

use std::fmt;

/// The main error type for core execution primitives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The execution context has stopped and no longer accepts tasks.
    ContextStopped,
    /// Failed to spawn a worker thread.
    ThreadSpawn(String),
    /// Failed to build the async runtime.
    RuntimeBuild(String),
    /// The global async runtime has already been initialized.
    RuntimeAlreadyInitialized,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContextStopped => write!(f, "Execution context has stopped"),
            Self::ThreadSpawn(msg) => write!(f, "Failed to spawn worker thread: {msg}"),
            Self::RuntimeBuild(msg) => write!(f, "Failed to build async runtime: {msg}"),
            Self::RuntimeAlreadyInitialized => {
                write!(f, "Global async runtime has already been initialized")
            }
        }
    }
}

impl std::error::Error for CoreError {}

/// A specialized Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
