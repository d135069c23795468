//! Error types for the line, batching and process primitives.

use std::path::PathBuf;
use std::sync::Arc;

/// The main error type for the crate.
///
/// Errors are cheap to clone so a stream can hand the same failure to every
/// interested party; I/O sources are shared behind an `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A file was absent when the operation started
    #[error("Resource missing: {}", path.display())]
    ResourceMissing { path: PathBuf },

    /// The executable could not be resolved, nothing was spawned
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    /// The OS refused to spawn the process
    #[error("Failed to launch '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A read or write failed mid-operation
    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// An operation timed out
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A child process was terminated by a signal it did not handle
    #[error("Process terminated by signal {signal}")]
    UncaughtSignal { signal: i32 },

    /// A child process exited with a non-zero status
    #[error("Process exited with code {code}")]
    ExitCode { code: i32 },

    /// The operation was cancelled by the caller
    #[error("Stream was shut down")]
    Shutdown,

    /// A channel was closed unexpectedly
    #[error("Channel was closed unexpectedly")]
    ChannelClosed,

    /// A custom error with a message
    #[error("{0}")]
    Custom(String),
}

// Convenience constructors
impl Error {
    /// Wrap an I/O error with a short description of what was being done
    pub fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source: Arc::new(source),
        }
    }

    /// Create a launch error for `command`
    pub fn launch<S: Into<String>>(command: S, source: std::io::Error) -> Self {
        Error::Launch {
            command: command.into(),
            source: Arc::new(source),
        }
    }

    /// Create a resource missing error
    pub fn resource_missing<P: Into<PathBuf>>(path: P) -> Self {
        Error::ResourceMissing { path: path.into() }
    }

    /// Create a timeout error
    pub fn timeout(duration_ms: u64) -> Self {
        Error::Timeout { duration_ms }
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }

    /// Whether this error was produced by caller-initiated cancellation
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Error::Shutdown)
    }
}

// Common conversions
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::ChannelClosed
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Custom(format!("Timeout: {}", e))
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Helper trait for attaching context to I/O results
pub trait IoContext<T> {
    fn io_context<S: Into<String>>(self, context: S) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<S: Into<String>>(self, context: S) -> Result<T> {
        self.map_err(|e| Error::io(context, e))
    }
}
