use std::io;
use std::time::Duration;

use crate::endpoint::Mode;

/// Coarse error classification shared by every backend.
///
/// Callers branch on the kind instead of on platform error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipeErrorKind {
    /// Native resource allocation failed.
    Resource,
    /// Operation is not valid in the endpoint's current mode.
    State,
    /// Buffer range is outside the supplied buffer.
    Bounds,
    /// The endpoint name cannot be mapped to a local rendezvous point.
    InvalidName,
    /// The name is already bound by another listener.
    Bind,
    /// No listener is available at the name.
    Connect,
    /// A configured connect wait elapsed.
    Timeout,
    /// Transport failure, including a local close.
    Io,
}

/// Errors that can occur in pipe endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    /// Failed to allocate native resources for an endpoint.
    #[error("failed to allocate pipe resources: {0}")]
    Resource(#[source] io::Error),

    /// The operation is not valid in the current mode.
    #[error("cannot {operation} while endpoint is {mode}")]
    State { operation: &'static str, mode: Mode },

    /// The `[offset, offset + len)` range does not fit the buffer.
    #[error("buffer range out of bounds (offset {offset}, len {len}, buffer {buf_len} bytes)")]
    Bounds {
        offset: usize,
        len: usize,
        buf_len: usize,
    },

    /// The endpoint name is not usable on this platform.
    #[error("invalid endpoint name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// Failed to bind the name.
    #[error("failed to bind {name}: {source}")]
    Bind { name: String, source: io::Error },

    /// Failed to connect to the name.
    #[error("failed to connect to {name}: {source}")]
    Connect { name: String, source: io::Error },

    /// Waited the configured connect timeout without reaching a listener.
    #[error("timed out after {waited:?} waiting for a listener at {name}")]
    Timeout { name: String, waited: Duration },

    /// An I/O error occurred on the pipe.
    #[error("pipe I/O error: {0}")]
    Io(#[from] io::Error),

    /// The endpoint was closed locally.
    #[error("pipe endpoint closed")]
    Closed,
}

impl PipeError {
    /// Classify this error.
    pub fn kind(&self) -> PipeErrorKind {
        match self {
            PipeError::Resource(_) => PipeErrorKind::Resource,
            PipeError::State { .. } => PipeErrorKind::State,
            PipeError::Bounds { .. } => PipeErrorKind::Bounds,
            PipeError::InvalidName { .. } => PipeErrorKind::InvalidName,
            PipeError::Bind { .. } => PipeErrorKind::Bind,
            PipeError::Connect { .. } => PipeErrorKind::Connect,
            PipeError::Timeout { .. } => PipeErrorKind::Timeout,
            PipeError::Io(_) | PipeError::Closed => PipeErrorKind::Io,
        }
    }

    /// Whether this error reports a local close of the endpoint.
    pub fn is_closed(&self) -> bool {
        matches!(self, PipeError::Closed)
    }

    pub(crate) fn invalid_name(name: &str, reason: impl Into<String>) -> Self {
        PipeError::InvalidName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn name_in_use(name: &str) -> Self {
        PipeError::Bind {
            name: name.to_string(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "name already in use"),
        }
    }

    /// Map a failed OS connect attempt.
    ///
    /// A missing or refusing listener is a [`PipeErrorKind::Connect`]; every
    /// other failure stays a transport error.
    pub(crate) fn from_connect(name: &str, source: io::Error) -> Self {
        if is_no_listener(&source) {
            PipeError::Connect {
                name: name.to_string(),
                source,
            }
        } else {
            PipeError::Io(source)
        }
    }
}

impl From<PipeError> for io::Error {
    fn from(err: PipeError) -> Self {
        match err {
            PipeError::Io(source) | PipeError::Resource(source) => source,
            PipeError::Bind { source, .. } | PipeError::Connect { source, .. } => source,
            PipeError::Closed => io::Error::new(io::ErrorKind::NotConnected, PipeError::Closed),
            PipeError::Timeout { .. } => io::Error::new(io::ErrorKind::TimedOut, err),
            PipeError::Bounds { .. } | PipeError::InvalidName { .. } => {
                io::Error::new(io::ErrorKind::InvalidInput, err)
            }
            PipeError::State { .. } => io::Error::other(err),
        }
    }
}

/// Errors that only mean "try the syscall again".
#[cfg(unix)]
pub(crate) fn is_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

/// Errors that mean nobody is listening at the rendezvous point.
pub(crate) fn is_no_listener(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
    )
}

pub type Result<T> = std::result::Result<T, PipeError>;
