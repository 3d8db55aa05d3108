use std::fmt;
use std::io;

use protopipe_transport::{PipeError, PipeErrorKind};

// Exit code constants.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => FAILURE,
        _ => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn pipe_error(context: &str, err: PipeError) -> CliError {
    let message = format!("{context}: {err}");
    match err {
        PipeError::Bind { source, .. } | PipeError::Io(source)
            if source.kind() == io::ErrorKind::PermissionDenied =>
        {
            CliError::new(PERMISSION_DENIED, message)
        }
        other => match other.kind() {
            PipeErrorKind::Timeout => CliError::new(TIMEOUT, message),
            PipeErrorKind::Connect => CliError::new(FAILURE, message),
            PipeErrorKind::InvalidName | PipeErrorKind::Bounds => CliError::new(USAGE, message),
            PipeErrorKind::Bind | PipeErrorKind::Io => CliError::new(TRANSPORT_ERROR, message),
            PipeErrorKind::Resource | PipeErrorKind::State => CliError::new(INTERNAL, message),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn timeout_maps_to_124() {
        let err = PipeError::Timeout {
            name: "slow".to_string(),
            waited: Duration::from_secs(1),
        };
        assert_eq!(pipe_error("connect failed", err).code, TIMEOUT);
    }

    #[test]
    fn missing_listener_is_plain_failure() {
        let err = PipeError::Connect {
            name: "nobody".to_string(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        let cli = pipe_error("connect failed", err);
        assert_eq!(cli.code, FAILURE);
        assert!(cli.message.starts_with("connect failed: "));
    }

    #[test]
    fn permission_denied_bind_maps_to_50() {
        let err = PipeError::Bind {
            name: "locked".to_string(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert_eq!(pipe_error("listen failed", err).code, PERMISSION_DENIED);
    }

    #[test]
    fn name_in_use_is_a_transport_error() {
        let err = PipeError::Bind {
            name: "dup".to_string(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert_eq!(pipe_error("listen failed", err).code, TRANSPORT_ERROR);
    }
}
