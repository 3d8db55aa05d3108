use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Environment variable overriding the Unix pipe directory.
pub const ENV_PIPE_DIR: &str = "PROTOPIPE_DIR";
/// Environment variable setting the connect timeout in milliseconds.
pub const ENV_CONNECT_TIMEOUT_MS: &str = "PROTOPIPE_CONNECT_TIMEOUT_MS";
/// Environment variable setting the largest single OS transfer in bytes.
pub const ENV_MAX_CHUNK: &str = "PROTOPIPE_MAX_CHUNK";

/// Default largest single read/write request handed to the OS.
pub const DEFAULT_MAX_TRANSFER_CHUNK: usize = 64 * 1024;
/// Default permission mode for listener socket files.
pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
/// Default named pipe in/out buffer size hint.
pub const DEFAULT_PIPE_BUFFER_SIZE: u32 = 64 * 1024;

/// Per-endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeConfig {
    /// How long `connect` waits for a listener to appear or become free.
    /// `None` makes a single attempt.
    pub connect_timeout: Option<Duration>,
    /// Directory holding relative socket names (Unix only).
    /// `None` uses `/tmp`, or `/data/local/tmp` on Android.
    pub pipe_dir: Option<PathBuf>,
    /// Permission bits applied to a listener's socket file (Unix only).
    pub socket_mode: u32,
    /// Largest single read or write request passed to the OS.
    pub max_transfer_chunk: usize,
    /// In/out buffer size hint for created named pipes (Windows only).
    pub pipe_buffer_size: u32,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            pipe_dir: None,
            socket_mode: DEFAULT_SOCKET_MODE,
            max_transfer_chunk: DEFAULT_MAX_TRANSFER_CHUNK,
            pipe_buffer_size: DEFAULT_PIPE_BUFFER_SIZE,
        }
    }
}

impl PipeConfig {
    /// Defaults overlaid with `PROTOPIPE_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Set the connect wait.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the directory used for relative names.
    pub fn with_pipe_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pipe_dir = Some(dir.into());
        self
    }

    /// Set listener socket file permissions.
    pub fn with_socket_mode(mut self, mode: u32) -> Self {
        self.socket_mode = mode;
        self
    }

    /// Set the largest single OS transfer.
    pub fn with_max_transfer_chunk(mut self, bytes: usize) -> Self {
        self.max_transfer_chunk = bytes;
        self
    }

    /// Set the named pipe buffer size hint.
    pub fn with_pipe_buffer_size(mut self, bytes: u32) -> Self {
        self.pipe_buffer_size = bytes;
        self
    }

    /// Directory that relative names resolve into.
    pub fn effective_pipe_dir(&self) -> PathBuf {
        if let Some(dir) = &self.pipe_dir {
            return dir.clone();
        }
        if cfg!(target_os = "android") {
            PathBuf::from("/data/local/tmp")
        } else {
            PathBuf::from("/tmp")
        }
    }

    /// Transfer chunk clamped to what a single OS call accepts.
    pub(crate) fn transfer_chunk(&self) -> usize {
        self.max_transfer_chunk.clamp(1, u32::MAX as usize)
    }

    fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup(ENV_PIPE_DIR).filter(|dir| !dir.is_empty()) {
            self.pipe_dir = Some(PathBuf::from(dir));
        }

        if let Some(raw) = lookup(ENV_CONNECT_TIMEOUT_MS) {
            match raw.trim().parse::<u64>() {
                Ok(0) => self.connect_timeout = None,
                Ok(ms) => self.connect_timeout = Some(Duration::from_millis(ms)),
                Err(_) => warn!(
                    var = ENV_CONNECT_TIMEOUT_MS,
                    value = %raw,
                    "ignoring malformed connect timeout"
                ),
            }
        }

        if let Some(raw) = lookup(ENV_MAX_CHUNK) {
            match raw.trim().parse::<usize>() {
                Ok(bytes) if bytes > 0 => self.max_transfer_chunk = bytes,
                _ => warn!(
                    var = ENV_MAX_CHUNK,
                    value = %raw,
                    "ignoring malformed transfer chunk size"
                ),
            }
        }

        self
    }
}
