use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::PipeConfig;
use crate::error::{PipeError, Result};

/// Prefix placed in front of every name in the Windows pipe namespace.
pub const WINDOWS_PIPE_PREFIX: &str = r"\\.\pipe\protoPipe-";

/// Maximum socket path length.
/// Unix `sockaddr_un.sun_path` is 108 bytes on Linux, 104 on macOS and the BSDs.
#[cfg(any(target_os = "linux", target_os = "android"))]
const MAX_SOCKET_PATH_LEN: usize = 108;
#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
const MAX_SOCKET_PATH_LEN: usize = 104;

/// Named pipe paths are limited to 256 UTF-16 units.
#[cfg(windows)]
const MAX_PIPE_PATH_LEN: usize = 256;

/// A local rendezvous name, resolved to the platform namespace.
///
/// On Unix a name starting with `/` is used as the socket path; any other
/// name lives in the configured pipe directory (`/tmp/<name>` by default).
/// On Windows the name maps to `\\.\pipe\protoPipe-<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointName {
    name: String,
    address: PathBuf,
}

impl EndpointName {
    /// Resolve `name` with the default configuration.
    pub fn new(name: &str) -> Result<Self> {
        Self::resolve(name, &PipeConfig::default())
    }

    /// Resolve `name` against `config`.
    pub fn resolve(name: &str, config: &PipeConfig) -> Result<Self> {
        if name.is_empty() {
            return Err(PipeError::invalid_name(name, "name must not be empty"));
        }
        if name.contains('\0') {
            return Err(PipeError::invalid_name(
                name,
                "name must not contain NUL bytes",
            ));
        }

        let address = resolve_address(name, config)?;
        Ok(Self {
            name: name.to_string(),
            address,
        })
    }

    /// The name as given by the caller.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Platform address: socket path on Unix, pipe path on Windows.
    pub fn address(&self) -> &Path {
        &self.address
    }
}

impl fmt::Display for EndpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(unix)]
fn resolve_address(name: &str, config: &PipeConfig) -> Result<PathBuf> {
    let path = if name.starts_with('/') {
        PathBuf::from(name)
    } else {
        config.effective_pipe_dir().join(name)
    };

    let len = path.as_os_str().len();
    if len >= MAX_SOCKET_PATH_LEN {
        return Err(PipeError::invalid_name(
            name,
            format!(
                "socket path {} is {len} bytes, max {}",
                path.display(),
                MAX_SOCKET_PATH_LEN - 1
            ),
        ));
    }
    Ok(path)
}

#[cfg(windows)]
fn resolve_address(name: &str, _config: &PipeConfig) -> Result<PathBuf> {
    if name.contains('\\') {
        return Err(PipeError::invalid_name(
            name,
            "pipe names must not contain backslashes",
        ));
    }

    let full = format!("{WINDOWS_PIPE_PREFIX}{name}");
    let len = full.encode_utf16().count();
    if len > MAX_PIPE_PATH_LEN {
        return Err(PipeError::invalid_name(
            name,
            format!("pipe path is {len} UTF-16 units, max {MAX_PIPE_PATH_LEN}"),
        ));
    }
    Ok(PathBuf::from(full))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipeErrorKind;

    #[test]
    fn rejects_empty_and_nul() {
        assert_eq!(
            EndpointName::new("").unwrap_err().kind(),
            PipeErrorKind::InvalidName
        );
        assert_eq!(
            EndpointName::new("a\0b").unwrap_err().kind(),
            PipeErrorKind::InvalidName
        );
    }

    #[test]
    fn display_is_the_caller_name() {
        let name = EndpointName::new("display-me").unwrap();
        assert_eq!(name.to_string(), "display-me");
        assert_eq!(name.as_str(), "display-me");
    }

    #[cfg(unix)]
    #[test]
    fn relative_names_live_in_pipe_dir() {
        let config = PipeConfig::default().with_pipe_dir("/run/protopipe");
        let name = EndpointName::resolve("control", &config).unwrap();
        assert_eq!(name.address(), Path::new("/run/protopipe/control"));
    }

    #[cfg(all(unix, not(target_os = "android")))]
    #[test]
    fn default_dir_is_tmp() {
        let name = EndpointName::new("test-pipe").unwrap();
        assert_eq!(name.address(), Path::new("/tmp/test-pipe"));
    }

    #[cfg(unix)]
    #[test]
    fn absolute_names_are_used_verbatim() {
        let name = EndpointName::new("/var/tmp/abs.sock").unwrap();
        assert_eq!(name.address(), Path::new("/var/tmp/abs.sock"));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_paths_longer_than_sun_path() {
        let long = "n".repeat(200);
        let err = EndpointName::new(&long).unwrap_err();
        assert_eq!(err.kind(), PipeErrorKind::InvalidName);
    }

    #[cfg(windows)]
    #[test]
    fn names_map_into_pipe_namespace() {
        let name = EndpointName::new("test-pipe").unwrap();
        assert_eq!(name.address(), Path::new(r"\\.\pipe\protoPipe-test-pipe"));
    }

    #[cfg(windows)]
    #[test]
    fn rejects_backslashes() {
        let err = EndpointName::new(r"a\b").unwrap_err();
        assert_eq!(err.kind(), PipeErrorKind::InvalidName);
    }
}
