use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::net::Shutdown;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::{FileTypeExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::PipeConfig;
use crate::error::{is_no_listener, is_retryable, PipeError, Result};
use crate::name::EndpointName;

/// Pause between attempts while a configured connect wait is running.
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Self-pipe raised by `close()` to wake every blocked poll on an endpoint.
///
/// The read end is never drained, so once raised it stays readable.
pub(crate) struct CloseSignal {
    read: OwnedFd,
    write: OwnedFd,
}

impl CloseSignal {
    pub(crate) fn new() -> io::Result<Self> {
        let mut fds: [libc::c_int; 2] = [-1, -1];
        // SAFETY: `fds` is a valid, writable array of two descriptors.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: pipe() succeeded, so both descriptors are open and owned by us.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        set_nonblocking_cloexec(read.as_raw_fd())?;
        set_nonblocking_cloexec(write.as_raw_fd())?;
        Ok(Self { read, write })
    }

    pub(crate) fn raise(&self) {
        let byte = 1u8;
        // SAFETY: writes one byte from a valid stack location to our own pipe.
        let rc = unsafe {
            libc::write(
                self.write.as_raw_fd(),
                (&byte as *const u8).cast::<libc::c_void>(),
                1,
            )
        };
        if rc < 0 {
            debug!(error = %io::Error::last_os_error(), "close signal write failed");
        }
    }

    fn fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }
}

enum Readiness {
    Ready,
    Closed,
    TimedOut,
}

/// Block until `fd` reports `events`, the close signal fires, or `timeout` elapses.
///
/// A negative `fd` waits on the close signal alone.
fn wait_for(
    fd: RawFd,
    events: libc::c_short,
    signal: &CloseSignal,
    timeout: Option<Duration>,
) -> io::Result<Readiness> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        let timeout_ms = match deadline {
            None => -1,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let millis = remaining.as_nanos().div_ceil(1_000_000);
                millis.min(libc::c_int::MAX as u128) as libc::c_int
            }
        };

        let mut fds = [
            libc::pollfd {
                fd,
                events,
                revents: 0,
            },
            libc::pollfd {
                fd: signal.fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        // SAFETY: `fds` is a valid array of pollfd for its full length.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if fds[1].revents != 0 {
            return Ok(Readiness::Closed);
        }
        if fds[0].revents != 0 {
            return Ok(Readiness::Ready);
        }
        if rc == 0 && deadline.is_some() {
            return Ok(Readiness::TimedOut);
        }
    }
}

/// Unix domain socket listener bound to an endpoint name.
///
/// A sibling `<path>.lock` file is held with `flock` for the listener's
/// lifetime. A live lock means the name is in use. A socket file without a
/// live lock is replaced only once a connect to it is refused.
pub(crate) struct UdsListener {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
    lock_path: PathBuf,
    _lock: File,
}

impl UdsListener {
    pub(crate) fn bind(name: &EndpointName, config: &PipeConfig) -> Result<Self> {
        let path = name.address().to_path_buf();
        let bind_err = |source: io::Error| PipeError::Bind {
            name: name.to_string(),
            source,
        };

        let lock_path = lock_path_for(&path);
        let Some(lock) = acquire_lock(&lock_path).map_err(bind_err)? else {
            debug!(?path, "name is held by a live listener");
            return Err(PipeError::name_in_use(name.as_str()));
        };

        // A socket without a held lock may still belong to a listener that
        // does not use lock files. Only a refused connect proves it stale.
        match std::fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.file_type().is_socket() => match UnixStream::connect(&path) {
                Ok(_live) => {
                    debug!(?path, "socket answered a connect; name is in use");
                    return Err(PipeError::name_in_use(name.as_str()));
                }
                Err(err) if is_no_listener(&err) => {
                    debug!(?path, "removing stale socket");
                    std::fs::remove_file(&path).map_err(bind_err)?;
                }
                Err(err) => return Err(bind_err(err)),
            },
            Ok(_) => {
                return Err(bind_err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(bind_err(err)),
        }

        let listener = UnixListener::bind(&path).map_err(|err| {
            if err.kind() == io::ErrorKind::AddrInUse {
                PipeError::name_in_use(name.as_str())
            } else {
                bind_err(err)
            }
        })?;

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(config.socket_mode))
            .map_err(bind_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;

        info!(?path, "listening on unix domain socket");

        Ok(Self {
            listener,
            path,
            created_inode: Some((created.dev(), created.ino())),
            lock_path,
            _lock: lock,
        })
    }

    /// Accept one connection, waking early if the endpoint closes.
    pub(crate) fn accept(&self, signal: &CloseSignal) -> Result<UdsStream> {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    debug!(path = ?self.path, "accepted connection");
                    return UdsStream::prepare(stream);
                }
                Err(err) if is_retryable(&err) => {
                    match wait_for(self.listener.as_raw_fd(), libc::POLLIN, signal, None)? {
                        Readiness::Closed => return Err(PipeError::Closed),
                        Readiness::Ready | Readiness::TimedOut => continue,
                    }
                }
                Err(err) => return Err(PipeError::Io(err)),
            }
        }
    }
}

impl Drop for UdsListener {
    fn drop(&mut self) {
        if let Some((expected_dev, expected_ino)) = self.created_inode {
            if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
                if metadata.file_type().is_socket()
                    && metadata.dev() == expected_dev
                    && metadata.ino() == expected_ino
                {
                    debug!(path = ?self.path, "removing socket file");
                    if let Err(err) = std::fs::remove_file(&self.path) {
                        warn!(path = ?self.path, error = %err, "failed to remove socket file");
                    }
                } else {
                    debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
                }
            }
        }
        // Unlink while the lock is still held; the lock releases when `_lock` drops.
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

/// Connected, non-blocking Unix domain socket.
pub(crate) struct UdsStream {
    stream: UnixStream,
}

impl UdsStream {
    /// Connect to `name`, waiting up to `config.connect_timeout` for a listener.
    pub(crate) fn connect(
        name: &EndpointName,
        config: &PipeConfig,
        signal: &CloseSignal,
    ) -> Result<Self> {
        let path = name.address();
        let started = Instant::now();
        loop {
            let err = match UnixStream::connect(path) {
                Ok(stream) => {
                    debug!(?path, "connected to unix domain socket");
                    return Self::prepare(stream);
                }
                Err(err) => err,
            };

            let waiting = is_no_listener(&err) || err.kind() == io::ErrorKind::WouldBlock;
            let timeout = match config.connect_timeout {
                Some(timeout) if waiting => timeout,
                _ => return Err(PipeError::from_connect(name.as_str(), err)),
            };

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(PipeError::Timeout {
                    name: name.to_string(),
                    waited,
                });
            }
            let pause = (timeout - waited).min(CONNECT_RETRY_INTERVAL);
            if let Readiness::Closed = wait_for(-1, 0, signal, Some(pause))? {
                return Err(PipeError::Closed);
            }
        }
    }

    fn prepare(stream: UnixStream) -> Result<Self> {
        stream.set_nonblocking(true)?;
        suppress_sigpipe(&stream)?;
        Ok(Self { stream })
    }

    /// Read at least one byte, `0` at end of stream.
    pub(crate) fn read(&self, buf: &mut [u8], signal: &CloseSignal) -> Result<usize> {
        loop {
            match (&self.stream).read(buf) {
                Ok(n) => return Ok(n),
                Err(err) if is_retryable(&err) => {
                    match wait_for(self.stream.as_raw_fd(), libc::POLLIN, signal, None)? {
                        Readiness::Closed => return Err(PipeError::Closed),
                        Readiness::Ready | Readiness::TimedOut => continue,
                    }
                }
                Err(err) => return Err(PipeError::Io(err)),
            }
        }
    }

    /// Write some of `buf`, returning how many bytes the kernel took.
    pub(crate) fn write(&self, buf: &[u8], signal: &CloseSignal) -> Result<usize> {
        loop {
            match send_no_sigpipe(self.stream.as_raw_fd(), buf) {
                Ok(n) => return Ok(n),
                Err(err) if is_retryable(&err) => {
                    match wait_for(self.stream.as_raw_fd(), libc::POLLOUT, signal, None)? {
                        Readiness::Closed => return Err(PipeError::Closed),
                        Readiness::Ready | Readiness::TimedOut => continue,
                    }
                }
                Err(err) => return Err(PipeError::Io(err)),
            }
        }
    }

    /// Shut both directions down so the peer sees end of stream.
    pub(crate) fn shutdown(&self) {
        if let Err(err) = self.stream.shutdown(Shutdown::Both) {
            if err.kind() != io::ErrorKind::NotConnected {
                debug!(error = %err, "socket shutdown failed");
            }
        }
    }
}

/// Take an exclusive `flock` on `lock_path`, or `None` if another listener holds it.
///
/// The lock only counts if the locked inode is still the file at `lock_path`.
/// A departing listener unlinks its lock file, so an inode opened just before
/// that unlink can be locked after it; such a lock is dropped and retaken.
fn acquire_lock(lock_path: &Path) -> io::Result<Option<File>> {
    loop {
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(lock_path)?;
        // SAFETY: `lock` is an open file descriptor owned by this function.
        if unsafe { libc::flock(lock.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(err);
        }
        if lock_is_current(&lock, lock_path)? {
            return Ok(Some(lock));
        }
        debug!(?lock_path, "lock file was replaced while locking; retrying");
    }
}

fn lock_is_current(lock: &File, lock_path: &Path) -> io::Result<bool> {
    let held = lock.metadata()?;
    match std::fs::symlink_metadata(lock_path) {
        Ok(on_disk) => Ok(on_disk.dev() == held.dev() && on_disk.ino() == held.ino()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut lock = path.as_os_str().to_os_string();
    lock.push(".lock");
    PathBuf::from(lock)
}

fn set_nonblocking_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own, with flag values from libc.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd_flags = libc::fcntl(fd, libc::F_GETFD);
        if fd_flags < 0 || libc::fcntl(fd, libc::F_SETFD, fd_flags | libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
const SEND_FLAGS: libc::c_int = 0;

fn send_no_sigpipe(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    // SAFETY: `buf` is valid for `buf.len()` bytes for the duration of the call.
    let rc = unsafe { libc::send(fd, buf.as_ptr().cast::<libc::c_void>(), buf.len(), SEND_FLAGS) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

#[cfg(target_vendor = "apple")]
fn suppress_sigpipe(stream: &UnixStream) -> io::Result<()> {
    let on: libc::c_int = 1;
    // SAFETY: `on` is a valid c_int for the option length passed.
    let rc = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_NOSIGPIPE,
            (&on as *const libc::c_int).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_vendor = "apple"))]
fn suppress_sigpipe(_stream: &UnixStream) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipeErrorKind;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/protopipe-uds-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    fn name_in(dir: &Path, file: &str) -> EndpointName {
        let path = dir.join(file);
        EndpointName::new(path.to_str().expect("temp path should be utf-8"))
            .expect("name should resolve")
    }

    #[test]
    fn bind_accept_connect() {
        let dir = temp_dir("accept");
        let name = name_in(&dir, "a.sock");
        let signal = CloseSignal::new().unwrap();

        let listener = UdsListener::bind(&name, &PipeConfig::default()).unwrap();
        assert!(name.address().exists());

        let client_name = name.clone();
        let client = std::thread::spawn(move || {
            let signal = CloseSignal::new().unwrap();
            let stream =
                UdsStream::connect(&client_name, &PipeConfig::default(), &signal).unwrap();
            assert_eq!(stream.write(b"hello", &signal).unwrap(), 5);
        });

        let server = listener.accept(&signal).unwrap();
        let mut buf = [0u8; 5];
        let mut filled = 0;
        while filled < buf.len() {
            let n = server.read(&mut buf[filled..], &signal).unwrap();
            assert!(n > 0);
            filled += n;
        }
        assert_eq!(&buf, b"hello");
        client.join().unwrap();

        drop(listener);
        assert!(!name.address().exists(), "socket file should be removed on drop");
        assert!(!lock_path_for(name.address()).exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn raised_signal_wakes_accept() {
        let dir = temp_dir("wake");
        let name = name_in(&dir, "w.sock");
        let listener = UdsListener::bind(&name, &PipeConfig::default()).unwrap();
        let signal = CloseSignal::new().unwrap();
        signal.raise();

        let err = listener.accept(&signal).err().expect("accept should fail");
        assert!(err.is_closed());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn live_listener_blocks_second_bind() {
        let dir = temp_dir("live");
        let name = name_in(&dir, "live.sock");
        let _first = UdsListener::bind(&name, &PipeConfig::default()).unwrap();

        let err = UdsListener::bind(&name, &PipeConfig::default())
            .err()
            .expect("second bind should fail");
        assert_eq!(err.kind(), PipeErrorKind::Bind);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stale_socket_file_is_replaced() {
        let dir = temp_dir("stale");
        let name = name_in(&dir, "stale.sock");

        // A bound-then-dropped std listener leaves its socket file behind.
        drop(UnixListener::bind(name.address()).unwrap());
        assert!(name.address().exists());

        let listener = UdsListener::bind(&name, &PipeConfig::default());
        assert!(listener.is_ok(), "stale socket should be replaced");
        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn live_foreign_listener_is_not_replaced() {
        let dir = temp_dir("foreign");
        let name = name_in(&dir, "foreign.sock");
        let foreign = UnixListener::bind(name.address()).unwrap();

        let err = UdsListener::bind(&name, &PipeConfig::default())
            .err()
            .expect("bind over a live socket should fail");
        assert_eq!(err.kind(), PipeErrorKind::Bind);
        assert!(name.address().exists(), "live socket must be left in place");

        // Clients still reach the original listener.
        let _client = UnixStream::connect(name.address()).unwrap();
        let _ = foreign.accept().unwrap();
        drop(foreign);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn lock_on_unlinked_inode_is_not_current() {
        let dir = temp_dir("lockrace");
        let lock_path = dir.join("race.sock.lock");

        let early = File::create(&lock_path).unwrap();
        assert!(lock_is_current(&early, &lock_path).unwrap());

        std::fs::remove_file(&lock_path).unwrap();
        assert!(!lock_is_current(&early, &lock_path).unwrap());

        std::fs::write(&lock_path, b"").unwrap();
        assert!(!lock_is_current(&early, &lock_path).unwrap());

        let fresh = acquire_lock(&lock_path).unwrap().expect("fresh lock should be free");
        assert!(lock_is_current(&fresh, &lock_path).unwrap());
        assert!(acquire_lock(&lock_path).unwrap().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bind_rejects_existing_non_socket_file() {
        let dir = temp_dir("file");
        let name = name_in(&dir, "not-a-socket.sock");
        std::fs::write(name.address(), b"regular-file").unwrap();

        let err = UdsListener::bind(&name, &PipeConfig::default())
            .err()
            .expect("bind should fail");
        assert_eq!(err.kind(), PipeErrorKind::Bind);
        assert!(name.address().exists(), "regular file must be left alone");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bind_applies_socket_mode() {
        let dir = temp_dir("perms");
        let name = name_in(&dir, "perm.sock");

        let listener = UdsListener::bind(&name, &PipeConfig::default()).unwrap();
        let mode = std::fs::metadata(name.address()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn drop_does_not_remove_replaced_path() {
        let dir = temp_dir("replaced");
        let name = name_in(&dir, "drop.sock");

        let listener = UdsListener::bind(&name, &PipeConfig::default()).unwrap();
        std::fs::remove_file(name.address()).unwrap();
        std::fs::write(name.address(), b"replacement-file").unwrap();

        drop(listener);
        assert!(
            name.address().exists(),
            "drop must not remove path if inode identity changed"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn connect_without_listener_is_connect_error() {
        let dir = temp_dir("nolistener");
        let name = name_in(&dir, "missing.sock");
        let signal = CloseSignal::new().unwrap();

        let err = UdsStream::connect(&name, &PipeConfig::default(), &signal)
            .err()
            .expect("connect should fail");
        assert_eq!(err.kind(), PipeErrorKind::Connect);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
