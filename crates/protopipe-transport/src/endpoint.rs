use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::config::PipeConfig;
use crate::error::{PipeError, Result};
use crate::name::EndpointName;
use crate::transport::{CloseSignal, PipeListener, PipeStream};

/// Lifecycle position of a [`PipeEndpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Unbound,
    Listening,
    Connected,
    Closed,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Unbound => "unbound",
            Mode::Listening => "listening",
            Mode::Connected => "connected",
            Mode::Closed => "closed",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the connection an endpoint took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    None,
    Server,
    Client,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::None => "none",
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct State {
    mode: Mode,
    role: Role,
    name: Option<EndpointName>,
    listener: Option<Arc<PipeListener>>,
    stream: Option<Arc<PipeStream>>,
}

/// One end of a local byte-stream pipe.
///
/// All operations take `&self`; `close` may run on another thread while a
/// `read`, `write`, `accept` or `connect` is blocked and makes it return
/// [`PipeError::Closed`]. At most one concurrent `read` and one concurrent
/// `write` are supported.
pub struct PipeEndpoint {
    config: PipeConfig,
    signal: CloseSignal,
    closed: AtomicBool,
    state: Mutex<State>,
    // Serializes the deferred accept so concurrent read and write accept once.
    accept_lock: Mutex<()>,
}

impl PipeEndpoint {
    /// Allocate an unbound endpoint with the default configuration.
    pub fn create() -> Result<Self> {
        Self::create_with_config(PipeConfig::default())
    }

    /// Allocate an unbound endpoint.
    pub fn create_with_config(config: PipeConfig) -> Result<Self> {
        let signal = CloseSignal::new().map_err(PipeError::Resource)?;
        Ok(Self {
            config,
            signal,
            closed: AtomicBool::new(false),
            state: Mutex::new(State {
                mode: Mode::Unbound,
                role: Role::None,
                name: None,
                listener: None,
                stream: None,
            }),
            accept_lock: Mutex::new(()),
        })
    }

    /// Bind `name` and become the server side.
    ///
    /// Returns once bound; the peer is accepted by [`accept`](Self::accept)
    /// or by the first `read`/`write`. On failure the endpoint stays unbound.
    pub fn listen(&self, name: &str) -> Result<bool> {
        let mut state = self.lock();
        expect_unbound(&state, "listen")?;

        let name = EndpointName::resolve(name, &self.config)?;
        let listener = PipeListener::bind(&name, &self.config)?;

        state.mode = Mode::Listening;
        state.role = Role::Server;
        state.name = Some(name);
        state.listener = Some(Arc::new(listener));
        Ok(true)
    }

    /// Block until the peer connects to a listening endpoint.
    ///
    /// A no-op once the server side is connected.
    pub fn accept(&self) -> Result<()> {
        {
            let state = self.lock();
            if state.mode == Mode::Connected && state.role == Role::Client {
                return Err(PipeError::State {
                    operation: "accept",
                    mode: state.mode,
                });
            }
        }
        self.connected_stream("accept").map(|_| ())
    }

    /// Connect to the listener at `name` and become the client side.
    ///
    /// Honors [`PipeConfig::connect_timeout`]. On failure the endpoint stays unbound.
    pub fn connect(&self, name: &str) -> Result<bool> {
        let name = {
            let state = self.lock();
            expect_unbound(&state, "connect")?;
            EndpointName::resolve(name, &self.config)?
        };

        let stream = PipeStream::connect(&name, &self.config, &self.signal);
        let stream = self.finish(stream)?;

        let mut state = self.lock();
        if let Err(err) = expect_unbound(&state, "connect") {
            stream.shutdown();
            return Err(err);
        }
        state.mode = Mode::Connected;
        state.role = Role::Client;
        state.name = Some(name);
        state.stream = Some(Arc::new(stream));
        Ok(true)
    }

    /// Read into the whole of `buf`. See [`read_range`](Self::read_range).
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len();
        self.read_range(buf, 0, len)
    }

    /// Read at most `len` bytes into `buf[offset..offset + len]`.
    ///
    /// Blocks until at least one byte arrives. Returns `0` once the peer has
    /// closed, and `0` immediately when `len` is zero.
    pub fn read_range(&self, buf: &mut [u8], offset: usize, len: usize) -> Result<usize> {
        let end = check_range(buf.len(), offset, len)?;
        if len == 0 {
            self.check_live("read")?;
            return Ok(0);
        }

        let stream = self.connected_stream("read")?;
        let end = end.min(offset.saturating_add(self.config.transfer_chunk()));
        let result = stream.read(&mut buf[offset..end], &self.signal);
        self.finish(result)
    }

    /// Write all of `buf`. See [`write_range`](Self::write_range).
    pub fn write(&self, buf: &[u8]) -> Result<()> {
        self.write_range(buf, 0, buf.len())
    }

    /// Write all of `buf[offset..offset + len]`, looping over partial writes.
    pub fn write_range(&self, buf: &[u8], offset: usize, len: usize) -> Result<()> {
        let end = check_range(buf.len(), offset, len)?;
        if len == 0 {
            return self.check_live("write");
        }

        let stream = self.connected_stream("write")?;
        let chunk = self.config.transfer_chunk();
        let mut pending = &buf[offset..end];
        while !pending.is_empty() {
            let take = pending.len().min(chunk);
            let written = self.finish(stream.write(&pending[..take], &self.signal))?;
            if written == 0 {
                return Err(PipeError::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "pipe accepted zero bytes",
                )));
            }
            pending = &pending[written..];
        }
        Ok(())
    }

    /// Close the endpoint. Idempotent; never fails.
    ///
    /// Wakes blocked calls, lets the peer observe end of stream and releases
    /// the rendezvous name.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.signal.raise();

        let (stream, listener, name) = {
            let mut state = self.lock();
            state.mode = Mode::Closed;
            (state.stream.take(), state.listener.take(), state.name.clone())
        };
        if let Some(stream) = &stream {
            stream.shutdown();
        }
        // Handles still held by a waking call are released when it returns.
        drop(stream);
        drop(listener);

        match name {
            Some(name) => debug!(%name, "pipe endpoint closed"),
            None => debug!("pipe endpoint closed"),
        }
    }

    pub fn mode(&self) -> Mode {
        self.lock().mode
    }

    pub fn role(&self) -> Role {
        self.lock().role
    }

    /// The name passed to `listen` or `connect`, if any.
    pub fn name(&self) -> Option<EndpointName> {
        self.lock().name.clone()
    }

    /// Whether the endpoint has not been closed.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &PipeConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_live(&self, operation: &'static str) -> Result<()> {
        match self.lock().mode {
            Mode::Closed => Err(PipeError::Closed),
            Mode::Unbound => Err(PipeError::State {
                operation,
                mode: Mode::Unbound,
            }),
            Mode::Listening | Mode::Connected => Ok(()),
        }
    }

    /// The connected stream, accepting the peer first when still listening.
    fn connected_stream(&self, operation: &'static str) -> Result<Arc<PipeStream>> {
        if let Some(stream) = self.current_stream(operation)? {
            return Ok(stream);
        }

        let _accepting = self
            .accept_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Another caller may have accepted while we waited.
        if let Some(stream) = self.current_stream(operation)? {
            return Ok(stream);
        }

        let listener = self.lock().listener.clone().ok_or(PipeError::Closed)?;
        let stream = Arc::new(self.finish(listener.accept(&self.signal))?);

        let mut state = self.lock();
        if state.mode != Mode::Listening {
            drop(state);
            stream.shutdown();
            return Err(PipeError::Closed);
        }
        state.mode = Mode::Connected;
        state.stream = Some(Arc::clone(&stream));
        if let Some(name) = &state.name {
            debug!(%name, "peer connected");
        }
        Ok(stream)
    }

    /// `Some` when connected, `None` when a listener still has to accept.
    fn current_stream(&self, operation: &'static str) -> Result<Option<Arc<PipeStream>>> {
        let state = self.lock();
        match state.mode {
            Mode::Connected => state.stream.clone().map(Some).ok_or(PipeError::Closed),
            Mode::Listening => Ok(None),
            Mode::Closed => Err(PipeError::Closed),
            Mode::Unbound => Err(PipeError::State {
                operation,
                mode: Mode::Unbound,
            }),
        }
    }

    /// Once closed, every outcome of an in-flight call is `Closed`.
    fn finish<T>(&self, result: Result<T>) -> Result<T> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PipeError::Closed);
        }
        result
    }
}

impl Drop for PipeEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for PipeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("PipeEndpoint")
            .field("mode", &state.mode)
            .field("role", &state.role)
            .field("name", &state.name)
            .finish_non_exhaustive()
    }
}

impl io::Read for &PipeEndpoint {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        PipeEndpoint::read(*self, buf).map_err(Into::into)
    }
}

impl io::Write for &PipeEndpoint {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        PipeEndpoint::write(*self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for PipeEndpoint {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        PipeEndpoint::read(self, buf).map_err(Into::into)
    }
}

impl io::Write for PipeEndpoint {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        PipeEndpoint::write(self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn expect_unbound(state: &State, operation: &'static str) -> Result<()> {
    match state.mode {
        Mode::Unbound => Ok(()),
        Mode::Closed => Err(PipeError::Closed),
        mode => Err(PipeError::State { operation, mode }),
    }
}

fn check_range(buf_len: usize, offset: usize, len: usize) -> Result<usize> {
    match offset.checked_add(len) {
        Some(end) if end <= buf_len => Ok(end),
        _ => Err(PipeError::Bounds {
            offset,
            len,
            buf_len,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipeErrorKind;

    #[test]
    fn endpoint_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PipeEndpoint>();
    }

    #[test]
    fn create_starts_unbound() {
        let endpoint = PipeEndpoint::create().unwrap();
        assert_eq!(endpoint.mode(), Mode::Unbound);
        assert_eq!(endpoint.role(), Role::None);
        assert!(endpoint.name().is_none());
        assert!(endpoint.is_open());
    }

    #[test]
    fn io_on_unbound_is_a_state_error() {
        let endpoint = PipeEndpoint::create().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(
            endpoint.read(&mut buf).unwrap_err().kind(),
            PipeErrorKind::State
        );
        assert_eq!(
            endpoint.write(b"data").unwrap_err().kind(),
            PipeErrorKind::State
        );
        assert_eq!(endpoint.accept().unwrap_err().kind(), PipeErrorKind::State);
    }

    #[test]
    fn zero_length_transfers_still_check_state() {
        let endpoint = PipeEndpoint::create().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(
            endpoint.read_range(&mut buf, 2, 0).unwrap_err().kind(),
            PipeErrorKind::State
        );
        endpoint.close();
        assert!(endpoint.write_range(&buf, 0, 0).unwrap_err().is_closed());
    }

    #[test]
    fn bounds_are_checked_before_state() {
        let endpoint = PipeEndpoint::create().unwrap();
        let mut buf = [0u8; 8];

        let err = endpoint.read_range(&mut buf, 6, 4).unwrap_err();
        assert_eq!(err.kind(), PipeErrorKind::Bounds);

        let err = endpoint.write_range(&buf, usize::MAX, 2).unwrap_err();
        assert_eq!(err.kind(), PipeErrorKind::Bounds);

        let err = endpoint.write_range(&buf, 9, 0).unwrap_err();
        assert_eq!(err.kind(), PipeErrorKind::Bounds);
    }

    #[test]
    fn close_is_idempotent_and_terminal() {
        let endpoint = PipeEndpoint::create().unwrap();
        endpoint.close();
        endpoint.close();
        assert_eq!(endpoint.mode(), Mode::Closed);
        assert!(!endpoint.is_open());

        assert!(endpoint.listen("after-close").unwrap_err().is_closed());
        assert!(endpoint.connect("after-close").unwrap_err().is_closed());
        assert!(endpoint.accept().unwrap_err().is_closed());
        let mut buf = [0u8; 1];
        assert!(endpoint.read(&mut buf).unwrap_err().is_closed());
    }

    #[test]
    fn invalid_name_leaves_endpoint_unbound() {
        let endpoint = PipeEndpoint::create().unwrap();
        let err = endpoint.listen("").unwrap_err();
        assert_eq!(err.kind(), PipeErrorKind::InvalidName);
        assert_eq!(endpoint.mode(), Mode::Unbound);
    }

    #[test]
    fn mode_and_role_display_lowercase() {
        assert_eq!(Mode::Listening.to_string(), "listening");
        assert_eq!(Role::Client.to_string(), "client");
    }
}
