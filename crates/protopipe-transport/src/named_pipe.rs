use std::ffi::OsStr;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::ptr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};
use windows_sys::Win32::Foundation::{
    ERROR_ACCESS_DENIED, ERROR_BROKEN_PIPE, ERROR_FILE_NOT_FOUND, ERROR_IO_PENDING,
    ERROR_NO_DATA, ERROR_PIPE_BUSY, ERROR_PIPE_CONNECTED, ERROR_PIPE_NOT_CONNECTED,
    GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadFile, WriteFile, FILE_FLAG_FIRST_PIPE_INSTANCE, FILE_FLAG_OVERLAPPED,
    OPEN_EXISTING, PIPE_ACCESS_DUPLEX,
};
use windows_sys::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, WaitNamedPipeW, PIPE_READMODE_BYTE,
    PIPE_REJECT_REMOTE_CLIENTS, PIPE_TYPE_BYTE, PIPE_WAIT,
};
use windows_sys::Win32::System::Threading::{
    CreateEventW, SetEvent, WaitForMultipleObjects, WaitForSingleObject, INFINITE,
};
use windows_sys::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};

use crate::config::PipeConfig;
use crate::error::{PipeError, Result};
use crate::name::EndpointName;

/// Pause between attempts while a configured connect wait is running.
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Manual-reset event raised by `close()`; every overlapped wait watches it.
pub(crate) struct CloseSignal {
    event: OwnedHandle,
}

impl CloseSignal {
    pub(crate) fn new() -> io::Result<Self> {
        Ok(Self {
            event: create_event()?,
        })
    }

    pub(crate) fn raise(&self) {
        // SAFETY: `event` is a live event handle owned by this signal.
        if unsafe { SetEvent(self.raw()) } == 0 {
            debug!(error = %io::Error::last_os_error(), "close signal set failed");
        }
    }

    /// Wait up to `timeout` for the signal. Returns `true` once raised.
    fn wait(&self, timeout: Duration) -> io::Result<bool> {
        // SAFETY: `event` is a live event handle owned by this signal.
        let rc = unsafe { WaitForSingleObject(self.raw(), millis(timeout)) };
        match rc {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(io::Error::last_os_error()),
        }
    }

    fn raw(&self) -> HANDLE {
        self.event.as_raw_handle()
    }
}

fn create_event() -> io::Result<OwnedHandle> {
    // SAFETY: null attributes and name are permitted; manual reset, initially unset.
    let handle = unsafe { CreateEventW(ptr::null(), 1, 0, ptr::null()) };
    if handle.is_null() {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: CreateEventW returned a fresh handle that nothing else owns.
    Ok(unsafe { OwnedHandle::from_raw_handle(handle) })
}

enum Completion {
    Done(u32),
    Closed,
}

/// Issue one overlapped operation on `handle` and wait for it or the close signal.
///
/// On close the operation is cancelled and drained before returning, so the
/// `OVERLAPPED` never outlives this frame while the kernel still owns it.
fn overlapped_io(
    handle: HANDLE,
    signal: &CloseSignal,
    issue: impl FnOnce(*mut OVERLAPPED) -> i32,
) -> io::Result<Completion> {
    let event = create_event()?;
    // SAFETY: OVERLAPPED is plain data; all-zero is its documented initial state.
    let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
    overlapped.hEvent = event.as_raw_handle();
    let ov: *mut OVERLAPPED = &mut overlapped;

    if issue(ov) == 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(ERROR_IO_PENDING as i32) {
            return Err(err);
        }

        let handles = [event.as_raw_handle(), signal.raw()];
        // SAFETY: both handles stay open for the duration of the wait.
        let rc = unsafe { WaitForMultipleObjects(2, handles.as_ptr(), 0, INFINITE) };
        if rc == WAIT_OBJECT_0 + 1 {
            // SAFETY: `ov` points at the in-flight operation issued above.
            unsafe { CancelIoEx(handle, ov) };
            let _ = overlapped_result(handle, ov, true);
            return Ok(Completion::Closed);
        }
        if rc != WAIT_OBJECT_0 {
            let err = io::Error::last_os_error();
            // SAFETY: as above; the operation must settle before `overlapped` drops.
            unsafe { CancelIoEx(handle, ov) };
            let _ = overlapped_result(handle, ov, true);
            return Err(err);
        }
    }

    overlapped_result(handle, ov, false).map(Completion::Done)
}

fn overlapped_result(handle: HANDLE, ov: *mut OVERLAPPED, wait: bool) -> io::Result<u32> {
    let mut transferred = 0u32;
    // SAFETY: `ov` is the OVERLAPPED used to issue the operation on `handle`.
    let ok = unsafe { GetOverlappedResult(handle, ov, &mut transferred, i32::from(wait)) };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(transferred)
}

/// Single-instance byte-mode named pipe server.
pub(crate) struct NamedPipeListener {
    handle: Arc<OwnedHandle>,
    path: String,
}

impl NamedPipeListener {
    pub(crate) fn bind(name: &EndpointName, config: &PipeConfig) -> Result<Self> {
        let path = name.address().to_string_lossy().into_owned();
        let wide = to_wide(name.address().as_os_str());

        // SAFETY: `wide` is NUL-terminated and outlives the call.
        let handle = unsafe {
            CreateNamedPipeW(
                wide.as_ptr(),
                PIPE_ACCESS_DUPLEX | FILE_FLAG_OVERLAPPED | FILE_FLAG_FIRST_PIPE_INSTANCE,
                PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_WAIT | PIPE_REJECT_REMOTE_CLIENTS,
                1,
                config.pipe_buffer_size,
                config.pipe_buffer_size,
                0,
                ptr::null(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            let err = io::Error::last_os_error();
            if os_error_is(&err, ERROR_ACCESS_DENIED) || os_error_is(&err, ERROR_PIPE_BUSY) {
                debug!(%path, "pipe name is held by another listener");
                return Err(PipeError::name_in_use(name.as_str()));
            }
            return Err(PipeError::Bind {
                name: name.to_string(),
                source: err,
            });
        }

        info!(%path, "listening on named pipe");

        Ok(Self {
            // SAFETY: CreateNamedPipeW returned a fresh handle that nothing else owns.
            handle: Arc::new(unsafe { OwnedHandle::from_raw_handle(handle) }),
            path,
        })
    }

    /// Wait for the single client, waking early if the endpoint closes.
    pub(crate) fn accept(&self, signal: &CloseSignal) -> Result<NamedPipeStream> {
        let handle = self.handle.as_raw_handle();
        // SAFETY: `handle` is the listener's pipe and `ov` is supplied by overlapped_io.
        let result = overlapped_io(handle, signal, |ov| unsafe { ConnectNamedPipe(handle, ov) });
        match result {
            Ok(Completion::Done(_)) => {}
            Ok(Completion::Closed) => return Err(PipeError::Closed),
            // Client connected before or while we were waiting.
            Err(err) if os_error_is(&err, ERROR_PIPE_CONNECTED) => {}
            Err(err) if os_error_is(&err, ERROR_NO_DATA) => {}
            Err(err) => return Err(PipeError::Io(err)),
        }

        debug!(path = %self.path, "accepted named pipe client");
        Ok(NamedPipeStream {
            handle: Arc::clone(&self.handle),
        })
    }
}

/// Connected named pipe handle, either end.
pub(crate) struct NamedPipeStream {
    handle: Arc<OwnedHandle>,
}

impl NamedPipeStream {
    /// Connect to `name`, waiting up to `config.connect_timeout` for a free instance.
    pub(crate) fn connect(
        name: &EndpointName,
        config: &PipeConfig,
        signal: &CloseSignal,
    ) -> Result<Self> {
        let wide = to_wide(name.address().as_os_str());
        let started = Instant::now();
        loop {
            // SAFETY: `wide` is NUL-terminated; null security attributes and template are allowed.
            let handle = unsafe {
                CreateFileW(
                    wide.as_ptr(),
                    GENERIC_READ | GENERIC_WRITE,
                    0,
                    ptr::null(),
                    OPEN_EXISTING,
                    FILE_FLAG_OVERLAPPED,
                    ptr::null_mut(),
                )
            };
            if handle != INVALID_HANDLE_VALUE {
                debug!(path = ?name.address(), "connected to named pipe");
                return Ok(Self {
                    // SAFETY: CreateFileW returned a fresh handle that nothing else owns.
                    handle: Arc::new(unsafe { OwnedHandle::from_raw_handle(handle) }),
                });
            }

            let err = io::Error::last_os_error();
            let busy = os_error_is(&err, ERROR_PIPE_BUSY);
            if !busy && !os_error_is(&err, ERROR_FILE_NOT_FOUND) {
                return Err(PipeError::Io(err));
            }
            let Some(timeout) = config.connect_timeout else {
                if busy {
                    return Err(PipeError::Connect {
                        name: name.to_string(),
                        source: err,
                    });
                }
                return Err(PipeError::from_connect(name.as_str(), err));
            };

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(PipeError::Timeout {
                    name: name.to_string(),
                    waited,
                });
            }
            let pause = (timeout - waited).min(CONNECT_RETRY_INTERVAL);
            if busy {
                // SAFETY: `wide` is NUL-terminated. A failed wait just means we retry.
                unsafe { WaitNamedPipeW(wide.as_ptr(), millis(pause)) };
                if signal.wait(Duration::ZERO)? {
                    return Err(PipeError::Closed);
                }
            } else if signal.wait(pause)? {
                return Err(PipeError::Closed);
            }
        }
    }

    /// Read at least one byte, `0` once the peer has gone.
    pub(crate) fn read(&self, buf: &mut [u8], signal: &CloseSignal) -> Result<usize> {
        let handle = self.handle.as_raw_handle();
        let len = buf.len().min(u32::MAX as usize) as u32;
        let data = buf.as_mut_ptr();
        // SAFETY: `data` is valid for `len` bytes until overlapped_io returns.
        let result = overlapped_io(handle, signal, |ov| unsafe {
            ReadFile(handle, data.cast(), len, ptr::null_mut(), ov)
        });
        match result {
            Ok(Completion::Done(n)) => Ok(n as usize),
            Ok(Completion::Closed) => Err(PipeError::Closed),
            Err(err) if is_end_of_stream(&err) => Ok(0),
            Err(err) => Err(PipeError::Io(err)),
        }
    }

    /// Write some of `buf`, returning how many bytes the pipe took.
    pub(crate) fn write(&self, buf: &[u8], signal: &CloseSignal) -> Result<usize> {
        let handle = self.handle.as_raw_handle();
        let len = buf.len().min(u32::MAX as usize) as u32;
        let data = buf.as_ptr();
        // SAFETY: `data` is valid for `len` bytes until overlapped_io returns.
        let result = overlapped_io(handle, signal, |ov| unsafe {
            WriteFile(handle, data.cast(), len, ptr::null_mut(), ov)
        });
        match result {
            Ok(Completion::Done(n)) => Ok(n as usize),
            Ok(Completion::Closed) => Err(PipeError::Closed),
            Err(err) => Err(PipeError::Io(err)),
        }
    }

    /// Cancel any I/O still pending on the handle.
    pub(crate) fn shutdown(&self) {
        // SAFETY: null cancels every outstanding operation on our own handle.
        unsafe { CancelIoEx(self.handle.as_raw_handle(), ptr::null()) };
    }
}

fn is_end_of_stream(err: &io::Error) -> bool {
    os_error_is(err, ERROR_BROKEN_PIPE) || os_error_is(err, ERROR_PIPE_NOT_CONNECTED)
}

fn os_error_is(err: &io::Error, code: u32) -> bool {
    err.raw_os_error() == Some(code as i32)
}

fn millis(duration: Duration) -> u32 {
    let ms = duration.as_nanos().div_ceil(1_000_000);
    ms.min(u128::from(INFINITE - 1)) as u32
}

fn to_wide(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(std::iter::once(0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipeErrorKind;

    fn unique_name(tag: &str) -> EndpointName {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos();
        EndpointName::new(&format!("np-{tag}-{}-{nanos}", std::process::id()))
            .expect("name should resolve")
    }

    #[test]
    fn second_listener_is_rejected() {
        let name = unique_name("dup");
        let _first = NamedPipeListener::bind(&name, &PipeConfig::default()).unwrap();
        let err = NamedPipeListener::bind(&name, &PipeConfig::default())
            .err()
            .expect("second bind should fail");
        assert_eq!(err.kind(), PipeErrorKind::Bind);
    }

    #[test]
    fn connect_without_listener_is_connect_error() {
        let name = unique_name("missing");
        let signal = CloseSignal::new().unwrap();
        let err = NamedPipeStream::connect(&name, &PipeConfig::default(), &signal)
            .err()
            .expect("connect should fail");
        assert_eq!(err.kind(), PipeErrorKind::Connect);
    }

    #[test]
    fn raised_signal_wakes_accept() {
        let name = unique_name("wake");
        let listener = NamedPipeListener::bind(&name, &PipeConfig::default()).unwrap();
        let signal = CloseSignal::new().unwrap();
        signal.raise();
        let err = listener.accept(&signal).err().expect("accept should fail");
        assert!(err.is_closed());
    }

    #[test]
    fn millis_rounds_up() {
        assert_eq!(millis(Duration::from_micros(1)), 1);
        assert_eq!(millis(Duration::ZERO), 0);
    }
}
