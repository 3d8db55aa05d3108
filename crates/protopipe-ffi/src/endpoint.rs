use std::os::raw::c_char;

use protopipe_transport::{PipeConfig, PipeEndpoint};

use crate::error;
use crate::transport;
use crate::types::{mode_code, ProtoPipeHandle, ProtoPipeResult};

/// Borrow the endpoint behind `handle`.
///
/// Shared borrows only, so `protopipe_close` can run while another thread is
/// blocked in `protopipe_read` on the same handle.
fn with_endpoint<T>(
    handle: ProtoPipeHandle,
    on_error: T,
    f: impl FnOnce(&PipeEndpoint) -> T,
) -> T {
    if handle.is_null() {
        let _ = error::set_invalid_argument("endpoint handle cannot be null");
        return on_error;
    }

    let endpoint = {
        // SAFETY: Pointer validity is guaranteed by the caller.
        unsafe { &*(handle as *const PipeEndpoint) }
    };

    f(endpoint)
}

fn status(result: protopipe_transport::Result<impl Sized>) -> ProtoPipeResult {
    match result {
        Ok(_) => ProtoPipeResult::Ok,
        Err(err) => error::map_pipe_error(&err),
    }
}

/// Create an unbound endpoint configured from `PROTOPIPE_*` environment variables.
///
/// Returns null when native resources cannot be allocated.
#[no_mangle]
pub extern "C" fn protopipe_create() -> ProtoPipeHandle {
    crate::ffi_boundary(std::ptr::null_mut(), || {
        error::clear_error_state();

        match PipeEndpoint::create_with_config(PipeConfig::from_env()) {
            Ok(endpoint) => Box::into_raw(Box::new(endpoint)) as ProtoPipeHandle,
            Err(err) => {
                let _ = error::map_pipe_error(&err);
                std::ptr::null_mut()
            }
        }
    })
}

/// Bind `name` and become the server side.
///
/// # Safety
/// `handle` must come from `protopipe_create` and not yet be destroyed.
/// `name` must be a non-null pointer to a valid UTF-8, NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn protopipe_listen(
    handle: ProtoPipeHandle,
    name: *const c_char,
) -> ProtoPipeResult {
    crate::ffi_boundary(ProtoPipeResult::Internal, || {
        error::clear_error_state();

        let name = {
            // SAFETY: We validate null and UTF-8 in helper.
            match unsafe { transport::required_str_arg(name, "name") } {
                Some(v) => v,
                None => return ProtoPipeResult::InvalidArgument,
            }
        };

        with_endpoint(handle, ProtoPipeResult::InvalidArgument, |endpoint| {
            status(endpoint.listen(name))
        })
    })
}

/// Block until the peer of a listening endpoint connects.
///
/// # Safety
/// `handle` must come from `protopipe_create` and not yet be destroyed.
#[no_mangle]
pub unsafe extern "C" fn protopipe_accept(handle: ProtoPipeHandle) -> ProtoPipeResult {
    crate::ffi_boundary(ProtoPipeResult::Internal, || {
        error::clear_error_state();
        with_endpoint(handle, ProtoPipeResult::InvalidArgument, |endpoint| {
            status(endpoint.accept())
        })
    })
}

/// Connect to the listener at `name` and become the client side.
///
/// # Safety
/// `handle` must come from `protopipe_create` and not yet be destroyed.
/// `name` must be a non-null pointer to a valid UTF-8, NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn protopipe_connect(
    handle: ProtoPipeHandle,
    name: *const c_char,
) -> ProtoPipeResult {
    crate::ffi_boundary(ProtoPipeResult::Internal, || {
        error::clear_error_state();

        let name = {
            // SAFETY: We validate null and UTF-8 in helper.
            match unsafe { transport::required_str_arg(name, "name") } {
                Some(v) => v,
                None => return ProtoPipeResult::InvalidArgument,
            }
        };

        with_endpoint(handle, ProtoPipeResult::InvalidArgument, |endpoint| {
            status(endpoint.connect(name))
        })
    })
}

/// Read up to `length` bytes into `buf[offset..offset + length]`.
///
/// `*out_read` is set to the byte count; `0` means the peer closed.
///
/// # Safety
/// `handle` must come from `protopipe_create` and not yet be destroyed.
/// If `buf_len > 0`, `buf` must be writable for `buf_len` bytes.
/// `out_read` must be a valid pointer to a `size_t`.
#[no_mangle]
pub unsafe extern "C" fn protopipe_read(
    handle: ProtoPipeHandle,
    buf: *mut u8,
    buf_len: usize,
    offset: i64,
    length: i64,
    out_read: *mut usize,
) -> ProtoPipeResult {
    crate::ffi_boundary(ProtoPipeResult::Internal, || {
        error::clear_error_state();

        if out_read.is_null() {
            return error::set_invalid_argument("out_read cannot be null");
        }
        // SAFETY: `out_read` is non-null and the caller guarantees it is writable.
        unsafe { *out_read = 0 };

        let Some((offset, length)) = transport::range_arg(offset, length) else {
            error::set_error_message(format!(
                "buffer range out of bounds (offset {offset}, len {length}, buffer {buf_len} bytes)"
            ));
            return ProtoPipeResult::Bounds;
        };
        let buf = {
            // SAFETY: Pointer and length validity are guaranteed by the caller.
            match unsafe { transport::bytes_mut_arg(buf, buf_len, "buf") } {
                Some(v) => v,
                None => return ProtoPipeResult::InvalidArgument,
            }
        };

        with_endpoint(handle, ProtoPipeResult::InvalidArgument, |endpoint| {
            match endpoint.read_range(buf, offset, length) {
                Ok(n) => {
                    // SAFETY: Checked non-null above.
                    unsafe { *out_read = n };
                    ProtoPipeResult::Ok
                }
                Err(err) => error::map_pipe_error(&err),
            }
        })
    })
}

/// Write all of `buf[offset..offset + length]`.
///
/// # Safety
/// `handle` must come from `protopipe_create` and not yet be destroyed.
/// If `buf_len > 0`, `buf` must be readable for `buf_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn protopipe_write(
    handle: ProtoPipeHandle,
    buf: *const u8,
    buf_len: usize,
    offset: i64,
    length: i64,
) -> ProtoPipeResult {
    crate::ffi_boundary(ProtoPipeResult::Internal, || {
        error::clear_error_state();

        let Some((offset, length)) = transport::range_arg(offset, length) else {
            error::set_error_message(format!(
                "buffer range out of bounds (offset {offset}, len {length}, buffer {buf_len} bytes)"
            ));
            return ProtoPipeResult::Bounds;
        };
        let buf = {
            // SAFETY: Pointer and length validity are guaranteed by the caller.
            match unsafe { transport::bytes_arg(buf, buf_len, "buf") } {
                Some(v) => v,
                None => return ProtoPipeResult::InvalidArgument,
            }
        };

        with_endpoint(handle, ProtoPipeResult::InvalidArgument, |endpoint| {
            status(endpoint.write_range(buf, offset, length))
        })
    })
}

/// Close the endpoint. Idempotent, and safe while another thread is blocked on it.
///
/// # Safety
/// `handle` must be null or come from `protopipe_create` and not yet be destroyed.
#[no_mangle]
pub unsafe extern "C" fn protopipe_close(handle: ProtoPipeHandle) {
    crate::ffi_boundary((), || {
        if handle.is_null() {
            return;
        }
        with_endpoint(handle, (), PipeEndpoint::close);
    })
}

/// Close the endpoint if still open and free it. Null is a no-op.
///
/// # Safety
/// `handle` must be null or come from `protopipe_create`, must not already be
/// destroyed, and no other thread may still be using it.
#[no_mangle]
pub unsafe extern "C" fn protopipe_destroy(handle: ProtoPipeHandle) {
    crate::ffi_boundary((), || {
        if handle.is_null() {
            return;
        }

        // SAFETY: Handle was allocated by protopipe_create using Box::into_raw.
        let endpoint = unsafe { Box::from_raw(handle as *mut PipeEndpoint) };
        endpoint.close();
        drop(endpoint);
    })
}

/// Current mode: 0 unbound, 1 listening, 2 connected, 3 closed; -1 for a null handle.
///
/// # Safety
/// `handle` must be null or come from `protopipe_create` and not yet be destroyed.
#[no_mangle]
pub unsafe extern "C" fn protopipe_mode(handle: ProtoPipeHandle) -> i32 {
    crate::ffi_boundary(-1, || {
        with_endpoint(handle, -1, |endpoint| mode_code(endpoint.mode()))
    })
}
