//! protopipe-ffi: C-ABI exports for protopipe endpoints.
//!
//! Every entry point runs inside a panic boundary and records a thread-local
//! error message readable through [`protopipe_last_error`].

mod endpoint;
mod error;
mod transport;
mod types;

use std::panic::AssertUnwindSafe;

pub use endpoint::{
    protopipe_accept, protopipe_close, protopipe_connect, protopipe_create, protopipe_destroy,
    protopipe_listen, protopipe_mode, protopipe_read, protopipe_write,
};
pub use types::{
    ProtoPipeHandle, ProtoPipeResult, PROTOPIPE_ERR_BIND, PROTOPIPE_ERR_BOUNDS,
    PROTOPIPE_ERR_CLOSED, PROTOPIPE_ERR_CONNECT, PROTOPIPE_ERR_INTERNAL,
    PROTOPIPE_ERR_INVALID_ARGUMENT, PROTOPIPE_ERR_IO, PROTOPIPE_ERR_RESOURCE,
    PROTOPIPE_ERR_STATE, PROTOPIPE_ERR_TIMEOUT, PROTOPIPE_MODE_CLOSED,
    PROTOPIPE_MODE_CONNECTED, PROTOPIPE_MODE_LISTENING, PROTOPIPE_MODE_UNBOUND, PROTOPIPE_OK,
};

fn ffi_boundary<T>(on_panic: T, f: impl FnOnce() -> T) -> T {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error::set_panic_error();
            on_panic
        }
    }
}

#[no_mangle]
pub extern "C" fn protopipe_init() -> ProtoPipeResult {
    ffi_boundary(ProtoPipeResult::Internal, || {
        error::clear_error_state();
        ProtoPipeResult::Ok
    })
}

#[no_mangle]
pub extern "C" fn protopipe_cleanup() {
    ffi_boundary((), || {
        error::clear_error_state();
    });
}

#[no_mangle]
pub extern "C" fn protopipe_last_error() -> *const std::os::raw::c_char {
    ffi_boundary(std::ptr::null(), error::last_error_ptr)
}
