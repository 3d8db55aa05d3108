use std::ffi::c_void;

use protopipe_transport::{Mode, PipeError, PipeErrorKind};

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoPipeResult {
    Ok = 0,
    InvalidArgument = 1,
    Resource = 2,
    State = 3,
    Bounds = 4,
    Bind = 5,
    Connect = 6,
    Timeout = 7,
    Io = 8,
    Closed = 9,
    Internal = 99,
}

impl From<&PipeError> for ProtoPipeResult {
    fn from(err: &PipeError) -> Self {
        if err.is_closed() {
            return ProtoPipeResult::Closed;
        }
        match err.kind() {
            PipeErrorKind::Resource => ProtoPipeResult::Resource,
            PipeErrorKind::State => ProtoPipeResult::State,
            PipeErrorKind::Bounds => ProtoPipeResult::Bounds,
            PipeErrorKind::InvalidName => ProtoPipeResult::InvalidArgument,
            PipeErrorKind::Bind => ProtoPipeResult::Bind,
            PipeErrorKind::Connect => ProtoPipeResult::Connect,
            PipeErrorKind::Timeout => ProtoPipeResult::Timeout,
            PipeErrorKind::Io => ProtoPipeResult::Io,
        }
    }
}

#[allow(dead_code)]
pub const PROTOPIPE_OK: ProtoPipeResult = ProtoPipeResult::Ok;
#[allow(dead_code)]
pub const PROTOPIPE_ERR_INVALID_ARGUMENT: ProtoPipeResult = ProtoPipeResult::InvalidArgument;
#[allow(dead_code)]
pub const PROTOPIPE_ERR_RESOURCE: ProtoPipeResult = ProtoPipeResult::Resource;
#[allow(dead_code)]
pub const PROTOPIPE_ERR_STATE: ProtoPipeResult = ProtoPipeResult::State;
#[allow(dead_code)]
pub const PROTOPIPE_ERR_BOUNDS: ProtoPipeResult = ProtoPipeResult::Bounds;
#[allow(dead_code)]
pub const PROTOPIPE_ERR_BIND: ProtoPipeResult = ProtoPipeResult::Bind;
#[allow(dead_code)]
pub const PROTOPIPE_ERR_CONNECT: ProtoPipeResult = ProtoPipeResult::Connect;
#[allow(dead_code)]
pub const PROTOPIPE_ERR_TIMEOUT: ProtoPipeResult = ProtoPipeResult::Timeout;
#[allow(dead_code)]
pub const PROTOPIPE_ERR_IO: ProtoPipeResult = ProtoPipeResult::Io;
#[allow(dead_code)]
pub const PROTOPIPE_ERR_CLOSED: ProtoPipeResult = ProtoPipeResult::Closed;
#[allow(dead_code)]
pub const PROTOPIPE_ERR_INTERNAL: ProtoPipeResult = ProtoPipeResult::Internal;

/// Values returned by `protopipe_mode`.
pub const PROTOPIPE_MODE_UNBOUND: i32 = 0;
pub const PROTOPIPE_MODE_LISTENING: i32 = 1;
pub const PROTOPIPE_MODE_CONNECTED: i32 = 2;
pub const PROTOPIPE_MODE_CLOSED: i32 = 3;

pub(crate) fn mode_code(mode: Mode) -> i32 {
    match mode {
        Mode::Unbound => PROTOPIPE_MODE_UNBOUND,
        Mode::Listening => PROTOPIPE_MODE_LISTENING,
        Mode::Connected => PROTOPIPE_MODE_CONNECTED,
        Mode::Closed => PROTOPIPE_MODE_CLOSED,
    }
}

pub type ProtoPipeHandle = *mut c_void;
