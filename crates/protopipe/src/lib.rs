//! Blocking byte-stream local pipes for Unix and Windows.
//!
//! protopipe connects two processes on the same machine through a named
//! rendezvous point: a Unix domain socket on Unix, a byte-mode named pipe on
//! Windows. One side listens, the other connects, and both move bytes with
//! blocking `read`/`write` calls that a concurrent `close` can interrupt.
//!
//! # Crate Structure
//!
//! - [`transport`]: the endpoint, its configuration and error types
//!
//! The most used types are also re-exported at the crate root.

/// Re-export transport types.
pub mod transport {
    pub use protopipe_transport::*;
}

pub use protopipe_transport::{
    transport_name, EndpointName, Mode, PipeConfig, PipeEndpoint, PipeError, PipeErrorKind,
    Result, Role,
};
