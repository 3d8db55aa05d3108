//! Cross-platform local pipe endpoints.
//!
//! A [`PipeEndpoint`] either listens on a named local rendezvous point or
//! connects to one, then moves bytes with blocking `read`/`write` calls:
//! - Unix domain stream sockets (Linux/macOS)
//! - Byte-mode named pipes (Windows)
//!
//! Both backends present the same byte-stream contract. A short read is
//! normal, writes always send the whole range, a peer close reads as `0`,
//! and [`PipeEndpoint::close`] may be called from another thread to unblock
//! a pending `read`, `write`, `accept` or `connect`.
//!
//! ```no_run
//! use protopipe_transport::PipeEndpoint;
//!
//! # fn main() -> protopipe_transport::Result<()> {
//! let server = PipeEndpoint::create()?;
//! server.listen("example-pipe")?;
//!
//! let mut buf = [0u8; 1024];
//! let n = server.read(&mut buf)?; // accepts the first peer, then reads
//! server.write(&buf[..n])?;
//! server.close();
//! # Ok(())
//! # }
//! ```

#[cfg(not(any(unix, windows)))]
compile_error!("protopipe-transport supports Unix and Windows targets only");

pub mod config;
pub mod endpoint;
pub mod error;
pub mod name;

mod transport;

#[cfg(windows)]
mod named_pipe;
#[cfg(unix)]
mod uds;

pub use config::PipeConfig;
pub use endpoint::{Mode, PipeEndpoint, Role};
pub use error::{PipeError, PipeErrorKind, Result};
pub use name::EndpointName;
pub use transport::transport_name;
