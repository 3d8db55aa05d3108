use crate::config::PipeConfig;
use crate::error::Result;
use crate::name::EndpointName;

#[cfg(windows)]
pub(crate) use crate::named_pipe::CloseSignal;
#[cfg(unix)]
pub(crate) use crate::uds::CloseSignal;

/// Name of the backend compiled into this build.
pub fn transport_name() -> &'static str {
    #[cfg(unix)]
    {
        "unix-domain-socket"
    }
    #[cfg(windows)]
    {
        "windows-named-pipe"
    }
}

/// A bound rendezvous point waiting for its peer.
///
/// On Unix, this wraps a Unix domain socket listener.
/// On Windows, this wraps a single-instance named pipe.
pub(crate) struct PipeListener {
    inner: PipeListenerInner,
}

enum PipeListenerInner {
    #[cfg(unix)]
    Unix(crate::uds::UdsListener),
    #[cfg(windows)]
    Windows(crate::named_pipe::NamedPipeListener),
}

impl PipeListener {
    pub(crate) fn bind(name: &EndpointName, config: &PipeConfig) -> Result<Self> {
        #[cfg(unix)]
        let inner = PipeListenerInner::Unix(crate::uds::UdsListener::bind(name, config)?);
        #[cfg(windows)]
        let inner =
            PipeListenerInner::Windows(crate::named_pipe::NamedPipeListener::bind(name, config)?);
        Ok(Self { inner })
    }

    pub(crate) fn accept(&self, signal: &CloseSignal) -> Result<PipeStream> {
        let inner = match &self.inner {
            #[cfg(unix)]
            PipeListenerInner::Unix(listener) => PipeStreamInner::Unix(listener.accept(signal)?),
            #[cfg(windows)]
            PipeListenerInner::Windows(listener) => {
                PipeStreamInner::Windows(listener.accept(signal)?)
            }
        };
        Ok(PipeStream { inner })
    }
}

/// A connected byte stream, either end.
pub(crate) struct PipeStream {
    inner: PipeStreamInner,
}

enum PipeStreamInner {
    #[cfg(unix)]
    Unix(crate::uds::UdsStream),
    #[cfg(windows)]
    Windows(crate::named_pipe::NamedPipeStream),
}

impl PipeStream {
    pub(crate) fn connect(
        name: &EndpointName,
        config: &PipeConfig,
        signal: &CloseSignal,
    ) -> Result<Self> {
        #[cfg(unix)]
        let inner = PipeStreamInner::Unix(crate::uds::UdsStream::connect(name, config, signal)?);
        #[cfg(windows)]
        let inner = PipeStreamInner::Windows(crate::named_pipe::NamedPipeStream::connect(
            name, config, signal,
        )?);
        Ok(Self { inner })
    }

    /// Blocking read of at most `buf.len()` bytes; `0` at end of stream.
    pub(crate) fn read(&self, buf: &mut [u8], signal: &CloseSignal) -> Result<usize> {
        match &self.inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => stream.read(buf, signal),
            #[cfg(windows)]
            PipeStreamInner::Windows(stream) => stream.read(buf, signal),
        }
    }

    /// Blocking write of some prefix of `buf`.
    pub(crate) fn write(&self, buf: &[u8], signal: &CloseSignal) -> Result<usize> {
        match &self.inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => stream.write(buf, signal),
            #[cfg(windows)]
            PipeStreamInner::Windows(stream) => stream.write(buf, signal),
        }
    }

    pub(crate) fn shutdown(&self) {
        match &self.inner {
            #[cfg(unix)]
            PipeStreamInner::Unix(stream) => stream.shutdown(),
            #[cfg(windows)]
            PipeStreamInner::Windows(stream) => stream.shutdown(),
        }
    }
}
