use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use protopipe_transport::{PipeConfig, PipeEndpoint, PipeError};

use crate::cmd::{check_chunk, EchoArgs};
use crate::exit::{pipe_error, CliError, CliResult, SUCCESS};
use crate::output::OutputFormat;

/// Endpoint currently serving a peer, closed by the Ctrl-C handler.
type ActiveEndpoint = Arc<Mutex<Option<Arc<PipeEndpoint>>>>;

enum SessionEnd {
    PeerClosed,
    Interrupted,
}

pub fn run(args: EchoArgs, _format: OutputFormat) -> CliResult<i32> {
    let chunk = check_chunk(args.chunk)?;
    let running = Arc::new(AtomicBool::new(true));
    let active: ActiveEndpoint = Arc::new(Mutex::new(None));
    install_ctrlc_handler(running.clone(), active.clone())?;

    let config = PipeConfig::from_env();
    while running.load(Ordering::SeqCst) {
        let endpoint = Arc::new(
            PipeEndpoint::create_with_config(config.clone())
                .map_err(|err| pipe_error("create failed", err))?,
        );
        endpoint
            .listen(&args.name)
            .map_err(|err| pipe_error("listen failed", err))?;
        *active.lock().unwrap_or_else(PoisonError::into_inner) = Some(endpoint.clone());

        // Ctrl-C may have fired before the endpoint was published.
        if !running.load(Ordering::SeqCst) {
            endpoint.close();
            break;
        }

        let outcome = serve_peer(&endpoint, chunk);
        active.lock().unwrap_or_else(PoisonError::into_inner).take();
        endpoint.close();

        match outcome {
            Ok(SessionEnd::PeerClosed) => continue,
            Ok(SessionEnd::Interrupted) => break,
            Err(err) => return Err(err),
        }
    }

    Ok(SUCCESS)
}

fn serve_peer(endpoint: &PipeEndpoint, chunk: usize) -> CliResult<SessionEnd> {
    let mut buf = vec![0u8; chunk];
    loop {
        let n = match endpoint.read(&mut buf) {
            Ok(0) => return Ok(SessionEnd::PeerClosed),
            Ok(n) => n,
            Err(err) => return classify_session_error(err, "receive failed"),
        };

        tracing::info!(size = n, "echoing bytes");

        if let Err(err) = endpoint.write(&buf[..n]) {
            return classify_session_error(err, "echo send failed");
        }
    }
}

fn classify_session_error(err: PipeError, context: &str) -> CliResult<SessionEnd> {
    if err.is_closed() {
        return Ok(SessionEnd::Interrupted);
    }
    if matches!(err, PipeError::Io(_)) {
        // Peer vanished mid-echo; serve the next one.
        tracing::warn!(error = %err, "{context}");
        return Ok(SessionEnd::PeerClosed);
    }
    Err(pipe_error(context, err))
}

fn install_ctrlc_handler(running: Arc<AtomicBool>, active: ActiveEndpoint) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
        if let Some(endpoint) = active.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            endpoint.close();
        }
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn local_close_stops_the_loop() {
        let end = classify_session_error(PipeError::Closed, "receive failed").unwrap();
        assert!(matches!(end, SessionEnd::Interrupted));
    }

    #[test]
    fn broken_peer_moves_to_next_session() {
        let err = PipeError::Io(io::Error::from(io::ErrorKind::BrokenPipe));
        let end = classify_session_error(err, "echo send failed").unwrap();
        assert!(matches!(end, SessionEnd::PeerClosed));
    }

    #[test]
    fn state_errors_are_fatal() {
        let err = PipeError::State {
            operation: "read",
            mode: protopipe_transport::Mode::Unbound,
        };
        assert!(classify_session_error(err, "receive failed").is_err());
    }
}
