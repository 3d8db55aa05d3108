use std::fs;

use protopipe_transport::{PipeConfig, PipeEndpoint};
use serde::Serialize;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{io_error, pipe_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::OutputFormat;

/// Largest message assembled from command-line words.
const MAX_MESSAGE_LEN: usize = 8192;

#[derive(Serialize)]
struct SendOutput<'a> {
    pipe: &'a str,
    bytes: usize,
}

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = resolve_payload(&args)?;

    let mut config = PipeConfig::from_env();
    if let Some(timeout) = &args.timeout {
        config = config.with_connect_timeout(parse_duration(timeout)?);
    }

    let endpoint =
        PipeEndpoint::create_with_config(config).map_err(|err| pipe_error("create failed", err))?;
    endpoint
        .connect(&args.name)
        .map_err(|err| pipe_error("connect failed", err))?;
    endpoint
        .write(&payload)
        .map_err(|err| pipe_error("send failed", err))?;
    endpoint.close();

    tracing::debug!(pipe = %args.name, size = payload.len(), "message sent");
    print_sent(&args.name, payload.len(), format);
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }

    let message = args.message.join(" ");
    if message.len() > MAX_MESSAGE_LEN {
        return Err(CliError::new(
            USAGE,
            format!(
                "message is {} bytes, max {MAX_MESSAGE_LEN}; use --file for larger payloads",
                message.len()
            ),
        ));
    }
    Ok(message.into_bytes())
}

fn print_sent(pipe: &str, bytes: usize, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = SendOutput { pipe, bytes };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("sent {bytes} bytes to {pipe}");
        }
        OutputFormat::Raw => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(message: &[&str]) -> SendArgs {
        SendArgs {
            name: "test-pipe".to_string(),
            message: message.iter().map(|s| s.to_string()).collect(),
            file: None,
            timeout: None,
        }
    }

    #[test]
    fn words_are_joined_with_single_spaces() {
        let payload = resolve_payload(&args(&["set", "rate", "10"])).unwrap();
        assert_eq!(payload, b"set rate 10");
    }

    #[test]
    fn oversized_message_is_rejected() {
        let word = "x".repeat(MAX_MESSAGE_LEN);
        let err = resolve_payload(&args(&[&word, "y"])).unwrap_err();
        assert_eq!(err.code, USAGE);
    }
}
