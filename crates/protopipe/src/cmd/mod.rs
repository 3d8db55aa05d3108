use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod doctor;
pub mod echo;
pub mod recv;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Listen on a pipe and echo bytes back to each peer.
    Echo(EchoArgs),
    /// Connect to a pipe and send a message.
    Send(SendArgs),
    /// Listen on a pipe and print what one peer sends.
    Recv(RecvArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Run local environment health checks.
    Doctor(DoctorArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Echo(args) => echo::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Recv(args) => recv::run(args, format),
        Command::Version(args) => version::run(args),
        Command::Doctor(args) => doctor::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Pipe name to listen on.
    pub name: String,
    /// Read buffer size in bytes.
    #[arg(long, default_value = "4096")]
    pub chunk: usize,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Pipe name to connect to.
    pub name: String,
    /// Message words, joined by single spaces.
    #[arg(conflicts_with = "file", required_unless_present = "file")]
    pub message: Vec<String>,
    /// Send the contents of a file instead.
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,
    /// How long to wait for a listener (e.g. 5s, 500ms). Default: one attempt.
    #[arg(long, env = "PROTOPIPE_SEND_TIMEOUT")]
    pub timeout: Option<String>,
}

#[derive(Args, Debug)]
pub struct RecvArgs {
    /// Pipe name to listen on.
    pub name: String,
    /// Exit after printing N chunks.
    #[arg(long)]
    pub count: Option<usize>,
    /// Read buffer size in bytes.
    #[arg(long, default_value = "4096")]
    pub chunk: usize,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

pub(crate) fn check_chunk(chunk: usize) -> CliResult<usize> {
    if chunk == 0 {
        return Err(CliError::new(USAGE, "--chunk must be greater than zero"));
    }
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert_eq!(parse_duration("").unwrap_err().code, USAGE);
    }

    #[test]
    fn zero_chunk_is_a_usage_error() {
        assert_eq!(check_chunk(0).unwrap_err().code, USAGE);
        assert_eq!(check_chunk(16).unwrap(), 16);
    }
}
