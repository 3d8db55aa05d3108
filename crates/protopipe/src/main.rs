mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "protopipe", version, about = "Local pipe send/receive tool")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "PROTOPIPE_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_words() {
        let cli = Cli::try_parse_from(["protopipe", "send", "ctl", "set", "rate", "10"])
            .expect("send args should parse");

        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.name, "ctl");
                assert_eq!(args.message, ["set", "rate", "10"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn send_requires_message_or_file() {
        let err = Cli::try_parse_from(["protopipe", "send", "ctl"])
            .expect_err("missing payload should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn rejects_message_with_file() {
        let err = Cli::try_parse_from(["protopipe", "send", "ctl", "hi", "--file", "/tmp/x"])
            .expect_err("conflicting args should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_recv_subcommand() {
        let cli = Cli::try_parse_from(["protopipe", "recv", "ctl", "--count", "3"])
            .expect("recv args should parse");
        assert!(matches!(cli.command, Command::Recv(_)));
    }
}
