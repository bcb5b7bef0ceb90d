mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "simplepipe", version, about = "Push pipe framing and session tools")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(
        long,
        value_name = "FORMAT",
        default_value = "text",
        env = "SIMPLEPIPE_LOG_FORMAT",
        global = true
    )]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "warn",
        env = "SIMPLEPIPE_LOG_LEVEL",
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
    fn parses_encode_subcommand() {
        let cli = Cli::try_parse_from([
            "simplepipe",
            "encode",
            "Ab12Cd",
            "--tag",
            "Chat",
            "--data",
            "hello",
        ])
        .expect("encode args should parse");

        assert!(matches!(cli.command, Command::Encode(_)));
    }

    #[test]
    fn rejects_payload_and_status_together() {
        let err = Cli::try_parse_from([
            "simplepipe",
            "encode",
            "Ab12Cd",
            "--status",
            "ok",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_request_build() {
        let cli = Cli::try_parse_from([
            "simplepipe",
            "request",
            "build",
            "Ab12Cd",
            "--type",
            "n",
            "--sequence",
            "4",
        ])
        .expect("request args should parse");
        assert!(matches!(cli.command, Command::Request(_)));
    }

    #[test]
    fn parses_simulate_with_globals_after_subcommand() {
        let cli = Cli::try_parse_from([
            "simplepipe",
            "simulate",
            "--pipes",
            "2",
            "--log-level",
            "debug",
        ])
        .expect("simulate args should parse");
        assert!(matches!(cli.log_level, LogLevel::Debug));
    }
}
