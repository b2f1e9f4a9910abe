mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "nrpc", version, about = "Bidirectional authenticated RPC CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr). `RUST_LOG` takes precedence when set.
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format).await;

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
    fn parses_call_subcommand() {
        let cli = Cli::try_parse_from([
            "nrpc",
            "call",
            "127.0.0.1:7070",
            "echo",
            "--params",
            "{\"message\":\"hi\"}",
            "--token",
            "s3cret",
        ])
        .expect("call args should parse");

        match cli.command {
            Command::Call(args) => {
                assert_eq!(args.addr, "127.0.0.1:7070");
                assert_eq!(args.name, "echo");
                assert_eq!(args.timeout_ms, 5000);
            }
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn parses_serve_subcommand() {
        let cli = Cli::try_parse_from([
            "nrpc",
            "serve",
            "--addr",
            "127.0.0.1:0",
            "--token",
            "s3cret",
            "--timeout-ms",
            "250",
        ])
        .expect("serve args should parse");

        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.addr, "127.0.0.1:0");
                assert_eq!(args.timeout_ms, 250);
            }
            other => panic!("expected serve, got {other:?}"),
        }
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = Cli::try_parse_from([
            "nrpc",
            "call",
            "127.0.0.1:7070",
            "echo",
            "--token",
            "s3cret",
            "--timeout-ms",
            "0",
        ])
        .expect_err("zero timeout should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
