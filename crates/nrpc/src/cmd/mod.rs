use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod call;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a token-authenticated server exposing `echo` and `ping`.
    Serve(ServeArgs),
    /// Make a single call and print its result.
    Call(CallArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format).await,
        Command::Call(args) => call::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:7070")]
    pub addr: String,
    /// Shared secret both sides must present.
    #[arg(long, env = "NRPC_TOKEN", hide_env_values = true)]
    pub token: String,
    /// Call timeout in milliseconds.
    #[arg(
        long,
        env = "NRPC_TIMEOUT_MS",
        default_value_t = 5000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout_ms: u64,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Server address (host:port).
    pub addr: String,
    /// Service name to call.
    pub name: String,
    /// JSON parameters. Omitted parameters are sent as `{}`.
    #[arg(long)]
    pub params: Option<String>,
    /// Shared secret both sides must present.
    #[arg(long, env = "NRPC_TOKEN", hide_env_values = true)]
    pub token: String,
    /// Handshake and call timeout in milliseconds.
    #[arg(
        long,
        env = "NRPC_TIMEOUT_MS",
        default_value_t = 5000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout_ms: u64,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build information.
    #[arg(long)]
    pub extended: bool,
}
