use std::io::IsTerminal;
use std::net::SocketAddr;

use clap::ValueEnum;
use serde_json::{json, Value};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

pub fn print_value(value: &Value, format: OutputFormat) {
    println!("{}", render_value(value, format));
}

pub fn print_listening(addr: SocketAddr, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", json!({ "event": "listening", "addr": addr.to_string() }));
        }
        OutputFormat::Pretty => println!("listening on {addr}"),
    }
}

fn render_value(value: &Value, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => value.to_string(),
        OutputFormat::Pretty => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
    }
}
