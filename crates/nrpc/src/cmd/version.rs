use nrpc_frame::{DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
use nrpc_peer::{DEFAULT_CALL_TIMEOUT, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("nrpc {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    for (key, value) in details() {
        println!("{key}: {value}");
    }
    Ok(SUCCESS)
}

/// Build and protocol facts shown by `version --extended`.
fn details() -> Vec<(&'static str, String)> {
    vec![
        ("name", "nrpc".to_string()),
        ("version", env!("CARGO_PKG_VERSION").to_string()),
        ("target", env!("NRPC_BUILD_TARGET").to_string()),
        ("profile", env!("NRPC_BUILD_PROFILE").to_string()),
        ("frame_header_bytes", HEADER_SIZE.to_string()),
        ("max_payload_bytes", DEFAULT_MAX_PAYLOAD.to_string()),
        (
            "call_timeout_ms",
            DEFAULT_CALL_TIMEOUT.as_millis().to_string(),
        ),
        (
            "backoff_ms",
            format!(
                "{}..{}",
                DEFAULT_INITIAL_BACKOFF.as_millis(),
                DEFAULT_MAX_BACKOFF.as_millis()
            ),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_details_report_build_and_protocol_defaults() {
        let details = details();
        let get = |key: &str| {
            details
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
                .unwrap()
        };

        assert_eq!(get("version"), env!("CARGO_PKG_VERSION"));
        assert!(!get("target").is_empty());
        assert_ne!(get("target"), "unknown");
        assert_eq!(get("frame_header_bytes"), "6");
        assert_eq!(get("call_timeout_ms"), "5000");
        assert_eq!(get("backoff_ms"), "1000..20000");
    }
}
