#![cfg(all(unix, feature = "cli"))]

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Output, Stdio};

const TOKEN: &str = "cli-test-token";

struct Server {
    child: Child,
    addr: String,
}

impl Server {
    fn start() -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_nrpc"))
            .args(["--log-level", "error", "--format", "json"])
            .args(["serve", "--addr", "127.0.0.1:0", "--timeout-ms", "1000"])
            .env("NRPC_TOKEN", TOKEN)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("serve command should start");

        let stdout = child.stdout.take().expect("stdout should be piped");
        let mut line = String::new();
        BufReader::new(stdout)
            .read_line(&mut line)
            .expect("serve should announce its address");
        let event: serde_json::Value =
            serde_json::from_str(&line).expect("listening line should be json");
        assert_eq!(event["event"], "listening");
        let addr = event["addr"]
            .as_str()
            .expect("addr should be a string")
            .to_string();

        Self { child, addr }
    }

    fn call(&self, name: &str, extra: &[&str], token: &str) -> Output {
        Command::new(env!("CARGO_BIN_EXE_nrpc"))
            .args(["--log-level", "error", "--format", "json"])
            .args(["call", &self.addr, name])
            .args(extra)
            .env("NRPC_TOKEN", token)
            .output()
            .expect("call should run")
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_nrpc"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("nrpc {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn extended_version_reports_build_target() {
    let output = Command::new(env!("CARGO_BIN_EXE_nrpc"))
        .args(["version", "--extended"])
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let target = stdout
        .lines()
        .find_map(|line| line.strip_prefix("target: "))
        .expect("target line should be printed");
    assert!(!target.is_empty());
    assert!(!stdout.contains("unknown"));
    assert!(stdout.contains("frame_header_bytes: 6"));
}

#[test]
fn call_echo_and_ping_against_serve() {
    let server = Server::start();

    let output = server.call("echo", &["--params", r#"{"message":"hi"}"#], TOKEN);
    assert!(output.status.success(), "echo failed: {output:?}");
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "\"hi\"");

    let output = server.call("ping", &[], TOKEN);
    assert!(output.status.success(), "ping failed: {output:?}");
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "\"pong\"");
}

#[test]
fn unknown_service_fails_with_not_found() {
    let server = Server::start();

    let output = server.call("missing", &[], TOKEN);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("RESOURCE_NOT_FOUND"));
}

#[test]
fn wrong_token_is_rejected() {
    let server = Server::start();

    let output = server.call("ping", &[], "not-the-token");
    assert_eq!(output.status.code(), Some(50));
    assert!(output.stdout.is_empty());
}

#[test]
fn refused_connection_reports_failure() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind should work");
    let addr = listener.local_addr().expect("local addr").to_string();
    drop(listener);

    let output = Command::new(env!("CARGO_BIN_EXE_nrpc"))
        .args(["--log-level", "error", "call", &addr, "ping", "--token", TOKEN])
        .output()
        .expect("call should run");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect failed"));
}
