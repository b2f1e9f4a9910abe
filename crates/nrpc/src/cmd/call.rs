use std::sync::Arc;
use std::time::Duration;

use nrpc_peer::{Peer, PeerOptions, TokenAuthenticator};
use nrpc_transport::stream_name;
use serde_json::Value;

use crate::cmd::CallArgs;
use crate::exit::{peer_error, transport_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_value, OutputFormat};

pub async fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let params = parse_params(args.params.as_deref())?;
    let wait = Duration::from_millis(args.timeout_ms);

    let stream = nrpc_transport::connect(&args.addr)
        .await
        .map_err(|err| transport_error("connect failed", err))?;
    let name = stream_name(&stream);
    let options = PeerOptions::new(name, Arc::new(TokenAuthenticator::new(args.token)))
        .with_call_timeout(wait);
    let peer = Peer::new(stream, options);
    peer.open().map_err(|err| peer_error("open failed", err))?;

    let result = call_once(&peer, &args.name, params, wait).await;
    peer.close();

    print_value(&result?, format);
    Ok(SUCCESS)
}

async fn call_once(peer: &Peer, name: &str, params: Value, wait: Duration) -> CliResult<Value> {
    tokio::time::timeout(wait, peer.authenticated())
        .await
        .map_err(|_| CliError::new(TIMEOUT, "handshake timed out"))?
        .map_err(|err| peer_error("handshake failed", err))?;

    let reply = peer
        .call(name, params)
        .map_err(|err| peer_error("call failed", err))?;
    tracing::debug!(id = reply.id(), method = name, "call sent");
    reply.await.map_err(|err| peer_error("call failed", err))
}

fn parse_params(raw: Option<&str>) -> CliResult<Value> {
    match raw {
        None => Ok(Value::Null),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|err| CliError::new(USAGE, format!("--params is not valid JSON: {err}"))),
    }
}
