use std::sync::Arc;
use std::time::Duration;

use nrpc_peer::{
    handler, Dispatcher, Identity, Invocation, RpcServer, ServerOptions, ServiceRegistry,
    TokenAuthenticator,
};
use serde_json::{json, Value};

use crate::cmd::ServeArgs;
use crate::exit::{io_error, peer_error, CliResult, SUCCESS};
use crate::output::{print_listening, OutputFormat};

pub async fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let authenticator = TokenAuthenticator::new(args.token)
        .with_identity(Identity::new(json!({ "name": "cli" })).with_roles(["client"]));
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(builtin_services());
    let options = ServerOptions::new(Arc::new(authenticator))
        .with_dispatcher(dispatcher)
        .with_call_timeout(Duration::from_millis(args.timeout_ms));

    let mut server = RpcServer::bind(args.addr.as_str(), options)
        .await
        .map_err(|err| peer_error("bind failed", err))?;
    print_listening(server.local_addr(), format);

    loop {
        tokio::select! {
            peer = server.next_connection() => match peer {
                Some(peer) => tracing::info!(peer = %peer.name(), "client connected"),
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|err| io_error("signal handler setup failed", err))?;
                tracing::info!("shutting down");
                break;
            }
        }
    }

    server.close();
    Ok(SUCCESS)
}

fn builtin_services() -> ServiceRegistry {
    ServiceRegistry::new()
        .with_service(
            "echo",
            handler(|inv: Invocation| async move { Ok(echo(inv.params)) }),
        )
        .with_service(
            "ping",
            handler(|_inv: Invocation| async { Ok(Value::from("pong")) }),
        )
}

/// `{"message": m}` echoes `m`; anything else is echoed whole.
fn echo(params: Value) -> Value {
    match params {
        Value::Object(mut map) if map.contains_key("message") => {
            map.remove("message").unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use nrpc_peer::dispatch::serve;
    use nrpc_peer::SUCCESS as CODE_SUCCESS;

    use super::*;

    fn invocation(name: &str, params: Value) -> Invocation {
        Invocation {
            name: name.to_string(),
            params,
            identity: None,
        }
    }

    #[test]
    fn echo_unwraps_message_field() {
        assert_eq!(echo(json!({ "message": "hi" })), json!("hi"));
        assert_eq!(echo(json!({ "other": 1 })), json!({ "other": 1 }));
        assert_eq!(echo(json!([1, 2])), json!([1, 2]));
    }

    #[tokio::test]
    async fn builtin_services_answer() {
        let registry = builtin_services();

        let resp = serve(&registry, 0, invocation("ping", json!({}))).await;
        assert_eq!(resp.code, CODE_SUCCESS);
        assert_eq!(resp.data, Some(json!("pong")));

        let resp = serve(&registry, 1, invocation("echo", json!({ "message": "x" }))).await;
        assert_eq!(resp.data, Some(json!("x")));
    }
}
