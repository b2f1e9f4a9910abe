use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::error::{Result, TransportError};

/// Bind a TCP listener.
pub async fn bind<A>(addr: A) -> Result<TcpListener>
where
    A: ToSocketAddrs + std::fmt::Debug,
{
    let label = format!("{addr:?}");
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind {
            addr: label,
            source,
        })?;
    tracing::debug!(addr = ?listener.local_addr().ok(), "listening");
    Ok(listener)
}

/// Open an outbound TCP connection.
///
/// Nagle is disabled: frames are small and latency-sensitive.
pub async fn connect(addr: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Label a connection by its endpoint pair, e.g. `[127.0.0.1:5000 => 127.0.0.1:7070]`.
pub fn endpoint_name(local: Option<SocketAddr>, remote: Option<SocketAddr>) -> String {
    format!("[{} => {}]", addr_or_unknown(local), addr_or_unknown(remote))
}

/// Label a TCP stream by its endpoint pair.
pub fn stream_name(stream: &TcpStream) -> String {
    endpoint_name(stream.local_addr().ok(), stream.peer_addr().ok())
}

fn addr_or_unknown(addr: Option<SocketAddr>) -> String {
    addr.map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_name_formats_pair() {
        let local: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let remote: SocketAddr = "10.0.0.2:7070".parse().unwrap();
        assert_eq!(
            endpoint_name(Some(local), Some(remote)),
            "[127.0.0.1:5000 => 10.0.0.2:7070]"
        );
    }

    #[test]
    fn endpoint_name_tolerates_missing_addresses() {
        assert_eq!(endpoint_name(None, None), "[unknown => unknown]");
    }

    #[tokio::test]
    async fn connect_and_accept_over_loopback() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let client = connect(&addr).await.unwrap();
        let server = accept.await.unwrap();

        assert_eq!(client.peer_addr().unwrap(), server.local_addr().unwrap());
        assert!(stream_name(&client).ends_with(&format!("=> {addr}]")));
    }

    #[tokio::test]
    async fn connect_refused_reports_address() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = connect(&addr).await.unwrap_err();
        match err {
            TransportError::Connect { addr: reported, .. } => assert_eq!(reported, addr),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn bind_conflict_reports_bind_error() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let err = bind(addr).await.unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
    }
}
