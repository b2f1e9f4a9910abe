use tokio::io::{AsyncRead, AsyncWrite};

/// A connected byte stream a peer can run over.
///
/// Implemented for every `AsyncRead + AsyncWrite` type that can move across
/// tasks: `TcpStream`, `UnixStream`, `tokio::io::DuplexStream`, TLS wrappers.
pub trait Duplex: AsyncRead + AsyncWrite + Send + 'static {}

impl<T> Duplex for T where T: AsyncRead + AsyncWrite + Send + 'static {}
