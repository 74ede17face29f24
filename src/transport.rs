//! Byte-stream transports a [`WebSocket`](crate::WebSocket) can run over.
//!
//! Read-some and write map to tokio's `AsyncRead` / `AsyncWrite`, shutting
//! down the write half maps to `poll_shutdown`, and closing maps to
//! dropping the stream. Cancellation is dropping the in-flight future.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};

/// An ordered, reliable, bidirectional byte stream.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Remote address, when the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl Transport for tokio::net::TcpStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        tokio::net::TcpStream::peer_addr(self).ok()
    }
}

/// In-memory pipe, used for embedding and tests.
impl Transport for tokio::io::DuplexStream {}

#[cfg(unix)]
impl Transport for tokio::net::UnixStream {}
