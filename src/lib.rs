//! # wstream - RFC 6455 WebSocket connections over tokio streams
//!
//! `wstream` turns any ordered byte stream (TCP, TLS, an in-memory pipe) into
//! a WebSocket connection: it performs the HTTP Upgrade handshake, frames and
//! reassembles messages, answers pings, runs the close handshake and keeps
//! idle connections in check.
//!
//! ## Features
//!
//! - **Client and server** negotiation over the same [`WebSocket`] type
//! - **Cloneable handles**: one read and one write in flight at a time,
//!   further writes queue in order
//! - **Fragmentation** of large outgoing messages, reassembly of incoming ones
//! - **Keepalive** pings with idle detection
//! - **TLS** via rustls (feature `tls-rustls`)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wstream::{CloseCode, Message, WebSocket};
//!
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:9001").await?;
//! let ws = WebSocket::client(stream);
//! ws.handshake("ws://127.0.0.1:9001", "/").await?;
//! ws.write_text("hello").await?;
//! let reply = ws.read().await?;
//! ws.close(CloseCode::Normal, "bye").await?;
//! ```

pub mod buffer;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;
pub mod transport;

#[cfg(feature = "tls-rustls")]
pub mod tls;

pub use buffer::{Buffer, ByteView};
pub use config::{Config, Keepalive, Limits};
pub use connection::{Role, Status, WebSocket};
pub use error::{Error, Result};
pub use message::{CloseCode, CloseFrame, Message, MessageType};
pub use protocol::{HandshakeHeader, OpCode, WS_GUID, compute_accept_key};
pub use transport::Transport;
