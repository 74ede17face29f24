//! The WebSocket connection engine.
//!
//! ## Connection Lifecycle
//!
//! 1. **Closed** - fresh connection, nothing exchanged yet
//! 2. **Negotiating** - upgrade request/response in flight
//! 3. **Opened** - messages flow both ways
//! 4. **ClosingLocal / ClosingBoth** - close frame being sent, then sent
//! 5. **Closed** - transport torn down, terminal
//!
//! ## Example
//!
//! ```rust,ignore
//! use wstream::{Config, Role, WebSocket};
//!
//! let (stream, _) = listener.accept().await?;
//! let ws = WebSocket::new(stream, Role::Server, Config::server());
//! let request = ws.accept().await?;
//! println!("upgraded {}", request.path());
//!
//! while let Ok(msg) = ws.read().await {
//!     if msg.is_close() {
//!         break;
//!     }
//!     ws.write_binary(msg.payload()).await?;
//! }
//! ```

mod keepalive;
mod role;
mod state;

#[allow(clippy::module_inception)]
mod connection;

pub use connection::WebSocket;
pub use role::Role;
pub use state::Status;
