//! Echo every message back to the sender.
//!
//! Run with: `cargo run --example echo_server -- 127.0.0.1:9001`

use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wstream::{Config, Error, Message, Role, WebSocket};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let addr = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1:9001".to_string());
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    let config = Config::server()
        .with_max_message_size(1 << 20)
        .with_keepalive("echo", Duration::from_secs(30));

    loop {
        let (stream, peer) = listener.accept().await?;
        let ws = WebSocket::new(stream, Role::Server, config.clone());
        tokio::spawn(async move {
            match ws.accept().await {
                Ok(request) => info!(%peer, path = request.path(), "upgraded"),
                Err(e) => {
                    warn!(%peer, error = %e, "upgrade failed");
                    return;
                }
            }

            loop {
                let sent = match ws.read().await {
                    Ok(Message::Text(data)) => ws.write_text(data).await,
                    Ok(Message::Binary(data)) => ws.write_binary(data).await,
                    Ok(Message::Close(frame)) => {
                        info!(%peer, ?frame, "peer closed");
                        return;
                    }
                    Err(Error::AlreadyClosed) => {
                        info!(%peer, "connection closed");
                        return;
                    }
                    Err(e) if e.is_fatal() => {
                        warn!(%peer, error = %e, "connection lost");
                        return;
                    }
                    Err(e) => {
                        warn!(%peer, error = %e, "message dropped");
                        continue;
                    }
                };
                if let Err(e) = sent {
                    warn!(%peer, error = %e, "write failed");
                    return;
                }
            }
        });
    }
}
