//! Broadcast a counter to every connected client once a second.
//!
//! Each client gets its own handle clone in the subscriber list; a reader
//! task per client drains incoming frames so pings are answered and closes
//! are noticed.
//!
//! Run with: `cargo run --example push_server -- 127.0.0.1:9002`

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use wstream::{Config, Error, Role, WebSocket};

type Subscribers = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let addr = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1:9002".to_string());
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "push server listening");

    let subscribers: Subscribers = Arc::default();
    tokio::spawn(broadcast(subscribers.clone()));

    let config = Config::server().with_keepalive("push", Duration::from_secs(10));
    loop {
        let (stream, peer) = listener.accept().await?;
        let ws = WebSocket::new(stream, Role::Server, config.clone());
        let subscribers = subscribers.clone();
        tokio::spawn(async move {
            if let Err(e) = ws.accept().await {
                warn!(%peer, error = %e, "upgrade failed");
                return;
            }
            info!(%peer, "subscribed");
            if let Ok(mut list) = subscribers.lock() {
                list.push(ws.clone());
            }

            // Drain until the peer goes away.
            loop {
                match ws.read().await {
                    Ok(msg) if msg.is_close() => break,
                    Ok(_) => {}
                    Err(Error::AlreadyClosed) => break,
                    Err(e) if e.is_fatal() => break,
                    Err(_) => {}
                }
            }
            debug!(%peer, "unsubscribed");
        });
    }
}

async fn broadcast(subscribers: Subscribers) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut counter = 0u64;
    loop {
        ticker.tick().await;
        counter += 1;

        let targets = match subscribers.lock() {
            Ok(mut list) => {
                list.retain(WebSocket::is_open);
                list.clone()
            }
            Err(_) => return,
        };

        let text = format!("tick {counter}");
        for ws in targets {
            let text = text.clone();
            tokio::spawn(async move {
                if let Err(e) = ws.write_text(text).await {
                    debug!(peer = ?ws.peer_addr(), error = %e, "push failed");
                }
            });
        }
    }
}
