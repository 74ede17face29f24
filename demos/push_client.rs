//! Subscribe to the push server, print what it broadcasts, and send a
//! greeting once a second until `count` greetings have gone out.
//!
//! Run with: `cargo run --example push_client -- ws://127.0.0.1:9002/ws 10`

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wstream::{CloseCode, Config, Error, Message, Role, WebSocket};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| "ws://127.0.0.1:9002/ws".to_string());
    let count: u32 = args.next().map(|n| n.parse::<u32>()).transpose()?.unwrap_or(10);
    let authority = url
        .trim_start_matches("ws://")
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string();

    let config = Config::client()
        .with_fragment_size(4096)
        .with_max_message_size(1 << 20)
        .with_keepalive("ping", Duration::from_secs(5));
    let ws = WebSocket::new(TcpStream::connect(&authority).await?, Role::Client, config);
    ws.handshake(&url, "").await?;
    info!(%url, "subscribed");

    let writer = ws.clone();
    let greeter = tokio::spawn(async move {
        let greeting = format!("hello from {}", std::process::id());
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        for _ in 0..count {
            ticker.tick().await;
            if let Err(e) = writer.write_text(&greeting).await {
                warn!(error = %e, "write failed");
                return;
            }
        }
        let _ = writer.close(CloseCode::Normal, "done").await;
    });

    loop {
        match ws.read().await {
            Ok(Message::Text(data)) => println!("{}", String::from_utf8_lossy(&data)),
            Ok(Message::Binary(data)) => println!("<{} binary bytes>", data.len()),
            Ok(Message::Close(frame)) => {
                info!(?frame, "server closed");
                break;
            }
            Err(Error::AlreadyClosed) => break,
            Err(e) if e.is_fatal() => {
                warn!(error = %e, "connection lost");
                break;
            }
            Err(e) => warn!(error = %e, "message dropped"),
        }
    }
    greeter.abort();
    Ok(())
}
