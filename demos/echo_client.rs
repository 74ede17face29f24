//! Send each line of stdin to an echo server and print the reply.
//!
//! Run with: `cargo run --example echo_client -- ws://127.0.0.1:9001/`

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing_subscriber::EnvFilter;
use wstream::{CloseCode, Message, WebSocket};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("warn"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let url = std::env::args().nth(1).unwrap_or_else(|| "ws://127.0.0.1:9001/".to_string());
    let authority = url
        .trim_start_matches("ws://")
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string();

    let ws = WebSocket::client(TcpStream::connect(&authority).await?);
    ws.handshake(&url, "").await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        ws.write_text(&line).await?;
        match ws.read().await? {
            Message::Text(data) => println!("{}", String::from_utf8_lossy(&data)),
            Message::Binary(data) => println!("<{} binary bytes>", data.len()),
            Message::Close(frame) => {
                println!("server closed: {frame:?}");
                return Ok(());
            }
        }
    }

    ws.close(CloseCode::Normal, "stdin closed").await?;
    Ok(())
}
