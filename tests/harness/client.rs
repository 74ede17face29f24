//! Client wrapper used by the concurrency tests.

use std::net::SocketAddr;

use tokio::net::TcpStream;
use wstream::{CloseCode, Message, Result, WebSocket};

pub struct TestClient {
    pub id: usize,
    pub ws: WebSocket<TcpStream>,
}

impl TestClient {
    pub async fn connect_with_id(addr: SocketAddr, id: usize) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let ws = WebSocket::client(stream);
        ws.handshake(&format!("ws://{addr}"), &format!("/client/{id}")).await?;
        Ok(Self { id, ws })
    }

    pub async fn send_text(&self, text: &str) -> Result<usize> {
        self.ws.write_text(text).await
    }

    /// Next text message, or `None` when the server closed.
    pub async fn recv_text(&self) -> Result<Option<String>> {
        match self.ws.read().await? {
            Message::Text(data) => Ok(Some(String::from_utf8_lossy(&data).into_owned())),
            Message::Binary(_) => Ok(None),
            Message::Close(_) => Ok(None),
        }
    }

    pub async fn close(&self) -> Result<()> {
        self.ws.close(CloseCode::Normal, "done").await
    }
}
