//! Loopback echo server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use wstream::{Error, Message, Transport, WebSocket};

use super::Metrics;

pub struct TestServer {
    pub metrics: Arc<Metrics>,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Bind an ephemeral port and echo every message until the peer closes.
    pub async fn spawn() -> (Self, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let metrics = Arc::new(Metrics::default());

        let counters = metrics.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let counters = counters.clone();
                tokio::spawn(async move {
                    let ws = WebSocket::server(stream);
                    if ws.accept().await.is_err() {
                        counters.errors.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    counters.connections.fetch_add(1, Ordering::Relaxed);
                    echo(&ws, &counters).await;
                });
            }
        });

        (Self { metrics, task }, addr)
    }

    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// Echo until the connection ends, counting messages and errors.
pub async fn echo<T: Transport>(ws: &WebSocket<T>, metrics: &Metrics) {
    loop {
        let result = match ws.read().await {
            Ok(Message::Text(data)) => ws.write_text(data).await,
            Ok(Message::Binary(data)) => ws.write_binary(data).await,
            Ok(Message::Close(_)) | Err(Error::AlreadyClosed) => return,
            Err(e) if e.is_fatal() => {
                metrics.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(_) => continue,
        };
        if result.is_err() {
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
        metrics.messages.fetch_add(1, Ordering::Relaxed);
    }
}
