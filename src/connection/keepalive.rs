//! Periodic liveness timer.
//!
//! One task per connection. It holds only a weak reference, so it never
//! keeps a dropped connection alive, and is aborted by `force_close`.

use tokio::task::AbortHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::WebSocket;
use crate::config::Keepalive;
use crate::connection::Status;
use crate::message::CloseCode;
use crate::protocol::OpCode;
use crate::transport::Transport;

pub(super) fn spawn<T: Transport>(ws: &WebSocket<T>, settings: Keepalive) -> AbortHandle {
    let weak = ws.downgrade();
    let task = tokio::spawn(async move {
        loop {
            tokio::time::sleep(settings.interval).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if !tick(&WebSocket::from_shared(shared), &settings).await {
                return;
            }
        }
    });
    task.abort_handle()
}

/// Returns `false` once the timer has nothing left to watch.
async fn tick<T: Transport>(ws: &WebSocket<T>, settings: &Keepalive) -> bool {
    let status = ws.status();
    if ws.idle_time() > settings.interval {
        match status {
            Status::Opened => {
                warn!(peer = ?ws.peer_addr(), "peer idle, closing");
                let closing = ws.start_close(CloseCode::GoingAway, "peer going away");
                if !matches!(timeout(settings.interval, closing).await, Ok(Ok(()))) {
                    ws.force_close();
                    return false;
                }
                return true;
            }
            Status::Negotiating => warn!(peer = ?ws.peer_addr(), "upgrade timed out"),
            s if s.is_closing() => debug!(peer = ?ws.peer_addr(), "close handshake timed out"),
            _ => {}
        }
        ws.force_close();
        return false;
    }

    match status {
        Status::Opened => {
            let ping = ws.send_control(OpCode::Ping, &settings.message);
            match timeout(settings.interval, ping).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    debug!(peer = ?ws.peer_addr(), error = %e, "ping failed");
                    ws.force_close();
                    false
                }
                Err(_) => {
                    warn!(peer = ?ws.peer_addr(), "peer not reading, closing");
                    ws.force_close();
                    false
                }
            }
        }
        Status::Closed => false,
        _ => true,
    }
}
