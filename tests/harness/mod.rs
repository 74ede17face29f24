//! Shared fixtures for the integration tests: a loopback echo server, a
//! thin client wrapper, and raw frame helpers for driving a connection from
//! the wire side.
#![allow(dead_code)]

mod client;
mod metrics;
mod server;

pub use client::TestClient;
pub use metrics::Metrics;
pub use server::{TestServer, echo};

use tokio::io::{AsyncReadExt, DuplexStream};
use wstream::protocol::{FrameHeader, OpCode, write_frame};
use wstream::{Buffer, HandshakeHeader, WebSocket, protocol};

/// One frame as a masking client would put it on the wire.
pub fn client_frame(fin: bool, opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    let mut buf = Buffer::new();
    write_frame(&mut buf, fin, opcode, payload, Some(0x1234_5678));
    buf.readable().to_vec()
}

/// One frame as a server would put it on the wire.
pub fn server_frame(fin: bool, opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    let mut buf = Buffer::new();
    write_frame(&mut buf, fin, opcode, payload, None);
    buf.readable().to_vec()
}

/// Read one whole frame from the raw end of a duplex, unmasking it.
pub async fn read_frame(peer: &mut DuplexStream) -> (FrameHeader, Vec<u8>) {
    let mut raw = Vec::new();
    loop {
        if let Some(header) = FrameHeader::parse(&raw).unwrap() {
            let total = header.frame_len().unwrap();
            if raw.len() >= total {
                let mut payload = raw[header.header_len..total].to_vec();
                if header.masked {
                    protocol::apply_mask(&mut payload, header.mask_key);
                }
                return (header, payload);
            }
        }
        let mut byte = [0u8; 1];
        peer.read_exact(&mut byte).await.unwrap();
        raw.push(byte[0]);
    }
}

/// An open server connection and the raw client end of its transport.
pub async fn open_server(config: wstream::Config) -> (WebSocket<DuplexStream>, DuplexStream) {
    open_server_with_capacity(config, 1 << 20).await
}

/// Like [`open_server`], over a duplex that buffers at most `capacity`
/// bytes in each direction.
pub async fn open_server_with_capacity(
    config: wstream::Config,
    capacity: usize,
) -> (WebSocket<DuplexStream>, DuplexStream) {
    use tokio::io::AsyncWriteExt;

    let (local, mut peer) = tokio::io::duplex(capacity);
    let ws = WebSocket::new(local, wstream::Role::Server, config);
    let request = HandshakeHeader::build_request("ws://localhost:9001", "/test").unwrap();
    peer.write_all(request.encode().as_bytes()).await.unwrap();
    ws.accept().await.unwrap();

    let key = request.key().unwrap().to_owned();
    let mut raw = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        peer.read_exact(&mut byte).await.unwrap();
        raw.push(byte[0]);
        if HandshakeHeader::parse_response(&raw, &key).unwrap().is_some() {
            break;
        }
    }
    (ws, peer)
}
