//! Echo server over TLS (`wss://`).
//!
//! Run with:
//! `cargo run --example tls_echo_server --features tls-rustls -- 127.0.0.1:9443 cert.pem key.pem`

#[cfg(not(feature = "tls-rustls"))]
fn main() {
    eprintln!("This demo requires the 'tls-rustls' feature.");
    eprintln!("Run with: cargo run --example tls_echo_server --features tls-rustls");
}

#[cfg(feature = "tls-rustls")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    inner::run().await
}

#[cfg(feature = "tls-rustls")]
mod inner {
    use std::error::Error as StdError;
    use std::path::PathBuf;
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tracing::{info, warn};
    use tracing_subscriber::EnvFilter;
    use wstream::tls::{TlsAcceptor, load_certs_from_file, load_private_key_from_file, server_config};
    use wstream::{Config, Error, Message, Role, WebSocket};

    pub async fn run() -> Result<(), Box<dyn StdError>> {
        let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
        tracing_subscriber::fmt().with_env_filter(filter).init();

        let mut args = std::env::args().skip(1);
        let addr = args.next().unwrap_or_else(|| "127.0.0.1:9443".to_string());
        let cert = PathBuf::from(args.next().unwrap_or_else(|| "cert.pem".to_string()));
        let key = PathBuf::from(args.next().unwrap_or_else(|| "key.pem".to_string()));

        let tls = server_config(load_certs_from_file(&cert)?, load_private_key_from_file(&key)?)?;
        let acceptor = TlsAcceptor::new(tls);
        let listener = TcpListener::bind(&addr).await?;
        info!(%addr, cert = %cert.display(), "listening for wss");

        let config = Config::server().with_keepalive("echo", Duration::from_secs(30));
        loop {
            let (stream, peer) = listener.accept().await?;
            let acceptor = acceptor.clone();
            let config = config.clone();
            tokio::spawn(async move {
                let stream = match acceptor.accept(stream).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(%peer, error = %e, "tls handshake failed");
                        return;
                    }
                };
                let ws = WebSocket::new(stream, Role::Server, config);
                if let Err(e) = ws.accept().await {
                    warn!(%peer, error = %e, "upgrade failed");
                    return;
                }

                loop {
                    let sent = match ws.read().await {
                        Ok(Message::Text(data)) => ws.write_text(data).await,
                        Ok(Message::Binary(data)) => ws.write_binary(data).await,
                        Ok(Message::Close(frame)) => {
                            info!(%peer, ?frame, "peer closed");
                            return;
                        }
                        Err(Error::AlreadyClosed) => return,
                        Err(e) if e.is_fatal() => {
                            warn!(%peer, error = %e, "connection lost");
                            return;
                        }
                        Err(_) => continue,
                    };
                    if let Err(e) = sent {
                        warn!(%peer, error = %e, "write failed");
                        return;
                    }
                }
            });
        }
    }
}
