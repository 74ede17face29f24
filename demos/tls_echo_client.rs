//! Send each line of stdin to a `wss://` echo server and print the reply.
//!
//! Pass a CA file to trust a self-signed server; otherwise the Mozilla
//! root set is used.
//!
//! Run with:
//! `cargo run --example tls_echo_client --features tls-rustls -- wss://localhost:9443/ cert.pem`

#[cfg(not(feature = "tls-rustls"))]
fn main() {
    eprintln!("This demo requires the 'tls-rustls' feature.");
    eprintln!("Run with: cargo run --example tls_echo_client --features tls-rustls");
}

#[cfg(feature = "tls-rustls")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    inner::run().await
}

#[cfg(feature = "tls-rustls")]
mod inner {
    use std::error::Error as StdError;
    use std::path::Path;
    use std::sync::Arc;

    use rustls::{ClientConfig, RootCertStore};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpStream;
    use tracing_subscriber::EnvFilter;
    use wstream::tls::{TlsConnector, client_config_with_webpki_roots, load_certs_from_file};
    use wstream::{CloseCode, Message, WebSocket};

    fn client_config(ca: Option<&str>) -> Result<Arc<ClientConfig>, Box<dyn StdError>> {
        let Some(ca) = ca else {
            return Ok(client_config_with_webpki_roots());
        };
        let mut roots = RootCertStore::empty();
        for cert in load_certs_from_file(Path::new(ca))? {
            roots.add(cert)?;
        }
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Arc::new(config))
    }

    pub async fn run() -> Result<(), Box<dyn StdError>> {
        let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("warn"))?;
        tracing_subscriber::fmt().with_env_filter(filter).init();

        let mut args = std::env::args().skip(1);
        let url = args.next().unwrap_or_else(|| "wss://localhost:9443/".to_string());
        let ca = args.next();

        let authority = url
            .trim_start_matches("wss://")
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let host = authority.split(':').next().unwrap_or_default().to_string();
        let addr = if authority.contains(':') {
            authority.clone()
        } else {
            format!("{authority}:443")
        };

        let connector = TlsConnector::new(client_config(ca.as_deref())?);
        let tls = connector.connect(&host, TcpStream::connect(&addr).await?).await?;
        let ws = WebSocket::client(tls);
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
}
