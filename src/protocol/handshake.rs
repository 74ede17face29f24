//! HTTP Upgrade handshake (RFC 6455 section 4).
//!
//! [`HandshakeHeader`] models both sides of the negotiation: the client's
//! `GET` upgrade request and the server's `101` response. Parsing is
//! incremental in the same way as frame parsing: an unterminated header
//! block yields `Ok(None)` and the caller retries after reading more bytes.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const CRLF: &str = "\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wstream::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Generate a fresh `Sec-WebSocket-Key`: Base64 of 16 bytes from the OS RNG.
///
/// # Errors
///
/// Returns `Error::Io` if the OS RNG is unavailable.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce).map_err(std::io::Error::from)?;
    Ok(BASE64.encode(nonce))
}

/// Which side of the negotiation a header belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    /// Client `GET` upgrade request.
    Request,
    /// Server `101 Switching Protocol` response.
    Response,
}

/// A parsed or outgoing handshake header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeHeader {
    kind: HeaderKind,
    method: String,
    status: u16,
    path: String,
    version: String,
    /// Lower-cased names, unique, in first-insertion order.
    fields: Vec<(String, String)>,
    consumed: usize,
}

impl HandshakeHeader {
    fn empty(kind: HeaderKind) -> Self {
        Self {
            kind,
            method: String::new(),
            status: 0,
            path: String::new(),
            version: "1.1".to_owned(),
            fields: Vec::new(),
            consumed: 0,
        }
    }

    /// Parse a client upgrade request from the front of `buf`.
    ///
    /// # Errors
    ///
    /// Returns the handshake error for the first check that fails: status
    /// line, field format, host, upgrade, connection, key, version.
    pub fn parse_request(buf: &[u8]) -> Result<Option<Self>> {
        let Some((head, consumed)) = split_head(buf, b"GET")? else {
            return Ok(None);
        };
        let mut lines = head.split(CRLF);

        let line = lines.next().unwrap_or_default().trim();
        let idx = line.rfind("HTTP/").ok_or(Error::InvalidStatusLine)?;
        let version = line[idx + 5..].trim();
        let path = line[..idx].trim_start_matches("GET").trim();
        if version != "1.1" || path.is_empty() || !line.starts_with("GET ") {
            return Err(Error::InvalidStatusLine);
        }

        let mut header = Self::empty(HeaderKind::Request);
        header.method = "GET".to_owned();
        header.path = path.to_owned();
        header.consumed = consumed;
        header.parse_fields(lines)?;

        if header.field("host").is_none_or(str::is_empty) {
            return Err(Error::InvalidHost);
        }
        header.check_upgrade()?;
        if header.key().is_none_or(str::is_empty) {
            return Err(Error::InvalidSecWsKey);
        }
        if header.field("sec-websocket-version") != Some("13") {
            return Err(Error::InvalidWsVersion);
        }
        Ok(Some(header))
    }

    /// Parse a server response from the front of `buf` and verify its
    /// accept value against the `key` this client sent.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidStatusLine` unless the status is `101`
    /// - `Error::InvalidSecWsAccept` if the accept field is missing or empty
    /// - `Error::InvalidSecWsKey` if the accept value does not match `key`
    pub fn parse_response(buf: &[u8], key: &str) -> Result<Option<Self>> {
        let Some((head, consumed)) = split_head(buf, b"HTTP/1.1")? else {
            return Ok(None);
        };
        let mut lines = head.split(CRLF);

        let line = lines.next().unwrap_or_default().trim();
        let rest = line.strip_prefix("HTTP/1.1 ").ok_or(Error::InvalidStatusLine)?;
        let code = rest.split(' ').next().unwrap_or_default();
        if code != "101" {
            return Err(Error::InvalidStatusLine);
        }

        let mut header = Self::empty(HeaderKind::Response);
        header.status = 101;
        header.consumed = consumed;
        header.parse_fields(lines)?;

        header.check_upgrade()?;
        let accept = header
            .field("sec-websocket-accept")
            .filter(|v| !v.is_empty())
            .ok_or(Error::InvalidSecWsAccept)?;
        if accept != compute_accept_key(key) {
            return Err(Error::InvalidSecWsKey);
        }
        Ok(Some(header))
    }

    /// Build a client upgrade request for `url` (`ws://host[:port][/path]`
    /// or `wss://...`).
    ///
    /// An empty `target` falls back to the URL's own path, then `/`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUrl` for any other scheme or an empty host.
    pub fn build_request(url: &str, target: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("wss://")
            .or_else(|| url.strip_prefix("ws://"))
            .ok_or_else(|| Error::InvalidUrl(url.to_owned()))?;
        let (host, url_path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        if host.is_empty() {
            return Err(Error::InvalidUrl(url.to_owned()));
        }
        let path = [target, url_path]
            .into_iter()
            .find(|p| !p.is_empty())
            .unwrap_or("/");

        let mut header = Self::empty(HeaderKind::Request);
        header.method = "GET".to_owned();
        header.path = path.to_owned();
        header.insert("host", host);
        header.insert("upgrade", "websocket");
        header.insert("connection", "Upgrade");
        header.insert("sec-websocket-key", &generate_key()?);
        header.insert("sec-websocket-version", "13");
        Ok(header)
    }

    /// Build the `101` response accepting `request`.
    #[must_use]
    pub fn build_response(request: &Self) -> Self {
        let mut header = Self::empty(HeaderKind::Response);
        header.status = 101;
        header.insert("upgrade", "websocket");
        header.insert("connection", "Upgrade");
        header.insert(
            "sec-websocket-accept",
            &compute_accept_key(request.key().unwrap_or_default()),
        );
        header
    }

    /// Serialize the header block, including the terminating blank line.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = match self.kind {
            HeaderKind::Request => format!("GET {} HTTP/1.1{CRLF}", self.path),
            HeaderKind::Response => format!("HTTP/1.1 101 Switching Protocol{CRLF}"),
        };
        for (name, value) in &self.fields {
            out.push_str(&canonical_name(name));
            out.push_str(": ");
            out.push_str(value);
            out.push_str(CRLF);
        }
        out.push_str(CRLF);
        out
    }

    /// Set a field, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidFieldFormat` if the name or value would break
    /// the header block (CR, LF, or a colon in the name).
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        if name.is_empty() || name.contains([':', '\r', '\n']) || value.contains(['\r', '\n']) {
            return Err(Error::InvalidFieldFormat);
        }
        self.insert(name, value);
        Ok(())
    }

    /// Case-insensitive field lookup.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All fields as `(lower-cased name, value)` pairs.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The `Sec-WebSocket-Key` field.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.field("sec-websocket-key")
    }

    #[must_use]
    pub const fn kind(&self) -> HeaderKind {
        self.kind
    }

    /// Request method; empty for responses.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Response status; `0` for requests.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Request target; empty for responses.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// HTTP version, always `1.1`.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Bytes of the parsed block, blank line included. `0` for built headers.
    #[must_use]
    pub const fn consumed(&self) -> usize {
        self.consumed
    }

    fn insert(&mut self, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        match self.fields.iter_mut().find(|(k, _)| *k == name) {
            Some((_, v)) => *v = value.to_owned(),
            None => self.fields.push((name, value.to_owned())),
        }
    }

    fn parse_fields<'a>(&mut self, lines: impl Iterator<Item = &'a str>) -> Result<()> {
        for line in lines {
            let (name, value) = line.split_once(':').ok_or(Error::InvalidFieldFormat)?;
            self.insert(name.trim(), value.trim());
        }
        Ok(())
    }

    fn check_upgrade(&self) -> Result<()> {
        if !self
            .field("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
        {
            return Err(Error::InvalidUpgrade);
        }
        if !self
            .field("connection")
            .is_some_and(|v| v.to_ascii_lowercase().contains("upgrade"))
        {
            return Err(Error::InvalidConnection);
        }
        Ok(())
    }
}

/// Reject a buffer that cannot start with `prefix`, then split off the
/// header block (without the blank line) and its total length.
fn split_head<'a>(buf: &'a [u8], prefix: &[u8]) -> Result<Option<(&'a str, usize)>> {
    let n = buf.len().min(prefix.len());
    if buf[..n] != prefix[..n] {
        return Err(Error::InvalidStatusLine);
    }
    let Some(end) = buf.windows(HEADER_END.len()).position(|w| w == HEADER_END) else {
        return Ok(None);
    };
    let head = std::str::from_utf8(&buf[..end]).map_err(|_| Error::InvalidFieldFormat)?;
    Ok(Some((head, end + HEADER_END.len())))
}

/// `sec-websocket-key` -> `Sec-WebSocket-Key`.
fn canonical_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            if part == "websocket" {
                return "WebSocket".to_owned();
            }
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
