//! Error types for the WebSocket connection engine.
//!
//! Errors fall into five groups: framing errors raised by the frame codec,
//! handshake errors raised while negotiating the HTTP upgrade, state errors
//! for operations that are illegal in the current connection state, size
//! errors, and transport errors passed through from the underlying stream.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::message::CloseCode;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Reserved bits set, or a malformed frame or close payload.
    #[error("frame can't be parsed")]
    BadFrame,

    /// The 64-bit payload length is out of range.
    #[error("invalid frame length")]
    InvalidFrameLength,

    /// Opcode is reserved or unknown.
    #[error("unsupported opcode: {0:#x}")]
    UnsupportedOpcode(u8),

    /// Control frames must not be fragmented.
    #[error("bad control frame, control frame must not be fragmented")]
    BadControlFrame,

    /// Control frame payload larger than 125 bytes.
    #[error("control message payload too big: {0} bytes (max: 125)")]
    ControlPayloadTooBig(u64),

    /// Request or status line is not a WebSocket upgrade line.
    #[error("invalid status line, expect GET /path HTTP/1.1 or HTTP/1.1 101 Switching Protocol")]
    InvalidStatusLine,

    /// A header line has no `:` separator.
    #[error("invalid header field format")]
    InvalidFieldFormat,

    /// `Upgrade` is missing or not `websocket`.
    #[error("invalid upgrade field, expect upgrade: websocket")]
    InvalidUpgrade,

    /// `Connection` is missing or does not contain `upgrade`.
    #[error("invalid connection field, expect connection: upgrade")]
    InvalidConnection,

    /// `Host` is missing or empty.
    #[error("invalid host")]
    InvalidHost,

    /// `Sec-WebSocket-Version` is not 13.
    #[error("sec-websocket-version must be 13")]
    InvalidWsVersion,

    /// `Sec-WebSocket-Key` is missing, or the accept value does not match it.
    #[error("either sec-websocket-key is invalid or verify failed")]
    InvalidSecWsKey,

    /// `Sec-WebSocket-Accept` is missing or empty.
    #[error("sec-websocket-accept is missing")]
    InvalidSecWsAccept,

    /// The handshake header exceeded the configured limit.
    #[error("handshake header too big: more than {max} bytes")]
    HeaderTooBig {
        /// Maximum allowed header size.
        max: usize,
    },

    /// Target URL is not a `ws://` or `wss://` URL.
    #[error("invalid url {0:?}, must be ws:// or wss://")]
    InvalidUrl(String),

    /// The connection is not open.
    #[error("connection is already closed")]
    AlreadyClosed,

    /// Handshake attempted on a connection that already negotiated.
    #[error("handshake already completed")]
    AlreadyOpened,

    /// A non-close frame arrived after this side sent its close frame.
    #[error("expect close frame")]
    ExpectClose,

    /// Message larger than the configured maximum.
    #[error("payload too big: {size} bytes (max: {max})")]
    PayloadTooBig {
        /// Actual message size.
        size: u64,
        /// Maximum allowed size.
        max: usize,
    },

    /// An in-flight operation was interrupted by `force_close`.
    #[error("operation cancelled, connection was force closed")]
    Cancelled,

    /// I/O error from the underlying transport.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl Error {
    /// Returns `true` for errors raised while decoding frames.
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Error::BadFrame
                | Error::InvalidFrameLength
                | Error::UnsupportedOpcode(_)
                | Error::BadControlFrame
                | Error::ControlPayloadTooBig(_)
        )
    }

    /// Returns `true` for errors raised while negotiating the upgrade.
    #[must_use]
    pub const fn is_handshake_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidStatusLine
                | Error::InvalidFieldFormat
                | Error::InvalidUpgrade
                | Error::InvalidConnection
                | Error::InvalidHost
                | Error::InvalidWsVersion
                | Error::InvalidSecWsKey
                | Error::InvalidSecWsAccept
                | Error::HeaderTooBig { .. }
                | Error::InvalidUrl(_)
        )
    }

    /// Returns `true` if the connection cannot be used after this error.
    ///
    /// State errors and `PayloadTooBig` only reject the operation that
    /// raised them.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::AlreadyClosed
                | Error::AlreadyOpened
                | Error::ExpectClose
                | Error::PayloadTooBig { .. }
        )
    }

    /// Close code to report to the peer when this error ends a connection.
    #[must_use]
    pub const fn close_code(&self) -> CloseCode {
        match self {
            Error::PayloadTooBig { .. } | Error::ControlPayloadTooBig(_) => CloseCode::TooBig,
            Error::UnsupportedOpcode(_) => CloseCode::UnknownData,
            Error::BadFrame
            | Error::InvalidFrameLength
            | Error::BadControlFrame
            | Error::ExpectClose => CloseCode::ProtocolError,
            Error::Io(_) | Error::Cancelled => CloseCode::AbnormalClosure,
            _ => CloseCode::InternalError,
        }
    }

    /// Returns the I/O error kind for transport errors.
    #[must_use]
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Error::Io(e) => Some(e.kind()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}
