//! WebSocket message types and close codes as defined in RFC 6455.

use bytes::Bytes;

/// WebSocket close status code per RFC 6455 Section 7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CloseCode {
    /// Normal closure (1000).
    #[default]
    Normal,
    /// Going away (1001), e.g. server shutdown or a silent peer.
    GoingAway,
    /// Protocol error (1002).
    ProtocolError,
    /// Unsupported data (1003).
    UnknownData,
    /// Abnormal closure (1006). Never sent on the wire by a conforming peer.
    AbnormalClosure,
    /// Invalid payload data (1007), e.g. non-UTF-8 text.
    BadPayload,
    /// Policy violation (1008).
    PolicyError,
    /// Message too big (1009).
    TooBig,
    /// Client expected the server to negotiate an extension (1010).
    NeedsExtension,
    /// Internal server error (1011).
    InternalError,
    /// Service restart (1012).
    ServiceRestart,
    /// Try again later (1013).
    TryAgainLater,
    /// Any other code.
    Other(u16),
}

impl CloseCode {
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnknownData,
            1006 => CloseCode::AbnormalClosure,
            1007 => CloseCode::BadPayload,
            1008 => CloseCode::PolicyError,
            1009 => CloseCode::TooBig,
            1010 => CloseCode::NeedsExtension,
            1011 => CloseCode::InternalError,
            1012 => CloseCode::ServiceRestart,
            1013 => CloseCode::TryAgainLater,
            other => CloseCode::Other(other),
        }
    }

    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnknownData => 1003,
            CloseCode::AbnormalClosure => 1006,
            CloseCode::BadPayload => 1007,
            CloseCode::PolicyError => 1008,
            CloseCode::TooBig => 1009,
            CloseCode::NeedsExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::ServiceRestart => 1012,
            CloseCode::TryAgainLater => 1013,
            CloseCode::Other(code) => *code,
        }
    }

    /// Check if this close code is reserved and must not be sent in a close
    /// frame (1004, 1005, 1006, 1015).
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        matches!(self.as_u16(), 1004..=1006 | 1015)
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        CloseCode::from_u16(code)
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Close frame containing status code and optional reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The close status code.
    pub code: CloseCode,
    /// Human-readable reason for closing (UTF-8, max 123 bytes on the wire).
    pub reason: String,
}

impl CloseFrame {
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Type of the last reassembled data message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageType {
    #[default]
    None,
    Text,
    Binary,
}

/// A complete message returned by [`WebSocket::read`](crate::WebSocket::read).
///
/// Payloads are opaque: text messages are not checked for UTF-8 here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A reassembled text message.
    Text(Bytes),
    /// A reassembled binary message.
    Binary(Bytes),
    /// The peer's close frame; `None` if it carried no status code.
    Close(Option<CloseFrame>),
}

impl Message {
    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    #[must_use]
    pub const fn is_close(&self) -> bool {
        matches!(self, Message::Close(_))
    }

    /// Payload of a data message. Empty for close.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        match self {
            Message::Text(data) | Message::Binary(data) => data,
            Message::Close(_) => &[],
        }
    }

    /// Borrow a text message as `&str`, if it is valid UTF-8.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(data) => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }

    /// Consume a data message into its payload.
    #[must_use]
    pub fn into_payload(self) -> Option<Bytes> {
        match self {
            Message::Text(data) | Message::Binary(data) => Some(data),
            Message::Close(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_roundtrip() {
        for code in [
            1000, 1001, 1002, 1003, 1006, 1007, 1008, 1009, 1010, 1011, 1012, 1013,
        ] {
            let close = CloseCode::from_u16(code);
            assert!(!matches!(close, CloseCode::Other(_)), "{code}");
            assert_eq!(close.as_u16(), code);
        }
        assert_eq!(CloseCode::from(4000), CloseCode::Other(4000));
        assert_eq!(CloseCode::Other(4000).as_u16(), 4000);
    }

    #[test]
    fn test_close_code_reserved() {
        assert!(CloseCode::AbnormalClosure.is_reserved());
        assert!(CloseCode::Other(1005).is_reserved());
        assert!(!CloseCode::Normal.is_reserved());
        assert_eq!(CloseCode::GoingAway.to_string(), "1001");
    }

    #[test]
    fn test_message_accessors() {
        let text = Message::Text(Bytes::from_static(b"hello"));
        assert!(text.is_text());
        assert_eq!(text.as_text(), Some("hello"));
        assert_eq!(text.payload(), b"hello");

        let binary = Message::Binary(Bytes::from_static(&[0xff, 0xfe]));
        assert!(binary.is_binary());
        assert_eq!(binary.as_text(), None);
        assert_eq!(binary.into_payload().unwrap(), Bytes::from_static(&[0xff, 0xfe]));

        let close = Message::Close(Some(CloseFrame::new(CloseCode::Normal, "bye")));
        assert!(close.is_close());
        assert!(close.payload().is_empty());
        assert!(close.into_payload().is_none());
    }

    #[test]
    fn test_text_with_invalid_utf8() {
        let msg = Message::Text(Bytes::from_static(&[0xc3, 0x28]));
        assert_eq!(msg.as_text(), None);
    }
}
