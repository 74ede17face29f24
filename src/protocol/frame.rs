//! WebSocket frame header parsing and serialization (RFC 6455 section 5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                    Masking key (if present)                   |
//! +---------------------------------------------------------------+
//! |                          Payload data                         |
//! +---------------------------------------------------------------+
//! ```
//!
//! Parsing works on whatever bytes are buffered so far and reports "need
//! more data" as `Ok(None)`, so a caller can simply re-parse after the next
//! transport read.

use bytes::Buf;

use crate::buffer::{Buffer, ByteView};
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;

/// Largest possible frame header: 2 + 8 extended length + 4 mask key.
pub const MAX_HEADER_LEN: usize = 14;

/// Maximum payload size for control frames.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Maximum close reason length: control payload minus the 2-byte code.
pub const MAX_CLOSE_REASON: usize = MAX_CONTROL_PAYLOAD - 2;

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment of a message.
    pub fin: bool,
    pub opcode: OpCode,
    /// Payload is masked with `mask_key`.
    pub masked: bool,
    /// The four wire key bytes read big-endian.
    pub mask_key: u32,
    pub payload_len: u64,
    /// Bytes occupied by the header on the wire.
    pub header_len: usize,
}

impl FrameHeader {
    /// Header for an unmasked frame.
    #[must_use]
    pub const fn new(fin: bool, opcode: OpCode, payload_len: u64) -> Self {
        Self {
            fin,
            opcode,
            masked: false,
            mask_key: 0,
            payload_len,
            header_len: 2 + extended_len_size(payload_len),
        }
    }

    /// Set the mask key.
    #[must_use]
    pub const fn with_mask(mut self, key: u32) -> Self {
        if !self.masked {
            self.header_len += 4;
        }
        self.masked = true;
        self.mask_key = key;
        self
    }

    /// Parse a header from the front of `buf`.
    ///
    /// Returns `Ok(None)` if `buf` does not yet hold the whole header.
    ///
    /// # Errors
    ///
    /// - `Error::BadFrame` if any reserved bit is set
    /// - `Error::UnsupportedOpcode` for reserved opcodes
    /// - `Error::BadControlFrame` for a non-final control frame
    /// - `Error::InvalidFrameLength` for an out-of-range 64-bit length
    /// - `Error::ControlPayloadTooBig` for a control payload over 125 bytes
    pub fn parse(buf: &[u8]) -> Result<Option<Self>> {
        let mut view = ByteView::new(buf);
        if view.remaining() < 2 {
            return Ok(None);
        }

        let byte0 = view.get_u8();
        if byte0 & 0x70 != 0 {
            return Err(Error::BadFrame);
        }
        let fin = byte0 & 0x80 != 0;
        let opcode = OpCode::from_u8(byte0 & 0x0F)?;
        if opcode.is_control() && !fin {
            return Err(Error::BadControlFrame);
        }

        let byte1 = view.get_u8();
        let masked = byte1 & 0x80 != 0;
        let payload_len = match byte1 & 0x7F {
            126 => {
                if view.remaining() < 2 {
                    return Ok(None);
                }
                u64::from(view.get_u16())
            }
            127 => {
                if view.remaining() < 8 {
                    return Ok(None);
                }
                let len = view.get_u64();
                if len & (1 << 63) != 0 || usize::try_from(len).is_err() {
                    return Err(Error::InvalidFrameLength);
                }
                len
            }
            len => u64::from(len),
        };

        if opcode.is_control() && payload_len > MAX_CONTROL_PAYLOAD as u64 {
            return Err(Error::ControlPayloadTooBig(payload_len));
        }

        let mask_key = if masked {
            if view.remaining() < 4 {
                return Ok(None);
            }
            view.get_u32()
        } else {
            0
        };

        Ok(Some(Self {
            fin,
            opcode,
            masked,
            mask_key,
            payload_len,
            header_len: view.position(),
        }))
    }

    /// Header plus payload length, if addressable.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidFrameLength` if the sum overflows `usize`.
    pub fn frame_len(&self) -> Result<usize> {
        usize::try_from(self.payload_len)
            .ok()
            .and_then(|len| len.checked_add(self.header_len))
            .ok_or(Error::InvalidFrameLength)
    }

    /// Serialize the header, picking the smallest length encoding.
    pub fn encode(&self, out: &mut Buffer) {
        let mut header = [0u8; MAX_HEADER_LEN];
        header[0] = self.opcode.as_u8() | if self.fin { 0x80 } else { 0 };
        let mask_bit = if self.masked { 0x80 } else { 0 };

        let mut len = 2;
        match extended_len_size(self.payload_len) {
            0 => header[1] = mask_bit | self.payload_len as u8,
            2 => {
                header[1] = mask_bit | 126;
                header[2..4].copy_from_slice(&(self.payload_len as u16).to_be_bytes());
                len += 2;
            }
            _ => {
                header[1] = mask_bit | 127;
                header[2..10].copy_from_slice(&self.payload_len.to_be_bytes());
                len += 8;
            }
        }
        if self.masked {
            header[len..len + 4].copy_from_slice(&self.mask_key.to_be_bytes());
            len += 4;
        }
        out.append(&header[..len]);
    }
}

const fn extended_len_size(payload_len: u64) -> usize {
    if payload_len <= 125 {
        0
    } else if payload_len <= 0xFFFF {
        2
    } else {
        8
    }
}

/// Append one complete frame to `out`, masking the payload in place if a
/// key is given.
pub fn write_frame(out: &mut Buffer, fin: bool, opcode: OpCode, payload: &[u8], mask: Option<u32>) {
    let mut header = FrameHeader::new(fin, opcode, payload.len() as u64);
    if let Some(key) = mask {
        header = header.with_mask(key);
    }
    out.ensure_writable(header.header_len + payload.len());
    header.encode(out);

    let start = out.len();
    out.append(payload);
    if let Some(key) = mask {
        apply_mask(&mut out.readable_mut()[start..], key);
    }
}

/// Build a close payload: big-endian code followed by the reason, cut to
/// 123 bytes on a character boundary.
#[must_use]
pub fn encode_close_payload(code: CloseCode, reason: &str) -> Vec<u8> {
    let mut end = reason.len().min(MAX_CLOSE_REASON);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    let mut payload = Vec::with_capacity(2 + end);
    payload.extend_from_slice(&code.as_u16().to_be_bytes());
    payload.extend_from_slice(&reason.as_bytes()[..end]);
    payload
}

/// Decode a close payload.
///
/// An empty payload carries no close code and yields `Ok(None)`.
///
/// # Errors
///
/// Returns `Error::BadFrame` for a 1-byte payload or a reason that is not
/// UTF-8.
pub fn decode_close_payload(mut view: ByteView<'_>) -> Result<Option<CloseFrame>> {
    match view.remaining() {
        0 => Ok(None),
        1 => Err(Error::BadFrame),
        _ => {
            let code = CloseCode::from_u16(view.get_u16());
            let reason = std::str::from_utf8(view.as_slice()).map_err(|_| Error::BadFrame)?;
            Ok(Some(CloseFrame::new(code, reason)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(header: &FrameHeader) -> Vec<u8> {
        let mut buf = Buffer::new();
        header.encode(&mut buf);
        buf.readable().to_vec()
    }

    // --------------------------------------------------------------------------
    // Parsing
    // --------------------------------------------------------------------------
    #[test]
    fn test_parse_unmasked_text_frame() {
        let data = &[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f];
        let header = FrameHeader::parse(data).unwrap().unwrap();
        assert!(header.fin);
        assert!(!header.masked);
        assert_eq!(header.opcode, OpCode::Text);
        assert_eq!(header.payload_len, 5);
        assert_eq!(header.header_len, 2);
        assert_eq!(header.frame_len().unwrap(), 7);
    }

    #[test]
    fn test_parse_masked_text_frame() {
        let data = &[
            0x81, 0x85, // FIN + Text, MASK + len=5
            0x37, 0xfa, 0x21, 0x3d, // Mask key
            0x7f, 0x9f, 0x4d, 0x51, 0x58, // Masked "Hello"
        ];
        let header = FrameHeader::parse(data).unwrap().unwrap();
        assert!(header.masked);
        assert_eq!(header.mask_key, 0x37fa_213d);
        assert_eq!(header.header_len, 6);

        let mut payload = data[6..].to_vec();
        apply_mask(&mut payload, header.mask_key);
        assert_eq!(payload, b"Hello");
    }

    #[test]
    fn test_parse_fragment_flags() {
        let header = FrameHeader::parse(&[0x01, 0x03]).unwrap().unwrap();
        assert!(!header.fin);
        assert_eq!(header.opcode, OpCode::Text);

        let header = FrameHeader::parse(&[0x80, 0x03]).unwrap().unwrap();
        assert!(header.fin);
        assert_eq!(header.opcode, OpCode::Continuation);
    }

    #[test]
    fn test_parse_extended_lengths() {
        let header = FrameHeader::parse(&[0x82, 0x7E, 0x01, 0x00]).unwrap().unwrap();
        assert_eq!(header.payload_len, 256);
        assert_eq!(header.header_len, 4);

        let header = FrameHeader::parse(&[0x82, 0x7F, 0, 0, 0, 0, 0, 1, 0, 0])
            .unwrap()
            .unwrap();
        assert_eq!(header.payload_len, 65536);
        assert_eq!(header.header_len, 10);
    }

    #[test]
    fn test_parse_incomplete_needs_more() {
        assert_eq!(FrameHeader::parse(&[]).unwrap(), None);
        assert_eq!(FrameHeader::parse(&[0x81]).unwrap(), None);
        assert_eq!(FrameHeader::parse(&[0x82, 0x7E, 0x01]).unwrap(), None);
        assert_eq!(FrameHeader::parse(&[0x82, 0x7F, 0, 0, 0]).unwrap(), None);
        assert_eq!(FrameHeader::parse(&[0x81, 0x85, 0x37, 0xfa]).unwrap(), None);
    }

    #[test]
    fn test_parse_reserved_bits() {
        for byte0 in [0xC1, 0xA1, 0x91] {
            assert!(matches!(
                FrameHeader::parse(&[byte0, 0x00]),
                Err(Error::BadFrame)
            ));
        }
    }

    #[test]
    fn test_parse_reserved_opcode() {
        assert!(matches!(
            FrameHeader::parse(&[0x83, 0x00]),
            Err(Error::UnsupportedOpcode(0x3))
        ));
        assert!(matches!(
            FrameHeader::parse(&[0x8B, 0x00]),
            Err(Error::UnsupportedOpcode(0xB))
        ));
    }

    #[test]
    fn test_parse_fragmented_control_frame() {
        assert!(matches!(
            FrameHeader::parse(&[0x09, 0x00]),
            Err(Error::BadControlFrame)
        ));
    }

    #[test]
    fn test_parse_control_payload_too_big() {
        assert!(matches!(
            FrameHeader::parse(&[0x89, 0x7E, 0x00, 0x7E]),
            Err(Error::ControlPayloadTooBig(126))
        ));
        assert!(FrameHeader::parse(&[0x89, 0x7D]).unwrap().is_some());
    }

    #[test]
    fn test_parse_invalid_64bit_length() {
        let data = [0x82, 0x7F, 0x80, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            FrameHeader::parse(&data),
            Err(Error::InvalidFrameLength)
        ));
    }

    // --------------------------------------------------------------------------
    // Serialization
    // --------------------------------------------------------------------------
    #[test]
    fn test_header_roundtrip_boundary_lengths() {
        for len in [0u64, 125, 126, 65535, 65536] {
            for mask in [None, Some(0xdead_beef)] {
                let mut header = FrameHeader::new(true, OpCode::Binary, len);
                if let Some(key) = mask {
                    header = header.with_mask(key);
                }
                let bytes = encode(&header);
                assert_eq!(bytes.len(), header.header_len);
                let parsed = FrameHeader::parse(&bytes).unwrap().unwrap();
                assert_eq!(parsed, header, "len {len} mask {mask:?}");
            }
        }
    }

    #[test]
    fn test_encode_smallest_length_code() {
        assert_eq!(encode(&FrameHeader::new(true, OpCode::Text, 125)), [0x81, 125]);
        assert_eq!(
            encode(&FrameHeader::new(true, OpCode::Text, 126)),
            [0x81, 126, 0x00, 0x7E]
        );
        assert_eq!(encode(&FrameHeader::new(false, OpCode::Binary, 65536)).len(), 10);
        assert_eq!(FrameHeader::new(true, OpCode::Ping, 0).with_mask(1).header_len, 6);
    }

    #[test]
    fn test_write_frame_masked() {
        let mut buf = Buffer::new();
        write_frame(&mut buf, true, OpCode::Text, b"Hello", Some(0x37fa_213d));
        assert_eq!(
            buf.readable(),
            &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn test_write_frame_unmasked() {
        let mut buf = Buffer::new();
        write_frame(&mut buf, false, OpCode::Binary, &[1, 2, 3], None);
        assert_eq!(buf.readable(), &[0x02, 0x03, 1, 2, 3]);
    }

    // --------------------------------------------------------------------------
    // Close payload
    // --------------------------------------------------------------------------
    #[test]
    fn test_close_payload_roundtrip() {
        let payload = encode_close_payload(CloseCode::Normal, "bye");
        assert_eq!(payload, [0x03, 0xe8, b'b', b'y', b'e']);
        let frame = decode_close_payload(ByteView::new(&payload)).unwrap().unwrap();
        assert_eq!(frame.code, CloseCode::Normal);
        assert_eq!(frame.reason, "bye");
    }

    #[test]
    fn test_close_payload_truncates_reason() {
        let reason = "x".repeat(200);
        let payload = encode_close_payload(CloseCode::GoingAway, &reason);
        assert_eq!(payload.len(), MAX_CONTROL_PAYLOAD);

        // Multi-byte characters are never split.
        let reason = "é".repeat(100);
        let payload = encode_close_payload(CloseCode::GoingAway, &reason);
        assert_eq!(payload.len(), 2 + 122);
        assert!(std::str::from_utf8(&payload[2..]).is_ok());
    }

    #[test]
    fn test_close_payload_edge_lengths() {
        assert_eq!(decode_close_payload(ByteView::new(&[])).unwrap(), None);
        assert!(matches!(
            decode_close_payload(ByteView::new(&[0x03])),
            Err(Error::BadFrame)
        ));
        assert!(matches!(
            decode_close_payload(ByteView::new(&[0x03, 0xe8, 0xff])),
            Err(Error::BadFrame)
        ));
        let frame = decode_close_payload(ByteView::new(&[0x0f, 0xa0])).unwrap().unwrap();
        assert_eq!(frame.code, CloseCode::Other(4000));
        assert!(frame.reason.is_empty());
    }
}
