//! WebSocket protocol core (RFC 6455): frame codec and handshake model.

pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;

pub use frame::{
    FrameHeader, MAX_CLOSE_REASON, MAX_CONTROL_PAYLOAD, MAX_HEADER_LEN, decode_close_payload,
    encode_close_payload, write_frame,
};
pub use handshake::{HandshakeHeader, HeaderKind, WS_GUID, compute_accept_key};
pub use mask::{MaskGenerator, apply_mask};
pub use opcode::OpCode;
