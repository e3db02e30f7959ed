//! Envelope framing (panic-free).
//!
//! Parsing rules:
//! - Never index (`buf[0]`); use `Buf` with `remaining()` checks.
//! - Never `unwrap()` / `expect()` / `panic!()` in production paths.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CommuniqueError, Result};

/// Kind tag (1 byte) + correlation id (4 bytes, big-endian).
pub const HEADER_LEN: usize = 5;

/// Envelope kind. Tag values are shared with every peer implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Request = 0,
    Response = 1,
    Info = 2,
    RequestError = 3,
}

impl MessageKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(MessageKind::Request),
            1 => Some(MessageKind::Response),
            2 => Some(MessageKind::Info),
            3 => Some(MessageKind::RequestError),
            _ => None,
        }
    }
}

/// Parsed envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: MessageKind,
    /// Meaningful for Request/Response/RequestError; always 0 for Info.
    pub correlation_id: u32,
    /// Opaque payload (zero-copy on decode).
    pub body: Bytes,
}

impl Envelope {
    pub fn new(kind: MessageKind, correlation_id: u32, body: impl Into<Bytes>) -> Self {
        let correlation_id = if kind == MessageKind::Info { 0 } else { correlation_id };
        Self {
            kind,
            correlation_id,
            body: body.into(),
        }
    }

    pub fn request(token: u32, body: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Request, token, body)
    }

    pub fn response(token: u32, body: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Response, token, body)
    }

    pub fn request_error(token: u32, body: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::RequestError, token, body)
    }

    pub fn info(body: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Info, 0, body)
    }

    /// Encode into a single transport frame.
    pub fn encode(&self) -> Bytes {
        encode(self.kind, self.correlation_id, &self.body)
    }
}

/// Encode `kind | correlation_id (BE) | body`.
pub fn encode(kind: MessageKind, correlation_id: u32, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_u8(kind.tag());
    buf.put_u32(correlation_id);
    buf.put_slice(body);
    buf.freeze()
}

/// Decode a transport frame into an envelope.
pub fn decode(mut buf: Bytes) -> Result<Envelope> {
    if buf.remaining() < HEADER_LEN {
        return Err(CommuniqueError::Format(format!(
            "frame too short: {} bytes, need at least {HEADER_LEN}",
            buf.remaining()
        )));
    }

    let tag = buf.get_u8();
    let kind = MessageKind::from_tag(tag)
        .ok_or_else(|| CommuniqueError::Format(format!("unknown message kind: {tag}")))?;
    let correlation_id = buf.get_u32();

    // Remaining bytes are the body.
    let body = buf.copy_to_bytes(buf.remaining());

    Ok(Envelope {
        kind,
        correlation_id,
        body,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn header_is_kind_then_big_endian_id() {
        let frame = encode(MessageKind::Response, 0x0102_0304, b"ok");
        assert_eq!(&frame[..], &[1, 1, 2, 3, 4, b'o', b'k']);
    }

    #[test]
    fn info_forces_zero_correlation_id() {
        let env = Envelope::new(MessageKind::Info, 77, "x");
        assert_eq!(env.correlation_id, 0);
    }

    #[test]
    fn round_trip_edges() {
        let bodies: [&[u8]; 3] = [b"", b"\0\0payload\0", &[0xff; 64]];
        for kind in [
            MessageKind::Request,
            MessageKind::Response,
            MessageKind::RequestError,
        ] {
            for id in [0, 1, u32::MAX] {
                for body in bodies {
                    let env = decode(encode(kind, id, body)).unwrap();
                    assert_eq!(env.kind, kind);
                    assert_eq!(env.correlation_id, id);
                    assert_eq!(&env.body[..], body);
                }
            }
        }
    }
}
