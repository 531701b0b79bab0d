//! Gossip message framing.
//!
//! Every unicast or broadcast payload is `[version, kind, body...]`.
//! The body of a `RingUpdate` is the bincode encoding of the sender's
//! ring; `SpaceRequest` and `LeaderElected` carry no body. Encoding is
//! deterministic: the ring merge relies on equal-version entries
//! re-encoding byte-identically.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{WeftError, WeftResult};

/// Bump on any incompatible change to the payload layout.
pub const WIRE_VERSION: u8 = 1;

/// Kinds of message peers exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Unicast: "I am out of addresses, please donate a range."
    SpaceRequest,
    /// Unicast: "you won the leader election, claim the universe."
    LeaderElected,
    /// Unicast or broadcast: the sender's current ring state.
    RingUpdate,
}

impl MessageKind {
    fn to_byte(self) -> u8 {
        match self {
            MessageKind::SpaceRequest => 1,
            MessageKind::LeaderElected => 2,
            MessageKind::RingUpdate => 3,
        }
    }

    fn from_byte(b: u8) -> WeftResult<Self> {
        match b {
            1 => Ok(MessageKind::SpaceRequest),
            2 => Ok(MessageKind::LeaderElected),
            3 => Ok(MessageKind::RingUpdate),
            other => Err(WeftError::Codec(format!("unknown message kind {other}"))),
        }
    }
}

pub fn encode_frame(kind: MessageKind, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + body.len());
    buf.put_u8(WIRE_VERSION);
    buf.put_u8(kind.to_byte());
    buf.put_slice(body);
    buf.freeze()
}

pub fn decode_frame(payload: &[u8]) -> WeftResult<(MessageKind, Bytes)> {
    if payload.len() < 2 {
        return Err(WeftError::Codec("truncated frame".to_string()));
    }
    if payload[0] != WIRE_VERSION {
        return Err(WeftError::BadWireVersion(payload[0]));
    }
    let kind = MessageKind::from_byte(payload[1])?;
    Ok((kind, Bytes::copy_from_slice(&payload[2..])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let frame = encode_frame(MessageKind::RingUpdate, b"ring bytes");
        let (kind, body) = decode_frame(&frame).unwrap();
        assert_eq!(kind, MessageKind::RingUpdate);
        assert_eq!(&body[..], b"ring bytes");
    }

    #[test]
    fn test_empty_body() {
        let frame = encode_frame(MessageKind::SpaceRequest, &[]);
        let (kind, body) = decode_frame(&frame).unwrap();
        assert_eq!(kind, MessageKind::SpaceRequest);
        assert!(body.is_empty());
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(decode_frame(&[]).is_err());
        assert_eq!(
            decode_frame(&[9, 1, 0]).unwrap_err(),
            WeftError::BadWireVersion(9)
        );
        assert!(matches!(
            decode_frame(&[WIRE_VERSION, 42]).unwrap_err(),
            WeftError::Codec(_)
        ));
    }
}
