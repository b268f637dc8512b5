//! Codec for encoding and decoding Huddle frames.
//!
//! Two wire formats are supported: JSON, used for WebSocket text frames and
//! HTTP bodies, and MessagePack with a length prefix, used for WebSocket
//! binary frames.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Wire format of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// UTF-8 JSON.
    #[default]
    Json,
    /// Length-prefixed MessagePack.
    MsgPack,
}

/// Encode a value in the given format.
///
/// MessagePack output is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded value
///
/// # Errors
///
/// Returns an error if the encoded value is too large or encoding fails.
pub fn encode<T: Serialize>(format: WireFormat, value: &T) -> Result<Bytes, ProtocolError> {
    let payload = match format {
        WireFormat::Json => serde_json::to_vec(value)?,
        WireFormat::MsgPack => rmp_serde::to_vec_named(value)?,
    };

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    match format {
        WireFormat::Json => Ok(Bytes::from(payload)),
        WireFormat::MsgPack => {
            let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
            buf.put_u32(payload.len() as u32);
            buf.extend_from_slice(&payload);
            Ok(buf.freeze())
        }
    }
}

/// Decode a value in the given format.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode<T: DeserializeOwned>(format: WireFormat, data: &[u8]) -> Result<T, ProtocolError> {
    match format {
        WireFormat::Json => {
            if data.len() > MAX_FRAME_SIZE {
                return Err(ProtocolError::FrameTooLarge(data.len()));
            }
            Ok(serde_json::from_slice(data)?)
        }
        WireFormat::MsgPack => {
            if data.len() < LENGTH_PREFIX_SIZE {
                return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
            }

            let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
            if length > MAX_FRAME_SIZE {
                return Err(ProtocolError::FrameTooLarge(length));
            }

            let total_size = LENGTH_PREFIX_SIZE + length;
            if data.len() < total_size {
                return Err(ProtocolError::Incomplete(total_size - data.len()));
            }

            Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?)
        }
    }
}

/// Try to decode a MessagePack frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(value))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let value = rmp_serde::from_slice(&payload)?;

    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChatEvent;
    use crate::frames::{ClientFrame, ServerFrame};

    #[test]
    fn test_server_frame_roundtrip_both_formats() {
        let frames = vec![
            ServerFrame::welcome("alice"),
            ServerFrame::event(ChatEvent::msg("alice", "Hello, world!")),
            ServerFrame::pong(Some(42)),
            ServerFrame::error(404, "Unknown nick"),
        ];

        for format in [WireFormat::Json, WireFormat::MsgPack] {
            for frame in &frames {
                let encoded = encode(format, frame).unwrap();
                let decoded: ServerFrame = decode(format, &encoded).unwrap();
                assert_eq!(frame, &decoded);
            }
        }
    }

    #[test]
    fn test_json_is_plain_text() {
        let encoded = encode(WireFormat::Json, &ClientFrame::Ping { timestamp: None }).unwrap();
        assert_eq!(&encoded[..], br#"{"type":"ping"}"#);
    }

    #[test]
    fn test_decode_incomplete() {
        let frame = ClientFrame::Send {
            text: "test".into(),
        };
        let encoded = encode(WireFormat::MsgPack, &frame).unwrap();

        let partial = &encoded[..5];
        match decode::<ClientFrame>(WireFormat::MsgPack, partial) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_too_large() {
        let frame = ClientFrame::Send {
            text: "x".repeat(MAX_FRAME_SIZE + 1),
        };

        for format in [WireFormat::Json, WireFormat::MsgPack] {
            match encode(format, &frame) {
                Err(ProtocolError::FrameTooLarge(_)) => {}
                other => panic!("Expected FrameTooLarge error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            decode::<ClientFrame>(WireFormat::Json, b"{not json"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_streaming_decode() {
        let first = ClientFrame::Send {
            text: "one".into(),
        };
        let second = ClientFrame::Ping {
            timestamp: Some(7),
        };

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode(WireFormat::MsgPack, &first).unwrap());
        buf.extend_from_slice(&encode(WireFormat::MsgPack, &second).unwrap());

        let decoded1: ClientFrame = decode_from(&mut buf).unwrap().unwrap();
        let decoded2: ClientFrame = decode_from(&mut buf).unwrap().unwrap();

        assert_eq!(first, decoded1);
        assert_eq!(second, decoded2);
        assert!(buf.is_empty());
        assert!(decode_from::<ClientFrame>(&mut buf).unwrap().is_none());
    }
}
