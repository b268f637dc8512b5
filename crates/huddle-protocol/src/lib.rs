//! # huddle-protocol
//!
//! Wire definitions for the Huddle chat server.
//!
//! This crate defines what travels between Huddle clients and the server,
//! over both the long-poll HTTP endpoints and the WebSocket push channel.
//!
//! ## Types
//!
//! - `ChatEvent` - Join, part and message events delivered to participants
//! - `ClientFrame` / `ServerFrame` - WebSocket frames in each direction
//! - `codec` - JSON text and length-prefixed MessagePack binary encodings
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{codec, ChatEvent, ServerFrame, WireFormat};
//!
//! let frame = ServerFrame::event(ChatEvent::msg("alice", "Hello, world!"));
//!
//! let encoded = codec::encode(WireFormat::MsgPack, &frame).unwrap();
//! let decoded: ServerFrame = codec::decode(WireFormat::MsgPack, &encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod events;
pub mod frames;

pub use codec::{decode, encode, ProtocolError, WireFormat};
pub use events::{validate_nick, ChatEvent, MAX_NICK_LENGTH};
pub use frames::{ClientFrame, ServerFrame, PROTOCOL_VERSION};
