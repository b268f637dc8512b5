//! WebSocket frames.
//!
//! Clients attached over a WebSocket send `ClientFrame`s and receive
//! `ServerFrame`s. Long-poll clients never see frames, only bare events.

use crate::events::ChatEvent;
use serde::{Deserialize, Serialize};

/// Current protocol version, announced in the welcome frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// A frame sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Say something to everyone.
    Send {
        /// Message text.
        text: String,
    },

    /// Keepalive ping.
    Ping {
        /// Optional timestamp, echoed in the pong.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

/// A frame sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Sent once, right after the push channel is attached.
    Welcome {
        /// The identifier the channel is attached to.
        identifier: String,
        /// Protocol version.
        version: u8,
    },

    /// A chat event.
    Event {
        /// The event.
        event: ChatEvent,
    },

    /// Keepalive pong.
    Pong {
        /// Echoed timestamp from ping.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Error response.
    Error {
        /// Error code.
        code: u16,
        /// Human-readable error message.
        message: String,
    },
}

impl ServerFrame {
    /// Create a new Welcome frame.
    #[must_use]
    pub fn welcome(identifier: impl Into<String>) -> Self {
        ServerFrame::Welcome {
            identifier: identifier.into(),
            version: PROTOCOL_VERSION,
        }
    }

    /// Create a new Event frame.
    #[must_use]
    pub fn event(event: ChatEvent) -> Self {
        ServerFrame::Event { event }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        ServerFrame::Pong { timestamp }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code,
            message: message.into(),
        }
    }
}
