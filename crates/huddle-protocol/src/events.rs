//! Chat events.
//!
//! Events are what a participant receives, whether pushed over a WebSocket
//! or collected by a long-poll.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum nick length.
pub const MAX_NICK_LENGTH: usize = 50;

/// Validate a nick.
///
/// # Errors
///
/// Returns an error message if the nick is invalid.
pub fn validate_nick(nick: &str) -> Result<(), &'static str> {
    if nick.is_empty() {
        return Err("Nick cannot be empty");
    }
    if nick.len() > MAX_NICK_LENGTH {
        return Err("Nick too long");
    }
    if !nick.chars().all(|c| c.is_ascii_graphic()) {
        return Err("Nick contains invalid characters");
    }
    Ok(())
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// An event delivered to participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatEvent {
    /// A participant joined.
    Join {
        /// Nick of the participant.
        nick: String,
        /// When it happened, in milliseconds.
        timestamp: u64,
    },

    /// A participant left.
    Part {
        /// Nick of the participant.
        nick: String,
        /// When it happened, in milliseconds.
        timestamp: u64,
    },

    /// A participant said something.
    Msg {
        /// Nick of the sender.
        nick: String,
        /// Message text.
        text: String,
        /// When it was sent, in milliseconds.
        timestamp: u64,
    },
}

impl ChatEvent {
    /// Create a Join event stamped now.
    #[must_use]
    pub fn join(nick: impl Into<String>) -> Self {
        ChatEvent::Join {
            nick: nick.into(),
            timestamp: now_millis(),
        }
    }

    /// Create a Part event stamped now.
    #[must_use]
    pub fn part(nick: impl Into<String>) -> Self {
        ChatEvent::Part {
            nick: nick.into(),
            timestamp: now_millis(),
        }
    }

    /// Create a Msg event stamped now.
    #[must_use]
    pub fn msg(nick: impl Into<String>, text: impl Into<String>) -> Self {
        ChatEvent::Msg {
            nick: nick.into(),
            text: text.into(),
            timestamp: now_millis(),
        }
    }

    /// Get the nick the event is about.
    #[must_use]
    pub fn nick(&self) -> &str {
        match self {
            ChatEvent::Join { nick, .. }
            | ChatEvent::Part { nick, .. }
            | ChatEvent::Msg { nick, .. } => nick,
        }
    }

    /// Get the event timestamp.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        match self {
            ChatEvent::Join { timestamp, .. }
            | ChatEvent::Part { timestamp, .. }
            | ChatEvent::Msg { timestamp, .. } => *timestamp,
        }
    }
}
