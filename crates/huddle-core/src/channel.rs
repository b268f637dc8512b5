//! Push channel abstraction for Huddle.
//!
//! A push channel is the live, bidirectional transport handle a participant
//! is reachable through (a WebSocket, typically). The core only tracks whether
//! one is attached and closes it on detach; framing and I/O belong to the
//! transport that implements this trait.

use thiserror::Error;

/// Push channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel has already been closed.
    #[error("Push channel closed")]
    Closed,

    /// The transport refused the event.
    #[error("Push failed: {0}")]
    SendFailed(String),
}

/// A live transport handle that events of type `E` can be pushed through.
///
/// Implementations must not block: `deliver` is called while fanning out
/// events and is expected to hand the event to a writer task or queue.
pub trait PushChannel<E>: Send + Sync + 'static {
    /// Hand an event to the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is closed or the transport refused it.
    fn deliver(&self, event: &E) -> Result<(), ChannelError>;

    /// Close the underlying transport.
    fn close(&mut self);

    /// Check if the channel is still open.
    fn is_open(&self) -> bool {
        true
    }
}
