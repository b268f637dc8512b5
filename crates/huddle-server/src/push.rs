//! WebSocket push channel.
//!
//! The socket's write half is owned by a writer task; everything else talks
//! to it through an unbounded queue of outgoing messages.

use axum::extract::ws::Message;
use huddle_protocol::{codec, ChatEvent, ProtocolError, ServerFrame, WireFormat};
use std::sync::atomic::{AtomicBool, Ordering};
use tenvis_huddle_core::{ChannelError, PushChannel};
use tokio::sync::mpsc;

/// Sender half of a connection's outgoing queue.
pub type Outbox = mpsc::UnboundedSender<Message>;

/// Encode a server frame as a WebSocket message.
///
/// # Errors
///
/// Returns an error if the frame cannot be encoded.
pub fn encode_message(format: WireFormat, frame: &ServerFrame) -> Result<Message, ProtocolError> {
    let data = codec::encode(format, frame)?;
    Ok(match format {
        WireFormat::Json => Message::Text(String::from_utf8_lossy(&data).into_owned()),
        WireFormat::MsgPack => Message::Binary(data.to_vec()),
    })
}

/// Push channel backed by a WebSocket connection's outbox.
#[derive(Debug)]
pub struct WsPushChannel {
    outbox: Outbox,
    format: WireFormat,
    closed: AtomicBool,
}

impl WsPushChannel {
    /// Create a push channel writing frames in `format` to `outbox`.
    #[must_use]
    pub fn new(outbox: Outbox, format: WireFormat) -> Self {
        Self {
            outbox,
            format,
            closed: AtomicBool::new(false),
        }
    }
}

impl PushChannel<ChatEvent> for WsPushChannel {
    fn deliver(&self, event: &ChatEvent) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        let message = encode_message(self.format, &ServerFrame::event(event.clone()))
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        self.outbox.send(message).map_err(|_| ChannelError::Closed)
    }

    fn close(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            // The writer may already be gone.
            let _ = self.outbox.send(Message::Close(None));
        }
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.outbox.is_closed()
    }
}
