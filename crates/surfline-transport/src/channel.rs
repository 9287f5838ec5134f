//! Data channel seam.
//!
//! The transport never talks to a WebRTC stack directly. It sends frames
//! through a [`DataChannel`] and is fed [`ChannelEvent`]s by whoever owns
//! the underlying channel.

use bytes::Bytes;

/// An ordered, reliable, message-oriented channel.
///
/// Implementations must deliver messages in send order and must not
/// split or merge them.
pub trait DataChannel: Send + Sync {
    /// Queue one binary message.
    fn send(&self, frame: Bytes) -> Result<(), ChannelError>;

    fn is_open(&self) -> bool;

    /// Close the channel. Idempotent.
    fn close(&self);

    /// Channel label, used in log fields.
    fn label(&self) -> &str;
}

/// Something the underlying channel reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message(ChannelMessage),
    Close,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Binary(Bytes),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("data channel is closed")]
    Closed,
    #[error("data channel send failed: {0}")]
    SendFailed(String),
}
