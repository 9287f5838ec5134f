//! In-process data channel pair.
//!
//! Two connected [`MemoryChannel`] ends backed by unbounded tokio queues.
//! Delivery is ordered and reliable. Both ends start open and each end's
//! event queue starts with a [`ChannelEvent::Open`].

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::channel::{ChannelError, ChannelEvent, ChannelMessage, DataChannel};

/// One end of an in-memory channel pair.
pub struct MemoryChannel {
    label: String,
    open: Arc<AtomicBool>,
    local: mpsc::UnboundedSender<ChannelEvent>,
    remote: mpsc::UnboundedSender<ChannelEvent>,
}

/// An end plus the queue of events the owner should feed to its transport.
pub type MemoryEnd = (Arc<MemoryChannel>, mpsc::UnboundedReceiver<ChannelEvent>);

pub fn channel_pair(label: &str) -> (MemoryEnd, MemoryEnd) {
    let open = Arc::new(AtomicBool::new(true));
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let _ = a_tx.send(ChannelEvent::Open);
    let _ = b_tx.send(ChannelEvent::Open);

    let a = MemoryChannel {
        label: label.to_owned(),
        open: open.clone(),
        local: a_tx.clone(),
        remote: b_tx.clone(),
    };
    let b = MemoryChannel {
        label: label.to_owned(),
        open,
        local: b_tx,
        remote: a_tx,
    };
    ((Arc::new(a), a_rx), (Arc::new(b), b_rx))
}

impl MemoryChannel {
    /// Send a text message to the peer. Framed transports ignore these.
    pub fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        self.deliver(ChannelMessage::Text(text.to_owned()))
    }

    /// Report an error on both ends without closing.
    pub fn fail(&self, reason: &str) {
        let _ = self.local.send(ChannelEvent::Error(reason.to_owned()));
        let _ = self.remote.send(ChannelEvent::Error(reason.to_owned()));
    }

    fn deliver(&self, message: ChannelMessage) -> Result<(), ChannelError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(ChannelError::Closed);
        }
        self.remote
            .send(ChannelEvent::Message(message))
            .map_err(|_| ChannelError::SendFailed("peer dropped".into()))
    }
}

impl DataChannel for MemoryChannel {
    fn send(&self, frame: Bytes) -> Result<(), ChannelError> {
        self.deliver(ChannelMessage::Binary(frame))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            tracing::debug!(label = %self.label, "memory channel closed");
            let _ = self.local.send(ChannelEvent::Close);
            let _ = self.remote.send(ChannelEvent::Close);
        }
    }

    fn label(&self) -> &str {
        &self.label
    }
}
