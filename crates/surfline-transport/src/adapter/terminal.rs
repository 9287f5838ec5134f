//! Terminal client adapter.
//!
//! Binary messages carry host frames in an application-defined schema and
//! go through a [`HostFrameDecoder`]. Text messages prefixed with
//! [`STATUS_PREFIX`] are host status lines. Once the channel is usable the
//! client announces itself with a single [`READY_SENTINEL`].

use bytes::Bytes;
use std::convert::Infallible;
use tokio::sync::mpsc;

use surfline_core::envelope::Payload;

use super::ConnectionStatus;
use crate::transport::{SecureContext, Transport, TransportError, TransportEvent};

pub const STATUS_PREFIX: &str = "beach:status:";
pub const READY_SENTINEL: &str = "__ready__";

/// Turns one binary host message into an application frame.
pub trait HostFrameDecoder: Send {
    type Frame;
    type Error: std::fmt::Display;

    fn decode(&mut self, bytes: Bytes) -> Result<Self::Frame, Self::Error>;
}

/// Passes host frames through as raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawFrames;

impl HostFrameDecoder for RawFrames {
    type Frame = Bytes;
    type Error = Infallible;

    fn decode(&mut self, bytes: Bytes) -> Result<Bytes, Infallible> {
        Ok(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent<F> {
    Connection(ConnectionStatus),
    Secure(SecureContext),
    Frame(F),
    /// Text after the status prefix.
    Status(String),
}

pub struct TerminalAdapter<D: HostFrameDecoder> {
    transport: Transport,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    decoder: D,
    first_frame: Option<Bytes>,
    ready_sent: bool,
}

impl<D: HostFrameDecoder> TerminalAdapter<D> {
    /// `first_frame` is a host frame already received out of band (for
    /// example during negotiation). It is yielded before any live frame.
    pub fn new(
        transport: Transport,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        decoder: D,
        first_frame: Option<Bytes>,
    ) -> Self {
        let mut adapter = Self {
            transport,
            events,
            decoder,
            first_frame,
            ready_sent: false,
        };
        if adapter.transport.is_open() {
            adapter.announce_ready();
        }
        adapter
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Send terminal input to the host.
    pub fn send_input(&self, bytes: &[u8]) -> Result<u64, TransportError> {
        self.transport.send_binary(bytes)
    }

    pub fn ready_sent(&self) -> bool {
        self.ready_sent
    }

    /// Next event, or `None` once the transport's event queue has ended.
    pub async fn next_event(&mut self) -> Option<TerminalEvent<D::Frame>> {
        if let Some(bytes) = self.first_frame.take() {
            if let Some(frame) = self.decode(bytes) {
                return Some(TerminalEvent::Frame(frame));
            }
        }

        loop {
            match self.events.recv().await? {
                TransportEvent::Open => {
                    self.announce_ready();
                    return Some(TerminalEvent::Connection(ConnectionStatus::Connected));
                }
                TransportEvent::Secure(ctx) => return Some(TerminalEvent::Secure(ctx)),
                TransportEvent::Close => {
                    return Some(TerminalEvent::Connection(ConnectionStatus::Disconnected))
                }
                TransportEvent::Error(reason) => {
                    return Some(TerminalEvent::Connection(ConnectionStatus::Degraded(reason)))
                }
                TransportEvent::Message(envelope) => match envelope.payload {
                    Payload::Binary(bytes) => {
                        if let Some(frame) = self.decode(bytes) {
                            return Some(TerminalEvent::Frame(frame));
                        }
                    }
                    Payload::Text(text) => match text.strip_prefix(STATUS_PREFIX) {
                        Some(status) => return Some(TerminalEvent::Status(status.to_owned())),
                        None => {
                            tracing::trace!(seq = envelope.seq, "ignoring unprefixed text from host");
                        }
                    },
                },
            }
        }
    }

    fn decode(&mut self, bytes: Bytes) -> Option<D::Frame> {
        match self.decoder.decode(bytes) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable host frame");
                None
            }
        }
    }

    fn announce_ready(&mut self) {
        if self.ready_sent {
            return;
        }
        match self.transport.send_text(READY_SENTINEL) {
            Ok(seq) => {
                tracing::debug!(seq, "ready sentinel sent");
                self.ready_sent = true;
            }
            Err(e) => tracing::warn!(error = %e, "failed to send ready sentinel"),
        }
    }
}
