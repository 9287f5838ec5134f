//! Media adapter: binary payloads forwarded verbatim, text ignored.

use bytes::Bytes;
use tokio::sync::mpsc;

use surfline_core::envelope::Payload;

use super::ConnectionStatus;
use crate::transport::{SecureContext, Transport, TransportError, TransportEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    Connection(ConnectionStatus),
    Secure(SecureContext),
    Payload(Bytes),
}

pub struct MediaAdapter {
    transport: Transport,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl MediaAdapter {
    pub fn new(transport: Transport, events: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
        Self { transport, events }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn send(&self, bytes: &[u8]) -> Result<u64, TransportError> {
        self.transport.send_binary(bytes)
    }

    pub async fn next_event(&mut self) -> Option<MediaEvent> {
        loop {
            let event = match self.events.recv().await? {
                TransportEvent::Open => MediaEvent::Connection(ConnectionStatus::Connected),
                TransportEvent::Close => MediaEvent::Connection(ConnectionStatus::Disconnected),
                TransportEvent::Error(reason) => {
                    MediaEvent::Connection(ConnectionStatus::Degraded(reason))
                }
                TransportEvent::Secure(ctx) => MediaEvent::Secure(ctx),
                TransportEvent::Message(envelope) => match envelope.payload {
                    Payload::Binary(bytes) => MediaEvent::Payload(bytes),
                    Payload::Text(_) => {
                        tracing::trace!(seq = envelope.seq, "media adapter ignoring text payload");
                        continue;
                    }
                },
            };
            return Some(event);
        }
    }
}
