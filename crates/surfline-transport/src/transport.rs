//! Framed transport over a data channel.
//!
//! Outbound: payload → envelope (with the next sequence number) → frames →
//! `DataChannel::send`, in order. Inbound: binary channel message → frame →
//! reassembler → envelope → [`TransportEvent::Message`].
//!
//! Events go out through the unbounded queue returned by [`Transport::new`].
//! A `Transport` is cheap to clone; clones share one sequence counter, one
//! reassembler, and one event queue.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use surfline_core::config::FramingConfig;
use surfline_core::envelope::{decode_envelope, encode_envelope, Envelope, EnvelopeError, Payload};
use surfline_core::frame::{parse_frame, FramingError};

use crate::channel::{ChannelError, ChannelEvent, ChannelMessage, DataChannel};
use crate::encoder::encode_chunks;
use crate::reassembly::{EvictionPolicy, FramedReassembler, QueueDepth};

pub const DEFAULT_NAMESPACE: &str = "surfline";
pub const DEFAULT_KIND: &str = "message";

/// Outcome of the secure handshake that ran before this transport existed.
///
/// The handshake itself lives elsewhere; the transport only announces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureContext {
    pub handshake_id: String,
    /// Short code both sides can compare out of band.
    pub verification_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    /// Always the first queued event when a secure context was supplied.
    Secure(SecureContext),
    Message(Envelope),
    Close,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub namespace: String,
    pub kind: String,
    /// First outbound sequence number.
    pub initial_seq: u64,
    pub secure: Option<SecureContext>,
    pub eviction: EvictionPolicy,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_owned(),
            kind: DEFAULT_KIND.to_owned(),
            initial_seq: 0,
            secure: None,
            eviction: EvictionPolicy::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    channel: Arc<dyn DataChannel>,
    config: FramingConfig,
    namespace: String,
    kind: String,
    next_seq: AtomicU64,
    reassembler: Mutex<FramedReassembler>,
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: AtomicBool,
}

impl Transport {
    /// Wrap `channel`. The returned receiver yields every [`TransportEvent`].
    pub fn new(
        channel: Arc<dyn DataChannel>,
        config: FramingConfig,
        options: TransportOptions,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(secure) = options.secure {
            let _ = tx.send(TransportEvent::Secure(secure));
        }
        let reassembler = FramedReassembler::with_policy(config.clone(), options.eviction);
        let inner = TransportInner {
            channel,
            config,
            namespace: options.namespace,
            kind: options.kind,
            next_seq: AtomicU64::new(options.initial_seq),
            reassembler: Mutex::new(reassembler),
            events: tx,
            closed: AtomicBool::new(false),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire) && self.inner.channel.is_open()
    }

    pub fn label(&self) -> &str {
        self.inner.channel.label()
    }

    pub fn config(&self) -> &FramingConfig {
        &self.inner.config
    }

    /// Send UTF-8 text. Returns the sequence number used.
    pub fn send_text(&self, text: &str) -> Result<u64, TransportError> {
        self.send_payload(&Payload::Text(text.to_owned()))
    }

    /// Send opaque bytes. Returns the sequence number used.
    pub fn send_binary(&self, bytes: &[u8]) -> Result<u64, TransportError> {
        self.send_payload(&Payload::Binary(Bytes::copy_from_slice(bytes)))
    }

    pub fn send_payload(&self, payload: &Payload) -> Result<u64, TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let inner = &self.inner;
        let seq = inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let envelope = encode_envelope(seq, payload)?;
        let frames = encode_chunks(&inner.namespace, &inner.kind, seq, &envelope, &inner.config)?;
        let count = frames.len();
        for frame in frames {
            inner.channel.send(frame)?;
        }
        tracing::trace!(
            label = %inner.channel.label(),
            seq,
            bytes = payload.len(),
            frames = count,
            "message sent"
        );
        Ok(seq)
    }

    /// Feed one event from the underlying channel.
    pub fn handle_channel_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => {
                tracing::debug!(label = %self.label(), "data channel open");
                self.emit(TransportEvent::Open);
            }
            ChannelEvent::Close => {
                if !self.inner.closed.swap(true, Ordering::AcqRel) {
                    tracing::debug!(label = %self.label(), "data channel closed");
                    self.emit(TransportEvent::Close);
                }
            }
            ChannelEvent::Error(reason) => {
                tracing::warn!(label = %self.label(), %reason, "data channel error");
                self.emit(TransportEvent::Error(reason));
            }
            ChannelEvent::Message(ChannelMessage::Binary(bytes)) => match self.receive_frame(&bytes) {
                Ok(Some(envelope)) => self.emit(TransportEvent::Message(envelope)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(label = %self.label(), error = %e, "dropping undeliverable frame");
                }
            },
            ChannelEvent::Message(ChannelMessage::Text(text)) => {
                tracing::warn!(
                    label = %self.label(),
                    len = text.len(),
                    "ignoring text message on framed channel"
                );
            }
        }
    }

    /// Parse and reassemble one physical message.
    ///
    /// Returns the envelope when this frame completed a message.
    pub fn receive_frame(&self, bytes: &[u8]) -> Result<Option<Envelope>, TransportError> {
        let frame = parse_frame(bytes, &self.inner.config)?;
        let completed = {
            let mut reassembler = self
                .inner
                .reassembler
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            reassembler.ingest(frame, Instant::now())?
        };
        match completed {
            Some(message) => Ok(Some(decode_envelope(&message.payload)?)),
            None => Ok(None),
        }
    }

    pub fn queue_depth(&self) -> QueueDepth {
        self.inner
            .reassembler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .queue_depth()
    }

    /// Close the channel. Only the first call has any effect.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.channel.close();
            self.emit(TransportEvent::Close);
        }
    }

    /// Spawn a task that feeds `events` into this transport until the
    /// queue ends.
    pub fn attach(&self, mut events: mpsc::UnboundedReceiver<ChannelEvent>) -> JoinHandle<()> {
        let transport = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                transport.handle_channel_event(event);
            }
        })
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.inner.events.send(event);
    }
}
