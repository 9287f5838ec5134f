//! Application adapters over a [`Transport`](crate::transport::Transport).
//!
//! Each adapter consumes the transport's event queue and yields events in
//! its own vocabulary. Adapters are pull-based: call `next_event().await`.

pub mod media;
pub mod terminal;

pub use media::{MediaAdapter, MediaEvent};
pub use terminal::{HostFrameDecoder, RawFrames, TerminalAdapter, TerminalEvent};

/// Connection state as an adapter reports it to its application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    /// The channel reported an error. It may still be usable.
    Degraded(String),
}
