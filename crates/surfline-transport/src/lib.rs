//! surfline-transport — chunked framing over an ordered data channel.
//!
//! Large logical messages are split into frames no bigger than the
//! configured chunk size, sent in order, and reassembled and integrity
//! checked on the far side.

pub mod adapter;
pub mod channel;
pub mod encoder;
pub mod memory;
pub mod reassembly;
pub mod transport;

pub use channel::{ChannelError, ChannelEvent, ChannelMessage, DataChannel};
pub use encoder::{encode_chunks, plan_chunks, ChunkPlan};
pub use reassembly::{EvictionPolicy, FramedMessage, FramedReassembler, QueueDepth};
pub use transport::{SecureContext, Transport, TransportError, TransportEvent, TransportOptions};
