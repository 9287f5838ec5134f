//! surfline-core — checksums, wire formats, and configuration.
//! The transport and signaling crates depend on this one.

pub mod config;
pub mod crc32c;
pub mod envelope;
pub mod frame;

pub use config::{FramingConfig, SurflineConfig};
pub use envelope::{decode_envelope, encode_envelope, Envelope, Payload};
pub use frame::{encode_frame, parse_frame, ChunkFields, ErrorClass, Frame, FramingError, MessageKey};
