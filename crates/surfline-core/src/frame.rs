//! Frame wire format: one physical data-channel message.
//!
//! A frame carries a slice of one logical message plus enough metadata for
//! the receiver to place it: which message (namespace, kind, seq), how big
//! the whole message is, where this slice sits, and the CRC-32C of the
//! *complete* payload. Every field is big-endian.
//!
//! ```text
//! version:1 flags:1 ns_len:1 kind_len:1 namespace kind
//! seq:8 total_len:4 chunk_index:2 chunk_count:2 crc32c:4 payload..
//! ```
//!
//! The fixed blocks on either side of the names are zerocopy structs;
//! the names themselves are variable length and are copied by hand.

use bytes::Bytes;
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::config::FramingConfig;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Current frame format version. Anything else is rejected.
pub const FRAME_VERSION: u8 = 0xA1;

/// Flag bit 0: a MAC trailer follows the payload.
///
/// MAC verification is not implemented, so a frame with this bit set is
/// rejected rather than accepted as unauthenticated.
pub const FLAG_MAC_PRESENT: u8 = 0x01;

/// Namespace and kind lengths are carried in a single byte each.
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Size of the fixed blocks, excluding names and payload.
pub const FIXED_HEADER_LEN: usize = PREFIX_LEN + TRAILER_LEN;

const PREFIX_LEN: usize = 4;
const TRAILER_LEN: usize = 20;

// ── Fixed header blocks ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
struct FramePrefix {
    version: u8,
    flags: u8,
    namespace_len: u8,
    kind_len: u8,
}

assert_eq_size!(FramePrefix, [u8; PREFIX_LEN]);

/// Fixed fields that follow the names.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
struct FrameTrailer {
    seq: U64<BigEndian>,
    total_len: U32<BigEndian>,
    chunk_index: U16<BigEndian>,
    chunk_count: U16<BigEndian>,
    crc32c: U32<BigEndian>,
}

assert_eq_size!(FrameTrailer, [u8; TRAILER_LEN]);

// ── Frame types ───────────────────────────────────────────────────────────────

/// Per-chunk numeric header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkFields {
    /// Sender-assigned message sequence number.
    pub seq: u64,
    /// Length of the complete logical message.
    pub total_len: u32,
    pub chunk_index: u16,
    pub chunk_count: u16,
    /// CRC-32C of the complete logical message, identical on every chunk.
    pub crc32c: u32,
}

/// A parsed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub namespace: String,
    pub kind: String,
    pub seq: u64,
    pub total_len: u32,
    pub chunk_index: u16,
    pub chunk_count: u16,
    pub crc32c: u32,
    pub payload: Bytes,
}

impl Frame {
    /// Identity of the logical message this frame belongs to.
    pub fn key(&self) -> MessageKey {
        MessageKey {
            namespace: self.namespace.clone(),
            kind: self.kind.clone(),
            seq: self.seq,
        }
    }

    pub fn fields(&self) -> ChunkFields {
        ChunkFields {
            seq: self.seq,
            total_len: self.total_len,
            chunk_index: self.chunk_index,
            chunk_count: self.chunk_count,
            crc32c: self.crc32c,
        }
    }

    /// True when this frame carries a whole message on its own.
    pub fn is_single_chunk(&self) -> bool {
        self.chunk_count == 1 && self.chunk_index == 0
    }
}

/// `namespace|kind|seq`. Keys assemblies and the duplicate window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub namespace: String,
    pub kind: String,
    pub seq: u64,
}

impl std::fmt::Display for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}|{}", self.namespace, self.kind, self.seq)
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Header bytes a frame spends before its payload.
pub fn header_len(namespace: &str, kind: &str) -> usize {
    FIXED_HEADER_LEN + namespace.len() + kind.len()
}

/// Validate a namespace/kind pair against the one-byte length fields.
pub fn check_names(namespace: &str, kind: &str) -> Result<(), FramingError> {
    if namespace.len() > MAX_NAME_LEN {
        return Err(FramingError::NamespaceTooLong(namespace.len()));
    }
    if kind.len() > MAX_NAME_LEN {
        return Err(FramingError::KindTooLong(kind.len()));
    }
    if namespace.is_empty() {
        return Err(FramingError::EmptyName("namespace"));
    }
    if kind.is_empty() {
        return Err(FramingError::EmptyName("kind"));
    }
    Ok(())
}

/// Serialize one frame.
pub fn encode_frame(
    namespace: &str,
    kind: &str,
    fields: &ChunkFields,
    payload: &[u8],
) -> Result<Bytes, FramingError> {
    check_names(namespace, kind)?;

    let prefix = FramePrefix {
        version: FRAME_VERSION,
        flags: 0,
        namespace_len: namespace.len() as u8,
        kind_len: kind.len() as u8,
    };
    let trailer = FrameTrailer {
        seq: U64::new(fields.seq),
        total_len: U32::new(fields.total_len),
        chunk_index: U16::new(fields.chunk_index),
        chunk_count: U16::new(fields.chunk_count),
        crc32c: U32::new(fields.crc32c),
    };

    let mut buf = Vec::with_capacity(header_len(namespace, kind) + payload.len());
    buf.extend_from_slice(prefix.as_bytes());
    buf.extend_from_slice(namespace.as_bytes());
    buf.extend_from_slice(kind.as_bytes());
    buf.extend_from_slice(trailer.as_bytes());
    buf.extend_from_slice(payload);
    Ok(Bytes::from(buf))
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Parse and validate one frame.
///
/// All structural checks run against the borrowed input; nothing is copied
/// until the frame is known to be acceptable.
pub fn parse_frame(bytes: &[u8], config: &FramingConfig) -> Result<Frame, FramingError> {
    let prefix = FramePrefix::read_from_prefix(bytes).ok_or(FramingError::Truncated {
        needed: PREFIX_LEN,
        have: bytes.len(),
    })?;

    if prefix.version != FRAME_VERSION {
        return Err(FramingError::UnsupportedVersion(prefix.version));
    }
    if prefix.flags & FLAG_MAC_PRESENT != 0 {
        return Err(FramingError::MacUnsupported);
    }
    if prefix.namespace_len == 0 {
        return Err(FramingError::EmptyName("namespace"));
    }
    if prefix.kind_len == 0 {
        return Err(FramingError::EmptyName("kind"));
    }

    let ns_end = PREFIX_LEN + prefix.namespace_len as usize;
    let kind_end = ns_end + prefix.kind_len as usize;
    let header_end = kind_end + TRAILER_LEN;
    if bytes.len() < header_end {
        return Err(FramingError::Truncated {
            needed: header_end,
            have: bytes.len(),
        });
    }

    let namespace = std::str::from_utf8(&bytes[PREFIX_LEN..ns_end])
        .map_err(|_| FramingError::Malformed("namespace is not utf-8"))?;
    let kind = std::str::from_utf8(&bytes[ns_end..kind_end])
        .map_err(|_| FramingError::Malformed("kind is not utf-8"))?;
    let trailer = FrameTrailer::read_from_prefix(&bytes[kind_end..]).ok_or(
        FramingError::Truncated {
            needed: header_end,
            have: bytes.len(),
        },
    )?;

    let total_len = trailer.total_len.get();
    if total_len as usize > config.max_bytes {
        return Err(FramingError::TotalLenExceedsLimit {
            total_len,
            max: config.max_bytes,
        });
    }

    let chunk_index = trailer.chunk_index.get();
    let chunk_count = trailer.chunk_count.get();
    if chunk_count == 0 || chunk_index >= chunk_count {
        return Err(FramingError::InvalidChunkIndex {
            index: chunk_index,
            count: chunk_count,
        });
    }
    // Every chunk but an empty message's carries at least one byte.
    if u32::from(chunk_count) > total_len.max(1) {
        return Err(FramingError::Malformed("chunk count exceeds total length"));
    }

    let payload = &bytes[header_end..];
    if payload.len() > total_len as usize {
        return Err(FramingError::Malformed("chunk payload exceeds total length"));
    }

    Ok(Frame {
        namespace: namespace.to_owned(),
        kind: kind.to_owned(),
        seq: trailer.seq.get(),
        total_len,
        chunk_index,
        chunk_count,
        crc32c: trailer.crc32c.get(),
        payload: Bytes::copy_from_slice(payload),
    })
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Broad category of a framing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The physical message could not be interpreted. Drop it.
    Malformed,
    /// The bytes parsed but do not match what the sender declared.
    Integrity,
    /// A configured size or count limit was hit.
    ResourceLimit,
}

/// Errors raised while encoding, parsing, or reassembling frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    #[error("namespace is {0} bytes, limit is {}", MAX_NAME_LEN)]
    NamespaceTooLong(usize),

    #[error("kind is {0} bytes, limit is {}", MAX_NAME_LEN)]
    KindTooLong(usize),

    #[error("{0} must not be empty")]
    EmptyName(&'static str),

    #[error("frame truncated: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("unsupported frame version 0x{0:02x}")]
    UnsupportedVersion(u8),

    #[error("frame carries a MAC, which cannot be verified here")]
    MacUnsupported,

    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    #[error("declared length {total_len} exceeds limit {max}")]
    TotalLenExceedsLimit { total_len: u32, max: usize },

    #[error("chunk index {index} out of range for chunk count {count}")]
    InvalidChunkIndex { index: u16, count: u16 },

    #[error("payload of {len} bytes exceeds limit {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("payload needs {0} chunks, a frame can address at most {}", u16::MAX)]
    TooManyChunks(usize),

    #[error("crc mismatch: declared 0x{expected:08x}, computed 0x{actual:08x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("length mismatch: declared {declared}, received {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("assembly received {received} bytes, limit is {limit}")]
    ByteBudgetExceeded { received: usize, limit: usize },

    #[error("chunk {0} missing at completion")]
    MissingChunk(u16),
}

impl FramingError {
    pub fn class(&self) -> ErrorClass {
        match self {
            FramingError::NamespaceTooLong(_)
            | FramingError::KindTooLong(_)
            | FramingError::EmptyName(_)
            | FramingError::Truncated { .. }
            | FramingError::UnsupportedVersion(_)
            | FramingError::MacUnsupported
            | FramingError::Malformed(_)
            | FramingError::InvalidChunkIndex { .. } => ErrorClass::Malformed,

            FramingError::CrcMismatch { .. }
            | FramingError::LengthMismatch { .. }
            | FramingError::MissingChunk(_) => ErrorClass::Integrity,

            FramingError::TotalLenExceedsLimit { .. }
            | FramingError::PayloadTooLarge { .. }
            | FramingError::TooManyChunks(_)
            | FramingError::ByteBudgetExceeded { .. } => ErrorClass::ResourceLimit,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
