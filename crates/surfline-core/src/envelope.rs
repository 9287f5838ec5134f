//! Envelope: the logical message carried inside a reassembled payload.
//!
//! ```text
//! kind:1 seq:8 length:4 body..
//! ```
//!
//! `kind` is 0 for UTF-8 text and 1 for opaque binary. The sequence number
//! must stay within 2^53 − 1 so peers that store it as a double see the
//! same value.

use bytes::Bytes;
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

/// Largest sequence number an envelope may carry.
pub const MAX_SAFE_SEQUENCE: u64 = (1 << 53) - 1;

pub const ENVELOPE_HEADER_LEN: usize = 13;

#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
struct EnvelopeHeader {
    kind: u8,
    seq: U64<BigEndian>,
    length: U32<BigEndian>,
}

assert_eq_size!(EnvelopeHeader, [u8; ENVELOPE_HEADER_LEN]);

/// Payload discriminator byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadKind {
    Text = 0,
    Binary = 1,
}

impl PayloadKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Text),
            1 => Some(Self::Binary),
            _ => None,
        }
    }
}

/// Application payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Text(_) => PayloadKind::Text,
            Payload::Binary(_) => PayloadKind::Binary,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub seq: u64,
    pub payload: Payload,
}

pub fn encode_envelope(seq: u64, payload: &Payload) -> Result<Bytes, EnvelopeError> {
    if seq > MAX_SAFE_SEQUENCE {
        return Err(EnvelopeError::UnsafeSequence(seq));
    }
    let body = payload.as_bytes();
    let length = u32::try_from(body.len()).map_err(|_| EnvelopeError::BodyTooLarge(body.len()))?;

    let header = EnvelopeHeader {
        kind: payload.kind() as u8,
        seq: U64::new(seq),
        length: U32::new(length),
    };
    let mut buf = Vec::with_capacity(ENVELOPE_HEADER_LEN + body.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(body);
    Ok(Bytes::from(buf))
}

/// Decode an envelope. Bytes past the declared length are ignored.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, EnvelopeError> {
    let header =
        EnvelopeHeader::read_from_prefix(bytes).ok_or(EnvelopeError::Truncated(bytes.len()))?;

    let seq = header.seq.get();
    if seq > MAX_SAFE_SEQUENCE {
        return Err(EnvelopeError::UnsafeSequence(seq));
    }

    let declared = header.length.get() as usize;
    let available = bytes.len() - ENVELOPE_HEADER_LEN;
    if declared > available {
        return Err(EnvelopeError::LengthExceedsBuffer {
            declared,
            available,
        });
    }
    let body = &bytes[ENVELOPE_HEADER_LEN..ENVELOPE_HEADER_LEN + declared];

    let payload = match PayloadKind::from_u8(header.kind) {
        Some(PayloadKind::Text) => {
            let text = std::str::from_utf8(body).map_err(|_| EnvelopeError::InvalidUtf8)?;
            Payload::Text(text.to_owned())
        }
        Some(PayloadKind::Binary) => Payload::Binary(Bytes::copy_from_slice(body)),
        None => return Err(EnvelopeError::UnknownKind(header.kind)),
    };

    Ok(Envelope { seq, payload })
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope truncated: {0} bytes, header needs {}", ENVELOPE_HEADER_LEN)]
    Truncated(usize),

    #[error("sequence {0} exceeds the safe integer range")]
    UnsafeSequence(u64),

    #[error("envelope body of {0} bytes does not fit a u32 length")]
    BodyTooLarge(usize),

    #[error("declared length {declared} exceeds {available} available bytes")]
    LengthExceedsBuffer { declared: usize, available: usize },

    #[error("unknown payload kind {0}")]
    UnknownKind(u8),

    #[error("text payload is not valid utf-8")]
    InvalidUtf8,
}
