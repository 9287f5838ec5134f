//! Chunk encoder. Splits one logical message into frames.

use bytes::Bytes;

use surfline_core::config::FramingConfig;
use surfline_core::crc32c::crc32c;
use surfline_core::frame::{self, encode_frame, ChunkFields, FramingError};

/// How a payload of a given size would be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunk_count: usize,
    /// Header bytes spent per frame.
    pub frame_overhead: usize,
    /// Total bytes on the wire across all frames.
    pub wire_bytes: usize,
}

/// Number of frames a payload of `len` bytes needs. Never zero.
fn chunk_count(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size).max(1)
}

/// Plan the framing of a `len`-byte payload without encoding it.
pub fn plan_chunks(
    namespace: &str,
    kind: &str,
    len: usize,
    config: &FramingConfig,
) -> Result<ChunkPlan, FramingError> {
    frame::check_names(namespace, kind)?;
    if len > config.max_bytes {
        return Err(FramingError::PayloadTooLarge {
            len,
            max: config.max_bytes,
        });
    }
    let count = chunk_count(len, config.chunk_size);
    if count > u16::MAX as usize {
        return Err(FramingError::TooManyChunks(count));
    }
    let frame_overhead = frame::header_len(namespace, kind);
    Ok(ChunkPlan {
        chunk_count: count,
        frame_overhead,
        wire_bytes: len + count * frame_overhead,
    })
}

/// Encode `payload` as one or more frames, in chunk order.
///
/// Every frame carries the CRC-32C of the whole payload. An empty payload
/// still produces one frame so the receiver sees the message.
pub fn encode_chunks(
    namespace: &str,
    kind: &str,
    seq: u64,
    payload: &[u8],
    config: &FramingConfig,
) -> Result<Vec<Bytes>, FramingError> {
    let plan = plan_chunks(namespace, kind, payload.len(), config)?;
    let total_len = u32::try_from(payload.len()).map_err(|_| FramingError::PayloadTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;
    let crc = crc32c(payload);

    let mut fields = ChunkFields {
        seq,
        total_len,
        chunk_index: 0,
        chunk_count: plan.chunk_count as u16,
        crc32c: crc,
    };

    if payload.is_empty() {
        return Ok(vec![encode_frame(namespace, kind, &fields, &[])?]);
    }

    let mut frames = Vec::with_capacity(plan.chunk_count);
    for (index, slice) in payload.chunks(config.chunk_size).enumerate() {
        fields.chunk_index = index as u16;
        frames.push(encode_frame(namespace, kind, &fields, slice)?);
    }

    tracing::trace!(
        namespace,
        kind,
        seq,
        bytes = payload.len(),
        chunks = frames.len(),
        "encoded framed message"
    );
    Ok(frames)
}
