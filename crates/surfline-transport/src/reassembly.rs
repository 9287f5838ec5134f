//! Framed message reassembly.
//!
//! Frames for one logical message may arrive in any order, interleaved with
//! frames of other messages. Each `(namespace, kind, seq)` gets an assembly
//! with one slot per chunk. When every slot is filled the payload is
//! concatenated in index order and checked against the declared length and
//! CRC-32C.
//!
//! Bounded in four ways: partial assemblies time out, at most
//! `max_inflight` exist at once, none may grow past its declared length
//! or `max_bytes`, and the oldest is evicted while all of them together
//! hold more than `max_bytes`. Completed keys are remembered for `timeout`
//! (up to `recent_capacity` of them) so a retransmitted message is not
//! delivered twice.

use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use surfline_core::config::FramingConfig;
use surfline_core::crc32c::{crc32c, Crc32c};
use surfline_core::frame::{Frame, FramingError, MessageKey};

/// Which partial assembly to drop when `max_inflight` is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// The assembly created first.
    #[default]
    OldestFirst,
    /// The assembly that has gone longest without a new chunk.
    LeastRecentlyUpdated,
}

/// A fully reassembled, integrity-checked logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedMessage {
    pub namespace: String,
    pub kind: String,
    pub seq: u64,
    pub payload: Bytes,
}

/// Snapshot of partial-assembly pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueDepth {
    pub inflight_messages: usize,
    pub inflight_bytes: usize,
}

struct Assembly {
    chunk_count: u16,
    total_len: u32,
    crc32c: u32,
    slots: Vec<Option<Bytes>>,
    filled: usize,
    received_bytes: usize,
    created_at: Instant,
    updated_at: Instant,
}

impl Assembly {
    fn new(frame: &Frame, now: Instant) -> Self {
        Self {
            chunk_count: frame.chunk_count,
            total_len: frame.total_len,
            crc32c: frame.crc32c,
            slots: vec![None; frame.chunk_count as usize],
            filled: 0,
            received_bytes: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn matches(&self, frame: &Frame) -> bool {
        self.chunk_count == frame.chunk_count
            && self.total_len == frame.total_len
            && self.crc32c == frame.crc32c
    }

    fn is_complete(&self) -> bool {
        self.filled == self.slots.len()
    }
}

pub struct FramedReassembler {
    config: FramingConfig,
    policy: EvictionPolicy,
    assemblies: HashMap<MessageKey, Assembly>,
    recent: VecDeque<(MessageKey, Instant)>,
    /// Sum of `received_bytes` over all partial assemblies.
    inflight_bytes: usize,
}

impl FramedReassembler {
    pub fn new(config: FramingConfig) -> Self {
        Self::with_policy(config, EvictionPolicy::default())
    }

    pub fn with_policy(config: FramingConfig, policy: EvictionPolicy) -> Self {
        Self {
            config,
            policy,
            assemblies: HashMap::new(),
            recent: VecDeque::new(),
            inflight_bytes: 0,
        }
    }

    pub fn config(&self) -> &FramingConfig {
        &self.config
    }

    /// Feed one parsed frame.
    ///
    /// Returns the completed message when this frame fills the last slot,
    /// `Ok(None)` when more chunks are needed or the message was already
    /// delivered. On error, any partial state for the frame's key is gone.
    pub fn ingest(
        &mut self,
        frame: Frame,
        now: Instant,
    ) -> Result<Option<FramedMessage>, FramingError> {
        self.gc(now);

        if frame.chunk_count == 0 || frame.chunk_index >= frame.chunk_count {
            return Err(FramingError::InvalidChunkIndex {
                index: frame.chunk_index,
                count: frame.chunk_count,
            });
        }
        if u32::from(frame.chunk_count) > frame.total_len.max(1) {
            return Err(FramingError::Malformed("chunk count exceeds total length"));
        }
        if frame.total_len as usize > self.config.max_bytes {
            return Err(FramingError::TotalLenExceedsLimit {
                total_len: frame.total_len,
                max: self.config.max_bytes,
            });
        }

        let key = frame.key();
        if self.is_recent(&key) {
            tracing::trace!(key = %key, "dropping frame for already delivered message");
            return Ok(None);
        }

        if frame.is_single_chunk() {
            return self.complete_single(key, frame, now).map(Some);
        }

        let stale = self
            .assemblies
            .get(&key)
            .is_some_and(|assembly| !assembly.matches(&frame));
        if stale {
            tracing::debug!(key = %key, "framed message metadata changed, restarting assembly");
            self.take(&key);
        }

        if !self.assemblies.contains_key(&key) {
            while self.assemblies.len() >= self.config.max_inflight {
                if !self.evict_one("capacity") {
                    break;
                }
            }
            self.assemblies.insert(key.clone(), Assembly::new(&frame, now));
        }

        let max_bytes = self.config.max_bytes;
        let Some(assembly) = self.assemblies.get_mut(&key) else {
            return Ok(None);
        };
        let limit = (assembly.total_len as usize).min(max_bytes);

        let slot = &mut assembly.slots[frame.chunk_index as usize];
        if slot.is_some() {
            tracing::trace!(key = %key, index = frame.chunk_index, "duplicate chunk ignored");
            return Ok(None);
        }

        let received = assembly.received_bytes + frame.payload.len();
        if received > limit {
            self.take(&key);
            tracing::warn!(key = %key, received, limit, "framed message exceeded its byte budget");
            return Err(FramingError::ByteBudgetExceeded { received, limit });
        }

        let added = frame.payload.len();
        *slot = Some(frame.payload);
        assembly.received_bytes = received;
        assembly.filled += 1;
        assembly.updated_at = now;
        let complete = assembly.is_complete();
        tracing::trace!(key = %key, index = frame.chunk_index, filled = assembly.filled, "chunk stored");
        self.inflight_bytes += added;

        if !complete {
            self.evict_over_budget();
            return Ok(None);
        }

        let Some(assembly) = self.take(&key) else {
            return Ok(None);
        };
        self.finish(key, assembly, now).map(Some)
    }

    fn complete_single(
        &mut self,
        key: MessageKey,
        frame: Frame,
        now: Instant,
    ) -> Result<FramedMessage, FramingError> {
        // A single-chunk frame supersedes any partial state under the same key.
        self.take(&key);

        if frame.payload.len() != frame.total_len as usize {
            tracing::warn!(key = %key, declared = frame.total_len, actual = frame.payload.len(), "framed message length mismatch");
            return Err(FramingError::LengthMismatch {
                declared: frame.total_len,
                actual: frame.payload.len(),
            });
        }
        let actual = crc32c(&frame.payload);
        if actual != frame.crc32c {
            tracing::warn!(key = %key, "framed message failed crc check");
            return Err(FramingError::CrcMismatch {
                expected: frame.crc32c,
                actual,
            });
        }

        self.remember(key.clone(), now);
        Ok(FramedMessage {
            namespace: key.namespace,
            kind: key.kind,
            seq: key.seq,
            payload: frame.payload,
        })
    }

    fn finish(
        &mut self,
        key: MessageKey,
        assembly: Assembly,
        now: Instant,
    ) -> Result<FramedMessage, FramingError> {
        let mut payload = BytesMut::with_capacity(assembly.received_bytes);
        let mut hasher = Crc32c::new();
        for (index, slot) in assembly.slots.iter().enumerate() {
            let Some(chunk) = slot else {
                return Err(FramingError::MissingChunk(index as u16));
            };
            hasher.update(chunk);
            payload.extend_from_slice(chunk);
        }

        if payload.len() != assembly.total_len as usize {
            tracing::warn!(key = %key, declared = assembly.total_len, actual = payload.len(), "framed message length mismatch");
            return Err(FramingError::LengthMismatch {
                declared: assembly.total_len,
                actual: payload.len(),
            });
        }
        let actual = hasher.finalize();
        if actual != assembly.crc32c {
            tracing::warn!(key = %key, "framed message failed crc check");
            return Err(FramingError::CrcMismatch {
                expected: assembly.crc32c,
                actual,
            });
        }

        tracing::debug!(key = %key, bytes = payload.len(), chunks = assembly.slots.len(), "framed message reassembled");
        self.remember(key.clone(), now);
        Ok(FramedMessage {
            namespace: key.namespace,
            kind: key.kind,
            seq: key.seq,
            payload: payload.freeze(),
        })
    }

    /// Drop expired assemblies and completion records.
    pub fn gc(&mut self, now: Instant) {
        let timeout = self.config.timeout;
        let mut freed = 0;
        self.assemblies.retain(|key, assembly| {
            let expired = now.saturating_duration_since(assembly.created_at) > timeout;
            if expired {
                tracing::warn!(
                    namespace = %key.namespace,
                    kind = %key.kind,
                    seq = key.seq,
                    filled = assembly.filled,
                    chunks = assembly.slots.len(),
                    "dropping timed out framed message"
                );
                freed += assembly.received_bytes;
            }
            !expired
        });
        self.inflight_bytes = self.inflight_bytes.saturating_sub(freed);
        self.recent
            .retain(|(_, completed)| now.saturating_duration_since(*completed) <= timeout);
        while self.recent.len() > self.config.recent_capacity {
            self.recent.pop_front();
        }
    }

    /// Whether `key` was completed within the duplicate window.
    pub fn is_recent(&self, key: &MessageKey) -> bool {
        self.recent.iter().any(|(k, _)| k == key)
    }

    /// Number of partial assemblies.
    pub fn inflight(&self) -> usize {
        self.assemblies.len()
    }

    pub fn queue_depth(&self) -> QueueDepth {
        QueueDepth {
            inflight_messages: self.assemblies.len(),
            inflight_bytes: self.inflight_bytes,
        }
    }

    fn remember(&mut self, key: MessageKey, now: Instant) {
        if self.config.recent_capacity == 0 {
            return;
        }
        self.recent.push_back((key, now));
        while self.recent.len() > self.config.recent_capacity {
            self.recent.pop_front();
        }
    }

    fn take(&mut self, key: &MessageKey) -> Option<Assembly> {
        let assembly = self.assemblies.remove(key)?;
        self.inflight_bytes = self.inflight_bytes.saturating_sub(assembly.received_bytes);
        Some(assembly)
    }

    /// Evict until buffered partial bytes fit within `max_bytes`.
    fn evict_over_budget(&mut self) {
        while self.inflight_bytes > self.config.max_bytes {
            if !self.evict_one("memory") {
                break;
            }
        }
    }

    fn evict_one(&mut self, reason: &'static str) -> bool {
        let victim = match self.policy {
            EvictionPolicy::OldestFirst => self
                .assemblies
                .iter()
                .min_by_key(|(_, a)| a.created_at)
                .map(|(k, _)| k.clone()),
            EvictionPolicy::LeastRecentlyUpdated => self
                .assemblies
                .iter()
                .min_by_key(|(_, a)| a.updated_at)
                .map(|(k, _)| k.clone()),
        };
        match victim.and_then(|key| self.take(&key).map(|a| (key, a))) {
            Some((key, assembly)) => {
                tracing::warn!(
                    namespace = %key.namespace,
                    kind = %key.kind,
                    seq = key.seq,
                    filled = assembly.filled,
                    reason,
                    "evicting partial framed message"
                );
                true
            }
            None => false,
        }
    }
}
