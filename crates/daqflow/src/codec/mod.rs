// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Frame codec: event batches to framed byte buffers and back.
//!
//! A frame is a fixed 64-byte header (see [`header`]) followed by a payload
//! whose layout is selected by `format_version` (see [`payload`]). The codec
//! optionally LZ4-compresses the payload and protects the on-wire bytes with
//! a CRC32.
//!
//! # Compression policy
//!
//! When compression is requested the payload is LZ4-compressed; if the
//! result is not strictly smaller than the raw payload the frame stores the
//! raw bytes and `compression_type = 0`. Decompression must materialize
//! exactly `uncompressed_size` bytes or the frame is rejected.
//!
//! # Sequence numbers
//!
//! Each codec instance owns an atomic auto-sequence counter starting at 0.
//! Two producers in the same process therefore stamp independent sequences.
//! Decode is a hard all-or-nothing validation: any bad magic, size field,
//! version, checksum or payload shape rejects the whole frame.

pub mod crc;
pub mod header;
pub mod payload;

pub use crc::{crc32, verify_crc32};
pub use header::{
    CodecError, FrameHeader, FrameInfo, CHECKSUM_CRC32, CHECKSUM_NONE, COMPRESSION_LZ4,
    COMPRESSION_NONE, EOS_FLAG, FORMAT_VERSION_FULL, FORMAT_VERSION_MINIMAL, FRAME_HEADER_SIZE,
    FRAME_MAGIC,
};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::record::{EventRecord, MinimalEventRecord};

/// Payload layout selector, stored in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatVersion {
    /// Full [`EventRecord`]s with waveforms.
    Full,
    /// Packed 22-byte [`MinimalEventRecord`]s.
    Minimal,
}

impl FormatVersion {
    #[must_use]
    pub fn as_u32(self) -> u32 {
        match self {
            FormatVersion::Full => FORMAT_VERSION_FULL,
            FormatVersion::Minimal => FORMAT_VERSION_MINIMAL,
        }
    }

    #[must_use]
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            FORMAT_VERSION_FULL => Some(FormatVersion::Full),
            FORMAT_VERSION_MINIMAL => Some(FormatVersion::Minimal),
            _ => None,
        }
    }
}

impl Default for FormatVersion {
    fn default() -> Self {
        FormatVersion::Minimal
    }
}

/// A decoded batch of either record shape.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedBatch {
    Full(Vec<EventRecord>),
    Minimal(Vec<MinimalEventRecord>),
}

impl DecodedBatch {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            DecodedBatch::Full(v) => v.len(),
            DecodedBatch::Minimal(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate the batch as tagged [`crate::record::Record`]s.
    pub fn into_records(self) -> Vec<crate::record::Record> {
        match self {
            DecodedBatch::Full(v) => v.into_iter().map(crate::record::Record::Full).collect(),
            DecodedBatch::Minimal(v) => {
                v.into_iter().map(crate::record::Record::Minimal).collect()
            }
        }
    }
}

/// Encoder/decoder for event-batch frames.
#[derive(Debug)]
pub struct FrameCodec {
    compression: bool,
    checksum: bool,
    sequence: AtomicU64,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a codec with compression and checksum enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            compression: true,
            checksum: true,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn enable_compression(&mut self, enable: bool) {
        self.compression = enable;
    }

    pub fn enable_checksum(&mut self, enable: bool) {
        self.checksum = enable;
    }

    #[must_use]
    pub fn is_compression_enabled(&self) -> bool {
        self.compression
    }

    #[must_use]
    pub fn is_checksum_enabled(&self) -> bool {
        self.checksum
    }

    /// Restart the auto-sequence counter at 0.
    pub fn reset_sequence(&self) {
        self.sequence.store(0, Ordering::SeqCst);
    }

    /// Claim and return the next auto-sequence value.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// The value the next auto-encode will stamp; does not advance.
    #[must_use]
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Encode full records with an explicit sequence number.
    #[must_use]
    pub fn encode(&self, records: &[EventRecord], sequence: u64) -> Vec<u8> {
        let raw = payload::serialize_full(records);
        self.build_frame(FormatVersion::Full, records.len() as u32, raw, sequence, 0)
    }

    /// Encode full records, stamping the auto-sequence counter.
    #[must_use]
    pub fn encode_auto(&self, records: &[EventRecord]) -> Vec<u8> {
        let seq = self.next_sequence();
        self.encode(records, seq)
    }

    /// Encode minimal records with an explicit sequence number.
    #[must_use]
    pub fn encode_minimal(&self, records: &[MinimalEventRecord], sequence: u64) -> Vec<u8> {
        let raw = payload::serialize_minimal(records);
        self.build_frame(
            FormatVersion::Minimal,
            records.len() as u32,
            raw,
            sequence,
            0,
        )
    }

    /// Encode minimal records, stamping the auto-sequence counter.
    #[must_use]
    pub fn encode_minimal_auto(&self, records: &[MinimalEventRecord]) -> Vec<u8> {
        let seq = self.next_sequence();
        self.encode_minimal(records, seq)
    }

    /// Encode an End-Of-Stream sentinel frame.
    ///
    /// The sentinel carries the codec's current sequence value without
    /// advancing the counter; receivers must not run it through gap
    /// detection.
    #[must_use]
    pub fn encode_eos(&self, version: FormatVersion) -> Vec<u8> {
        let seq = self.current_sequence();
        self.build_frame(version, 0, Vec::new(), seq, EOS_FLAG)
    }

    /// Decode a frame into a batch and its sequence number.
    ///
    /// Any validation failure rejects the whole frame; no partial batches
    /// are ever returned. This function does not panic on arbitrary input.
    pub fn decode(&self, frame: &[u8]) -> Result<(DecodedBatch, u64), CodecError> {
        let head = FrameHeader::read_from(frame)?;

        let version = FormatVersion::from_u32(head.format_version)
            .ok_or(CodecError::UnsupportedVersion(head.format_version))?;

        let wire_len = head.compressed_size as usize;
        if frame.len() < FRAME_HEADER_SIZE + wire_len {
            return Err(CodecError::Truncated);
        }
        let wire = &frame[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + wire_len];

        if head.checksum_type != CHECKSUM_NONE && !verify_crc32(wire, head.checksum) {
            return Err(CodecError::ChecksumMismatch);
        }

        let raw: Vec<u8>;
        let payload_bytes: &[u8] = if head.compression_type == COMPRESSION_NONE {
            wire
        } else {
            raw = lz4_flex::block::decompress(wire, head.uncompressed_size as usize)
                .map_err(|_| CodecError::DecompressFailed)?;
            if raw.len() != head.uncompressed_size as usize {
                return Err(CodecError::DecompressFailed);
            }
            &raw
        };

        let batch = match version {
            FormatVersion::Full => DecodedBatch::Full(payload::deserialize_full(payload_bytes)?),
            FormatVersion::Minimal => {
                DecodedBatch::Minimal(payload::deserialize_minimal(payload_bytes)?)
            }
        };

        if batch.len() != head.event_count as usize {
            return Err(CodecError::PayloadShape);
        }

        Ok((batch, head.sequence_number))
    }

    fn build_frame(
        &self,
        version: FormatVersion,
        event_count: u32,
        raw: Vec<u8>,
        sequence: u64,
        reserved0: u8,
    ) -> Vec<u8> {
        let uncompressed_size = raw.len() as u32;

        let (wire, compression_type) = if self.compression && !raw.is_empty() {
            let compressed = lz4_flex::block::compress(&raw);
            if compressed.len() < raw.len() {
                (compressed, COMPRESSION_LZ4)
            } else {
                (raw, COMPRESSION_NONE)
            }
        } else {
            (raw, COMPRESSION_NONE)
        };

        let (checksum, checksum_type) = if self.checksum {
            (crc32(&wire), CHECKSUM_CRC32)
        } else {
            (0, CHECKSUM_NONE)
        };

        let mut reserved = [0u8; 14];
        reserved[0] = reserved0;

        let header = FrameHeader {
            sequence_number: sequence,
            format_version: version.as_u32(),
            event_count,
            uncompressed_size,
            compressed_size: wire.len() as u32,
            checksum,
            timestamp_ns: wall_clock_ns(),
            compression_type,
            checksum_type,
            reserved,
        };

        let mut frame = vec![0u8; FRAME_HEADER_SIZE + wire.len()];
        header.write_to(&mut frame);
        frame[FRAME_HEADER_SIZE..].copy_from_slice(&wire);
        frame
    }
}

fn wall_clock_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
