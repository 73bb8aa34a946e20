// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Format-version-specific payload layouts.
//!
//! Version 1 serializes each [`EventRecord`] as its fixed scalar fields in
//! declaration order followed by six length-prefixed waveform arrays
//! (`u32` element count, raw little-endian elements). `waveform_size` is
//! written but the array lengths are authoritative on decode.
//!
//! Version 2 is a raw concatenation of packed 22-byte
//! [`MinimalEventRecord`]s; any payload whose length is not a multiple of
//! 22 is rejected.

use super::header::CodecError;
use crate::record::{EventRecord, MinimalEventRecord, MINIMAL_RECORD_SIZE};

/// Serialize full records into a version-1 payload.
#[must_use]
pub fn serialize_full(records: &[EventRecord]) -> Vec<u8> {
    let total: usize = records.iter().map(EventRecord::wire_size).sum();
    let mut out = Vec::with_capacity(total);

    for rec in records {
        out.extend_from_slice(&rec.time_stamp_ns.to_le_bytes());
        out.extend_from_slice(&rec.waveform_size.to_le_bytes());
        out.extend_from_slice(&rec.energy.to_le_bytes());
        out.extend_from_slice(&rec.energy_short.to_le_bytes());
        out.push(rec.module);
        out.push(rec.channel);
        out.push(rec.time_resolution);
        out.push(rec.analog_probe1_type);
        out.push(rec.analog_probe2_type);
        out.push(rec.digital_probe1_type);
        out.push(rec.digital_probe2_type);
        out.push(rec.digital_probe3_type);
        out.push(rec.digital_probe4_type);
        out.push(rec.down_sample_factor);
        out.extend_from_slice(&rec.flags.to_le_bytes());
        out.extend_from_slice(&rec.a_max.to_le_bytes());

        write_i32_array(&mut out, &rec.analog_probe1);
        write_i32_array(&mut out, &rec.analog_probe2);
        write_u8_array(&mut out, &rec.digital_probe1);
        write_u8_array(&mut out, &rec.digital_probe2);
        write_u8_array(&mut out, &rec.digital_probe3);
        write_u8_array(&mut out, &rec.digital_probe4);
    }

    out
}

/// Serialize minimal records into a version-2 payload.
#[must_use]
pub fn serialize_minimal(records: &[MinimalEventRecord]) -> Vec<u8> {
    let mut out = vec![0u8; records.len() * MINIMAL_RECORD_SIZE];
    for (i, rec) in records.iter().enumerate() {
        rec.write_to(&mut out[i * MINIMAL_RECORD_SIZE..(i + 1) * MINIMAL_RECORD_SIZE]);
    }
    out
}

/// Deserialize a version-1 payload.
pub fn deserialize_full(payload: &[u8]) -> Result<Vec<EventRecord>, CodecError> {
    let mut records = Vec::new();
    let mut cursor = Reader::new(payload);

    while !cursor.is_empty() {
        let mut rec = EventRecord {
            time_stamp_ns: cursor.read_f64()?,
            waveform_size: cursor.read_u32()?,
            energy: cursor.read_u16()?,
            energy_short: cursor.read_u16()?,
            module: cursor.read_u8()?,
            channel: cursor.read_u8()?,
            time_resolution: cursor.read_u8()?,
            analog_probe1_type: cursor.read_u8()?,
            analog_probe2_type: cursor.read_u8()?,
            digital_probe1_type: cursor.read_u8()?,
            digital_probe2_type: cursor.read_u8()?,
            digital_probe3_type: cursor.read_u8()?,
            digital_probe4_type: cursor.read_u8()?,
            down_sample_factor: cursor.read_u8()?,
            flags: cursor.read_u64()?,
            a_max: cursor.read_u64()?,
            ..EventRecord::default()
        };

        rec.analog_probe1 = cursor.read_i32_array()?;
        rec.analog_probe2 = cursor.read_i32_array()?;
        rec.digital_probe1 = cursor.read_u8_array()?;
        rec.digital_probe2 = cursor.read_u8_array()?;
        rec.digital_probe3 = cursor.read_u8_array()?;
        rec.digital_probe4 = cursor.read_u8_array()?;

        records.push(rec);
    }

    Ok(records)
}

/// Deserialize a version-2 payload.
pub fn deserialize_minimal(payload: &[u8]) -> Result<Vec<MinimalEventRecord>, CodecError> {
    if payload.len() % MINIMAL_RECORD_SIZE != 0 {
        return Err(CodecError::PayloadShape);
    }
    Ok(payload
        .chunks_exact(MINIMAL_RECORD_SIZE)
        .map(MinimalEventRecord::read_from)
        .collect())
}

fn write_i32_array(out: &mut Vec<u8>, values: &[i32]) {
    out.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn write_u8_array(out: &mut Vec<u8>, values: &[u8]) {
    out.extend_from_slice(&(values.len() as u32).to_le_bytes());
    out.extend_from_slice(values);
}

/// Bounds-checked little-endian reader over a payload slice.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.buf.len() {
            return Err(CodecError::PayloadShape);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    fn read_i32_array(&mut self) -> Result<Vec<i32>, CodecError> {
        let len = self.read_u32()? as usize;
        // Guard against a corrupt length running past the payload.
        if len > self.buf.len().saturating_sub(self.pos) / 4 {
            return Err(CodecError::PayloadShape);
        }
        let bytes = self.take(len * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn read_u8_array(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u32()? as usize;
        if len > self.buf.len().saturating_sub(self.pos) {
            return Err(CodecError::PayloadShape);
        }
        Ok(self.take(len)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::flags;

    fn sample_full(i: usize) -> EventRecord {
        EventRecord {
            time_stamp_ns: i as f64 * 1000.0,
            waveform_size: 4,
            energy: 1000 + i as u16,
            energy_short: 500 + i as u16,
            module: (i % 4) as u8,
            channel: (i % 16) as u8,
            time_resolution: 2,
            flags: flags::PILEUP,
            a_max: 4096,
            analog_probe1: vec![1, -2, 3, -4],
            analog_probe2: vec![10, 20, 30, 40],
            digital_probe1: vec![0, 1, 0, 1],
            digital_probe2: vec![1, 1, 0, 0],
            digital_probe3: Vec::new(),
            digital_probe4: Vec::new(),
            ..EventRecord::default()
        }
    }

    #[test]
    fn full_roundtrip() {
        let records: Vec<_> = (0..7).map(sample_full).collect();
        let payload = serialize_full(&records);
        let back = deserialize_full(&payload).expect("deserialize");
        assert_eq!(back, records);
    }

    #[test]
    fn empty_arrays_with_nonzero_waveform_size() {
        let mut rec = sample_full(0);
        rec.analog_probe1.clear();
        rec.waveform_size = 100;
        let payload = serialize_full(&[rec.clone()]);
        let back = deserialize_full(&payload).expect("deserialize");
        assert_eq!(back[0].waveform_size, 100);
        assert!(back[0].analog_probe1.is_empty());
        assert_eq!(back[0].analog_probe2, rec.analog_probe2);
    }

    #[test]
    fn minimal_roundtrip() {
        let records: Vec<_> = (0..5)
            .map(|i| {
                MinimalEventRecord::new(
                    (i % 4) as u8,
                    (i % 16) as u8,
                    i as f64 * 1000.0,
                    1000 + i as u16,
                    500 + i as u16,
                    (i % 4) as u64,
                )
            })
            .collect();
        let payload = serialize_minimal(&records);
        assert_eq!(payload.len(), 5 * MINIMAL_RECORD_SIZE);
        let back = deserialize_minimal(&payload).expect("deserialize");
        assert_eq!(back, records);
    }

    #[test]
    fn minimal_rejects_ragged_payload() {
        let payload = vec![0u8; MINIMAL_RECORD_SIZE + 1];
        assert_eq!(
            deserialize_minimal(&payload),
            Err(CodecError::PayloadShape)
        );
    }

    #[test]
    fn full_rejects_truncated_record() {
        let payload = serialize_full(&[sample_full(1)]);
        assert!(deserialize_full(&payload[..payload.len() - 3]).is_err());
    }

    #[test]
    fn full_rejects_corrupt_array_length() {
        let mut payload = serialize_full(&[sample_full(1)]);
        // First array length sits right after the fixed fields.
        let off = crate::record::EVENT_RECORD_FIXED_SIZE;
        payload[off..off + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(
            deserialize_full(&payload),
            Err(CodecError::PayloadShape)
        );
    }
}
