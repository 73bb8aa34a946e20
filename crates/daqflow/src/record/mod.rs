// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Digitizer event records.
//!
//! Two record shapes travel through the pipeline, selected by the frame
//! header's `format_version`:
//!
//! - [`EventRecord`] (version 1): the full event including up to six
//!   variable-length waveform arrays.
//! - [`MinimalEventRecord`] (version 2): a packed 22-byte form for the hot
//!   path where waveforms are not needed.
//!
//! Both shapes share the same flag bitfield (see [`flags`]).

pub mod flags {
    //! Named bits of the per-event status flag field.

    /// Pileup detected.
    pub const PILEUP: u64 = 0x01;
    /// Trigger lost.
    pub const TRIGGER_LOST: u64 = 0x02;
    /// Signal saturation.
    pub const OVER_RANGE: u64 = 0x04;
    /// 1024 trigger count reached.
    pub const TRIGGER_1024: u64 = 0x08;
    /// N lost triggers.
    pub const N_LOST_TRIGGER: u64 = 0x10;
}

/// A full digitizer event with optional waveform payloads.
///
/// `waveform_size` records the nominal number of samples; the individual
/// probe arrays carry their own lengths on the wire and an array may
/// legitimately be empty while `waveform_size > 0`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventRecord {
    /// Event timestamp in nanoseconds.
    pub time_stamp_ns: f64,
    /// Nominal number of waveform samples.
    pub waveform_size: u32,
    /// Long-gate energy.
    pub energy: u16,
    /// Short-gate energy.
    pub energy_short: u16,
    /// Hardware module id.
    pub module: u8,
    /// Channel within the module.
    pub channel: u8,
    /// Time resolution tag.
    pub time_resolution: u8,
    pub analog_probe1_type: u8,
    pub analog_probe2_type: u8,
    pub digital_probe1_type: u8,
    pub digital_probe2_type: u8,
    pub digital_probe3_type: u8,
    pub digital_probe4_type: u8,
    /// Down-sampling factor applied by the firmware.
    pub down_sample_factor: u8,
    /// Status flag bitfield (see [`flags`]).
    pub flags: u64,
    /// Peak amplitude reported by AMax-capable firmware.
    pub a_max: u64,
    pub analog_probe1: Vec<i32>,
    pub analog_probe2: Vec<i32>,
    pub digital_probe1: Vec<u8>,
    pub digital_probe2: Vec<u8>,
    pub digital_probe3: Vec<u8>,
    pub digital_probe4: Vec<u8>,
}

/// Serialized size of the fixed (non-array) part of an [`EventRecord`].
pub const EVENT_RECORD_FIXED_SIZE: usize = 8 + 4 + 2 + 2 + 10 + 8 + 8;

impl EventRecord {
    /// Create a record with all waveform arrays sized to `waveform_size`.
    #[must_use]
    pub fn with_waveforms(waveform_size: u32) -> Self {
        let n = waveform_size as usize;
        Self {
            waveform_size,
            analog_probe1: vec![0; n],
            analog_probe2: vec![0; n],
            digital_probe1: vec![0; n],
            digital_probe2: vec![0; n],
            digital_probe3: vec![0; n],
            digital_probe4: vec![0; n],
            ..Self::default()
        }
    }

    /// Lift a packed record into the full shape (no waveforms).
    #[must_use]
    pub fn from_minimal(rec: &MinimalEventRecord) -> Self {
        Self {
            time_stamp_ns: rec.time_stamp_ns,
            energy: rec.energy,
            energy_short: rec.energy_short,
            module: rec.module,
            channel: rec.channel,
            flags: rec.flags,
            ..Self::default()
        }
    }

    /// Serialized size of this record in a version-1 payload.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        EVENT_RECORD_FIXED_SIZE
            + 6 * 4
            + self.analog_probe1.len() * 4
            + self.analog_probe2.len() * 4
            + self.digital_probe1.len()
            + self.digital_probe2.len()
            + self.digital_probe3.len()
            + self.digital_probe4.len()
    }

    #[inline]
    #[must_use]
    pub fn has_pileup(&self) -> bool {
        self.flags & flags::PILEUP != 0
    }

    #[inline]
    #[must_use]
    pub fn has_trigger_lost(&self) -> bool {
        self.flags & flags::TRIGGER_LOST != 0
    }

    #[inline]
    #[must_use]
    pub fn has_over_range(&self) -> bool {
        self.flags & flags::OVER_RANGE != 0
    }
}

/// Packed 22-byte event record for the hot path.
///
/// Wire layout (little-endian), bit-exact with the in-memory layout:
///
/// ```text
/// module(u8) | channel(u8) | energy(u16) | energy_short(u16) | time_stamp_ns(f64) | flags(u64)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(C, packed)]
pub struct MinimalEventRecord {
    pub module: u8,
    pub channel: u8,
    pub energy: u16,
    pub energy_short: u16,
    pub time_stamp_ns: f64,
    pub flags: u64,
}

/// On-wire (and in-memory) size of a [`MinimalEventRecord`].
pub const MINIMAL_RECORD_SIZE: usize = 22;

// The packed size is a hard invariant of the wire format.
const _: () = assert!(std::mem::size_of::<MinimalEventRecord>() == MINIMAL_RECORD_SIZE);

impl MinimalEventRecord {
    /// Project a full record onto the packed hot-path form.
    #[must_use]
    pub fn from_full(rec: &EventRecord) -> Self {
        Self {
            module: rec.module,
            channel: rec.channel,
            energy: rec.energy,
            energy_short: rec.energy_short,
            time_stamp_ns: rec.time_stamp_ns,
            flags: rec.flags,
        }
    }

    #[must_use]
    pub fn new(
        module: u8,
        channel: u8,
        time_stamp_ns: f64,
        energy: u16,
        energy_short: u16,
        flags: u64,
    ) -> Self {
        Self {
            module,
            channel,
            energy,
            energy_short,
            time_stamp_ns,
            flags,
        }
    }

    /// Encode into `buf`, which must be at least [`MINIMAL_RECORD_SIZE`] bytes.
    pub fn write_to(&self, buf: &mut [u8]) {
        let energy = self.energy;
        let energy_short = self.energy_short;
        let ts = self.time_stamp_ns;
        let fl = self.flags;
        buf[0] = self.module;
        buf[1] = self.channel;
        buf[2..4].copy_from_slice(&energy.to_le_bytes());
        buf[4..6].copy_from_slice(&energy_short.to_le_bytes());
        buf[6..14].copy_from_slice(&ts.to_le_bytes());
        buf[14..22].copy_from_slice(&fl.to_le_bytes());
    }

    /// Decode from `buf`, which must be at least [`MINIMAL_RECORD_SIZE`] bytes.
    #[must_use]
    pub fn read_from(buf: &[u8]) -> Self {
        Self {
            module: buf[0],
            channel: buf[1],
            energy: u16::from_le_bytes([buf[2], buf[3]]),
            energy_short: u16::from_le_bytes([buf[4], buf[5]]),
            time_stamp_ns: f64::from_le_bytes([
                buf[6], buf[7], buf[8], buf[9], buf[10], buf[11], buf[12], buf[13],
            ]),
            flags: u64::from_le_bytes([
                buf[14], buf[15], buf[16], buf[17], buf[18], buf[19], buf[20], buf[21],
            ]),
        }
    }

    #[inline]
    #[must_use]
    pub fn has_pileup(&self) -> bool {
        self.flags & flags::PILEUP != 0
    }

    #[inline]
    #[must_use]
    pub fn has_trigger_lost(&self) -> bool {
        self.flags & flags::TRIGGER_LOST != 0
    }

    #[inline]
    #[must_use]
    pub fn has_over_range(&self) -> bool {
        self.flags & flags::OVER_RANGE != 0
    }
}

/// A decoded event of either shape.
///
/// The time-sort merger and the monitor operate on this tagged form so they
/// can serve both format versions with one code path.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Full(EventRecord),
    Minimal(MinimalEventRecord),
}

impl Record {
    /// Event timestamp in nanoseconds.
    #[inline]
    #[must_use]
    pub fn time_stamp_ns(&self) -> f64 {
        match self {
            Record::Full(r) => r.time_stamp_ns,
            Record::Minimal(r) => r.time_stamp_ns,
        }
    }

    #[inline]
    #[must_use]
    pub fn module(&self) -> u8 {
        match self {
            Record::Full(r) => r.module,
            Record::Minimal(r) => r.module,
        }
    }

    #[inline]
    #[must_use]
    pub fn channel(&self) -> u8 {
        match self {
            Record::Full(r) => r.channel,
            Record::Minimal(r) => r.channel,
        }
    }

    #[inline]
    #[must_use]
    pub fn energy(&self) -> u16 {
        match self {
            Record::Full(r) => r.energy,
            Record::Minimal(r) => r.energy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_record_is_22_bytes() {
        assert_eq!(std::mem::size_of::<MinimalEventRecord>(), 22);
        assert_eq!(MINIMAL_RECORD_SIZE, 22);
    }

    #[test]
    fn minimal_record_roundtrip() {
        let rec = MinimalEventRecord::new(3, 14, 12345.5, 1000, 500, flags::PILEUP);
        let mut buf = [0u8; MINIMAL_RECORD_SIZE];
        rec.write_to(&mut buf);
        let back = MinimalEventRecord::read_from(&buf);
        assert_eq!(back, rec);
        assert!(back.has_pileup());
        assert!(!back.has_over_range());
    }

    #[test]
    fn minimal_record_layout_is_bit_exact() {
        let rec = MinimalEventRecord::new(0xAB, 0xCD, 2.0, 0x1122, 0x3344, 0x55);
        let mut buf = [0u8; MINIMAL_RECORD_SIZE];
        rec.write_to(&mut buf);
        assert_eq!(buf[0], 0xAB);
        assert_eq!(buf[1], 0xCD);
        assert_eq!(&buf[2..4], &0x1122u16.to_le_bytes());
        assert_eq!(&buf[4..6], &0x3344u16.to_le_bytes());
        assert_eq!(&buf[6..14], &2.0f64.to_le_bytes());
        assert_eq!(&buf[14..22], &0x55u64.to_le_bytes());
    }

    #[test]
    fn full_record_wire_size() {
        let rec = EventRecord::default();
        assert_eq!(rec.wire_size(), EVENT_RECORD_FIXED_SIZE + 24);

        let rec = EventRecord::with_waveforms(10);
        // Two i32 arrays and four u8 arrays of 10 samples each.
        assert_eq!(
            rec.wire_size(),
            EVENT_RECORD_FIXED_SIZE + 24 + 2 * 40 + 4 * 10
        );
    }

    #[test]
    fn flag_helpers() {
        let mut rec = EventRecord::default();
        assert!(!rec.has_pileup());
        rec.flags = flags::PILEUP | flags::OVER_RANGE;
        assert!(rec.has_pileup());
        assert!(rec.has_over_range());
        assert!(!rec.has_trigger_lost());
    }
}
