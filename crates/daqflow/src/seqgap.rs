// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Receive-side sequence-gap detection.
//!
//! Fan-out sockets silently drop frames when a subscriber is slow. Each
//! receiver runs one detector per input stream and checks the frame
//! header's sequence number; a gap is operational telemetry, never a
//! stream-breaking error.

/// Details of the most recent detected gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapInfo {
    /// Sequence number that was expected.
    pub expected: u64,
    /// Sequence number actually received.
    pub received: u64,
    /// Number of frames missing in between.
    pub dropped_count: u64,
}

/// Outcome of a sequence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqCheck {
    /// Sequence is the expected one.
    Ok,
    /// One or more frames were dropped before this one.
    Gap,
    /// Sequence went backwards; the detector does not advance.
    Backwards,
}

/// Tracks the next expected sequence number of one input stream.
#[derive(Debug, Default)]
pub struct SequenceGapDetector {
    expected: Option<u64>,
    gap_count: u64,
    last_gap: Option<GapInfo>,
}

impl SequenceGapDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a received sequence number.
    ///
    /// The first call latches `expected = sequence + 1` and returns
    /// [`SeqCheck::Ok`].
    pub fn check(&mut self, sequence: u64) -> SeqCheck {
        let Some(expected) = self.expected else {
            self.expected = Some(sequence + 1);
            return SeqCheck::Ok;
        };

        if sequence == expected {
            self.expected = Some(sequence + 1);
            SeqCheck::Ok
        } else if sequence > expected {
            self.last_gap = Some(GapInfo {
                expected,
                received: sequence,
                dropped_count: sequence - expected,
            });
            self.gap_count += 1;
            self.expected = Some(sequence + 1);
            SeqCheck::Gap
        } else {
            SeqCheck::Backwards
        }
    }

    /// Clear expected sequence and counters; call at run start.
    pub fn reset(&mut self) {
        self.expected = None;
        self.gap_count = 0;
        self.last_gap = None;
    }

    #[must_use]
    pub fn has_expected_sequence(&self) -> bool {
        self.expected.is_some()
    }

    /// Total number of gaps (not dropped frames) seen since the last reset.
    #[must_use]
    pub fn gap_count(&self) -> u64 {
        self.gap_count
    }

    #[must_use]
    pub fn last_gap(&self) -> Option<GapInfo> {
        self.last_gap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuous_stream_has_no_gaps() {
        let mut det = SequenceGapDetector::new();
        for seq in 0..100 {
            assert_eq!(det.check(seq), SeqCheck::Ok);
        }
        assert_eq!(det.gap_count(), 0);
        assert_eq!(det.last_gap(), None);
    }

    #[test]
    fn first_sequence_latches_regardless_of_value() {
        let mut det = SequenceGapDetector::new();
        assert!(!det.has_expected_sequence());
        assert_eq!(det.check(500), SeqCheck::Ok);
        assert!(det.has_expected_sequence());
        assert_eq!(det.check(501), SeqCheck::Ok);
    }

    #[test]
    fn single_skip_reports_one_gap() {
        let mut det = SequenceGapDetector::new();
        assert_eq!(det.check(0), SeqCheck::Ok);
        assert_eq!(det.check(1), SeqCheck::Ok);
        assert_eq!(det.check(3), SeqCheck::Gap);
        assert_eq!(
            det.last_gap(),
            Some(GapInfo {
                expected: 2,
                received: 3,
                dropped_count: 1
            })
        );
        assert_eq!(det.gap_count(), 1);
        // Stream continues normally after the gap.
        assert_eq!(det.check(4), SeqCheck::Ok);
        assert_eq!(det.gap_count(), 1);
    }

    #[test]
    fn wide_gap_counts_all_dropped() {
        let mut det = SequenceGapDetector::new();
        det.check(10);
        assert_eq!(det.check(20), SeqCheck::Gap);
        assert_eq!(det.last_gap().map(|g| g.dropped_count), Some(9));
    }

    #[test]
    fn backwards_does_not_advance() {
        let mut det = SequenceGapDetector::new();
        det.check(5);
        assert_eq!(det.check(3), SeqCheck::Backwards);
        assert_eq!(det.gap_count(), 0);
        // Expected is still 6.
        assert_eq!(det.check(6), SeqCheck::Ok);
    }

    #[test]
    fn reset_clears_state() {
        let mut det = SequenceGapDetector::new();
        det.check(0);
        det.check(5);
        assert_eq!(det.gap_count(), 1);
        det.reset();
        assert!(!det.has_expected_sequence());
        assert_eq!(det.gap_count(), 0);
        assert_eq!(det.last_gap(), None);
        assert_eq!(det.check(100), SeqCheck::Ok);
    }
}
