// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! External collaborators of the core: hardware, persistence, histograms.
//!
//! The pipeline only depends on these trait surfaces. The shipped
//! implementations are the synthetic event generator used in tests and
//! mock mode, a raw append-only file persister, and a per-channel energy
//! histogram.

use crate::codec::{payload, DecodedBatch};
use crate::record::{EventRecord, Record};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Hardware-facing failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    NotFound,
    ConnectionFailed(String),
    Timeout,
    Fault(String),
}

impl std::fmt::Display for HardwareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "hardware not found"),
            Self::ConnectionFailed(msg) => write!(f, "hardware connection failed: {msg}"),
            Self::Timeout => write!(f, "hardware timeout"),
            Self::Fault(msg) => write!(f, "hardware fault: {msg}"),
        }
    }
}

impl std::error::Error for HardwareError {}

/// A digitizer (or its stand-in) as seen by a source component.
///
/// `arm` prepares the acquisition (the hardware `ArmAcquisition`), the
/// software `trigger` actually starts it, and `poll_batch` drains whatever
/// events accumulated since the last poll.
pub trait HardwareSource: Send {
    fn arm(&mut self) -> Result<(), HardwareError>;
    fn trigger(&mut self) -> Result<(), HardwareError>;
    fn disarm(&mut self);
    /// Fetch up to `max` pending events; an empty vector means no data yet.
    fn poll_batch(&mut self, max: usize) -> Result<Vec<EventRecord>, HardwareError>;
}

/// Synthetic event generator producing at a fixed rate.
///
/// Events carry monotonic nanosecond timestamps and deterministic
/// energies, which keeps pipeline tests reproducible.
pub struct MockHardwareSource {
    events_per_second: u32,
    module: u8,
    armed: bool,
    running: bool,
    started_at: Option<Instant>,
    emitted: u64,
}

impl MockHardwareSource {
    #[must_use]
    pub fn new(events_per_second: u32, module: u8) -> Self {
        Self {
            events_per_second,
            module,
            armed: false,
            running: false,
            started_at: None,
            emitted: 0,
        }
    }

    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

impl HardwareSource for MockHardwareSource {
    fn arm(&mut self) -> Result<(), HardwareError> {
        self.armed = true;
        Ok(())
    }

    fn trigger(&mut self) -> Result<(), HardwareError> {
        if !self.armed {
            return Err(HardwareError::Fault("trigger before arm".into()));
        }
        self.running = true;
        self.started_at = Some(Instant::now());
        self.emitted = 0;
        Ok(())
    }

    fn disarm(&mut self) {
        self.armed = false;
        self.running = false;
        self.started_at = None;
    }

    fn poll_batch(&mut self, max: usize) -> Result<Vec<EventRecord>, HardwareError> {
        if !self.running {
            return Ok(Vec::new());
        }
        let Some(started_at) = self.started_at else {
            return Ok(Vec::new());
        };

        let elapsed = started_at.elapsed();
        let due = (elapsed.as_secs_f64() * f64::from(self.events_per_second)) as u64;
        let pending = due.saturating_sub(self.emitted).min(max as u64);

        let mut batch = Vec::with_capacity(pending as usize);
        for _ in 0..pending {
            let n = self.emitted;
            batch.push(EventRecord {
                time_stamp_ns: n as f64 * 1e9 / f64::from(self.events_per_second),
                energy: 1000 + (n % 1000) as u16,
                energy_short: 500 + (n % 500) as u16,
                module: self.module,
                channel: (n % 16) as u8,
                flags: 0,
                ..EventRecord::default()
            });
            self.emitted += 1;
        }
        Ok(batch)
    }
}

/// Run-file persistence as seen by a writer component.
pub trait FilePersister: Send {
    fn open_run(&mut self, run_number: u32) -> io::Result<()>;
    /// Append every record of `batch`; returns bytes written.
    fn append(&mut self, batch: &DecodedBatch) -> io::Result<u64>;
    fn close_run(&mut self) -> io::Result<()>;
    fn current_path(&self) -> Option<&Path>;
}

/// Appends decoded records as a raw binary stream, one file per run.
///
/// Files are named `<prefix><run_number padded to 6><.ext>`, e.g.
/// `run_000042.dat`, so filenames never collide within a run directory.
pub struct RawFilePersister {
    dir: PathBuf,
    prefix: String,
    extension: String,
    file: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

impl RawFilePersister {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            extension: extension.into(),
            file: None,
            path: None,
        }
    }

    fn run_path(&self, run_number: u32) -> PathBuf {
        self.dir
            .join(format!("{}{:06}.{}", self.prefix, run_number, self.extension))
    }
}

impl FilePersister for RawFilePersister {
    fn open_run(&mut self, run_number: u32) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.run_path(run_number);
        let file = File::create(&path)?;
        self.file = Some(BufWriter::new(file));
        self.path = Some(path);
        Ok(())
    }

    fn append(&mut self, batch: &DecodedBatch) -> io::Result<u64> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no open run file"))?;
        let bytes = match batch {
            DecodedBatch::Full(records) => payload::serialize_full(records),
            DecodedBatch::Minimal(records) => payload::serialize_minimal(records),
        };
        file.write_all(&bytes)?;
        Ok(bytes.len() as u64)
    }

    fn close_run(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        self.path = None;
        Ok(())
    }

    fn current_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Online-monitor aggregation surface.
///
/// The monitor delivers every decoded record; rendering and HTTP serving
/// live outside the core.
pub trait HistogramSink: Send {
    /// Reset aggregates for a new run.
    fn begin_run(&mut self, run_number: u32);
    fn consume(&mut self, record: &Record);
    /// Periodic aggregate hand-off point.
    fn publish(&mut self);
}

/// Per-(module, channel) energy spectra with fixed-width bins.
pub struct EnergyHistogram {
    bin_width: u16,
    bins_per_channel: usize,
    counts: HashMap<(u8, u8), Vec<u64>>,
    total: u64,
    publishes: u64,
}

impl EnergyHistogram {
    #[must_use]
    pub fn new(bin_width: u16, bins_per_channel: usize) -> Self {
        Self {
            bin_width: bin_width.max(1),
            bins_per_channel,
            counts: HashMap::new(),
            total: 0,
            publishes: 0,
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    #[must_use]
    pub fn publishes(&self) -> u64 {
        self.publishes
    }

    /// Bin counts for one channel, if any events landed there.
    #[must_use]
    pub fn channel(&self, module: u8, channel: u8) -> Option<&[u64]> {
        self.counts.get(&(module, channel)).map(Vec::as_slice)
    }
}

impl HistogramSink for EnergyHistogram {
    fn begin_run(&mut self, _run_number: u32) {
        self.counts.clear();
        self.total = 0;
    }

    fn consume(&mut self, record: &Record) {
        let bin = (record.energy() / self.bin_width) as usize;
        let bins = self
            .counts
            .entry((record.module(), record.channel()))
            .or_insert_with(|| vec![0; self.bins_per_channel]);
        if let Some(slot) = bins.get_mut(bin) {
            *slot += 1;
        }
        self.total += 1;
    }

    fn publish(&mut self) {
        self.publishes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MinimalEventRecord;
    use std::time::Duration;

    #[test]
    fn mock_source_respects_arm_trigger_order() {
        let mut hw = MockHardwareSource::new(1000, 0);
        assert!(hw.trigger().is_err());
        hw.arm().expect("arm");
        hw.trigger().expect("trigger");
        assert!(hw.poll_batch(100).is_ok());
    }

    #[test]
    fn mock_source_produces_at_configured_rate() {
        let mut hw = MockHardwareSource::new(10_000, 2);
        hw.arm().expect("arm");
        hw.trigger().expect("trigger");
        std::thread::sleep(Duration::from_millis(100));

        let mut got = 0usize;
        loop {
            let batch = hw.poll_batch(65_536).expect("poll");
            if batch.is_empty() {
                break;
            }
            for rec in &batch {
                assert_eq!(rec.module, 2);
            }
            got += batch.len();
        }
        // ~1000 events after 100 ms at 10 kHz; allow generous scheduling slop.
        assert!(got >= 500, "only {got} events");
        assert!(got <= 3000, "{got} events");
    }

    #[test]
    fn mock_source_timestamps_monotonic() {
        let mut hw = MockHardwareSource::new(100_000, 0);
        hw.arm().expect("arm");
        hw.trigger().expect("trigger");
        std::thread::sleep(Duration::from_millis(20));
        let batch = hw.poll_batch(10_000).expect("poll");
        for pair in batch.windows(2) {
            assert!(pair[0].time_stamp_ns < pair[1].time_stamp_ns);
        }
    }

    #[test]
    fn persister_writes_minimal_records_raw() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut persister = RawFilePersister::new(dir.path(), "run_", "dat");
        persister.open_run(42).expect("open");

        let records: Vec<MinimalEventRecord> = (0..10)
            .map(|i| MinimalEventRecord::new(0, i, f64::from(i) * 10.0, 100, 50, 0))
            .collect();
        let written = persister
            .append(&DecodedBatch::Minimal(records))
            .expect("append");
        assert_eq!(written, 220);

        let path = persister.current_path().expect("path").to_path_buf();
        assert!(path.ends_with("run_000042.dat"));
        persister.close_run().expect("close");

        let data = std::fs::read(&path).expect("read");
        assert_eq!(data.len(), 220);
    }

    #[test]
    fn persister_append_without_open_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut persister = RawFilePersister::new(dir.path(), "run_", "dat");
        assert!(persister.append(&DecodedBatch::Minimal(Vec::new())).is_err());
    }

    #[test]
    fn histogram_counts_and_resets() {
        let mut hist = EnergyHistogram::new(100, 64);
        hist.begin_run(1);
        for i in 0..50u16 {
            hist.consume(&Record::Minimal(MinimalEventRecord::new(
                1,
                3,
                f64::from(i),
                1000 + i,
                0,
                0,
            )));
        }
        assert_eq!(hist.total(), 50);
        let bins = hist.channel(1, 3).expect("channel");
        assert_eq!(bins.iter().sum::<u64>(), 50);
        assert!(hist.channel(0, 0).is_none());

        hist.begin_run(2);
        assert_eq!(hist.total(), 0);
    }
}
