// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Time-sort merger: N inputs to one timestamp-ordered output.
//!
//! Each input's receive thread decodes frames and inserts records into a
//! per-input min-heap. The merge thread advances a global low-water mark
//! at `min(heads) - sort_window_ns` and flushes everything older, sorted
//! by timestamp, re-encoded with the merger's own auto-sequencing codec.
//! Records arriving with timestamps below an already-flushed mark are
//! dropped and counted (`late_dropped`), never forwarded out of order.
//!
//! Larger windows give better ordering at the cost of latency and memory.

use super::source::heartbeat_loop;
use super::{join_workers, Component, ComponentCore, ComponentError};
use crate::codec::{FormatVersion, FrameCodec, FrameInfo};
use crate::config::ComponentConfig;
use crate::control::ComponentStatus;
use crate::lifecycle::ComponentState;
use crate::record::{EventRecord, MinimalEventRecord, Record};
use crate::seqgap::{SeqCheck, SequenceGapDetector};
use crate::transport::{Transport, TransportConfig};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const MERGE_TICK: Duration = Duration::from_millis(10);

/// Records per downstream frame.
const FLUSH_BATCH: usize = 1024;

const EOS_FORWARD_TIMEOUT: Duration = Duration::from_secs(2);

/// A record keyed by timestamp for heap ordering.
struct TimedRecord {
    ts: f64,
    record: Record,
}

impl PartialEq for TimedRecord {
    fn eq(&self, other: &Self) -> bool {
        self.ts.total_cmp(&other.ts) == std::cmp::Ordering::Equal
    }
}

impl Eq for TimedRecord {}

impl PartialOrd for TimedRecord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedRecord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ts.total_cmp(&other.ts)
    }
}

/// Per-input window buffer.
struct InputSlot {
    heap: Mutex<BinaryHeap<Reverse<TimedRecord>>>,
    eos: AtomicBool,
}

impl InputSlot {
    fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            eos: AtomicBool::new(false),
        }
    }
}

/// N-input merger emitting a timestamp-ordered stream.
pub struct TimeSortMerger {
    core: Arc<ComponentCore>,
    config: Mutex<Option<ComponentConfig>>,
    inputs: Mutex<Vec<Arc<Transport>>>,
    output: Mutex<Option<Arc<Transport>>>,
    codec: Mutex<Option<Arc<FrameCodec>>>,
    slots: Mutex<Vec<Arc<InputSlot>>>,
    /// Bits of the f64 low-water mark already flushed.
    watermark: Arc<AtomicU64>,
    eos_forwarded: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for TimeSortMerger {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSortMerger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Arc::new(ComponentCore::new("timesort")),
            config: Mutex::new(None),
            inputs: Mutex::new(Vec::new()),
            output: Mutex::new(None),
            codec: Mutex::new(None),
            slots: Mutex::new(Vec::new()),
            watermark: Arc::new(AtomicU64::new(f64::NEG_INFINITY.to_bits())),
            eos_forwarded: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn sort_window_ns(&self) -> u64 {
        self.config
            .lock()
            .as_ref()
            .map_or(crate::config::DEFAULT_SORT_WINDOW_NS, |c| c.sort_window_ns)
    }

    #[must_use]
    pub fn input_count(&self) -> usize {
        self.config
            .lock()
            .as_ref()
            .map_or(0, |c| c.input_addresses.len())
    }

    #[must_use]
    pub fn has_forwarded_eos(&self) -> bool {
        self.eos_forwarded.load(Ordering::SeqCst)
    }

    /// Records dropped for arriving older than the flushed window.
    #[must_use]
    pub fn late_dropped(&self) -> u64 {
        self.core.metrics.late_dropped.load(Ordering::Relaxed)
    }

    fn require_state(
        &self,
        expected: ComponentState,
        operation: &'static str,
    ) -> Result<(), ComponentError> {
        let state = self.core.state();
        if state != expected {
            return Err(ComponentError::InvalidTransition {
                from: state,
                operation,
            });
        }
        Ok(())
    }

    fn receiving_loop(
        core: &ComponentCore,
        transport: &Transport,
        codec: &FrameCodec,
        slot: &InputSlot,
        watermark: &AtomicU64,
    ) {
        let mut gaps = SequenceGapDetector::new();
        while core.should_run() {
            let Some(buf) = transport.receive_bytes() else {
                continue;
            };

            match FrameInfo::parse(&buf) {
                Ok(info) if info.is_eos => {
                    slot.eos.store(true, Ordering::SeqCst);
                    continue;
                }
                Ok(_) => {}
                Err(_) => {
                    core.metrics.add_bad_frame();
                    continue;
                }
            }

            match codec.decode(&buf) {
                Ok((batch, sequence)) => {
                    if gaps.check(sequence) == SeqCheck::Gap {
                        core.metrics.add_gap();
                    }
                    core.metrics.add_bytes(buf.len() as u64);

                    let flushed = f64::from_bits(watermark.load(Ordering::SeqCst));
                    let mut late = 0u64;
                    let mut heap = slot.heap.lock();
                    for record in batch.into_records() {
                        let ts = record.time_stamp_ns();
                        if ts < flushed {
                            late += 1;
                            continue;
                        }
                        heap.push(Reverse(TimedRecord { ts, record }));
                    }
                    drop(heap);
                    if late > 0 {
                        core.metrics.add_late_dropped(late);
                        log::warn!(
                            "[{}] dropped {late} late records below the sort window",
                            core.component_id()
                        );
                    }
                }
                Err(e) => {
                    core.metrics.add_bad_frame();
                    log::debug!("[{}] rejected frame: {e}", core.component_id());
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn merging_loop(
        core: &ComponentCore,
        output: &Transport,
        codec: &FrameCodec,
        slots: &[Arc<InputSlot>],
        watermark: &AtomicU64,
        window_ns: u64,
        format: FormatVersion,
        eos_forwarded: &AtomicBool,
    ) {
        loop {
            let all_eos = slots.iter().all(|s| s.eos.load(Ordering::SeqCst));

            if !core.running.load(Ordering::SeqCst) && !all_eos {
                // Emergency stop: discard whatever is buffered.
                return;
            }

            // The mark can only advance to min over inputs of the oldest
            // pending timestamp; an input with nothing buffered and no EOS
            // blocks any flush.
            let mut min_head = f64::INFINITY;
            let mut stalled = false;
            for slot in slots {
                let heap = slot.heap.lock();
                match heap.peek() {
                    Some(Reverse(rec)) => min_head = min_head.min(rec.ts),
                    None => {
                        if !slot.eos.load(Ordering::SeqCst) {
                            stalled = true;
                        }
                    }
                }
            }

            if all_eos {
                // Final flush: everything left, in timestamp order.
                Self::flush_below(core, output, codec, slots, f64::INFINITY, format);
                watermark.store(f64::INFINITY.to_bits(), Ordering::SeqCst);
                if output.send_bytes(codec.encode_eos(format)) {
                    eos_forwarded.store(true, Ordering::SeqCst);
                    log::info!("[{}] forwarded EOS downstream", core.component_id());
                }
                return;
            }

            if stalled || min_head == f64::INFINITY {
                std::thread::sleep(MERGE_TICK);
                continue;
            }

            let mark = min_head - window_ns as f64;
            if mark > f64::from_bits(watermark.load(Ordering::SeqCst)) {
                Self::flush_below(core, output, codec, slots, mark, format);
                watermark.store(mark.to_bits(), Ordering::SeqCst);
            }
            std::thread::sleep(MERGE_TICK);
        }
    }

    /// Pop every record older than `mark` and emit it in timestamp order.
    fn flush_below(
        core: &ComponentCore,
        output: &Transport,
        codec: &FrameCodec,
        slots: &[Arc<InputSlot>],
        mark: f64,
        format: FormatVersion,
    ) {
        let mut pending: Vec<TimedRecord> = Vec::new();
        for slot in slots {
            let mut heap = slot.heap.lock();
            while matches!(heap.peek(), Some(Reverse(rec)) if rec.ts < mark) {
                if let Some(Reverse(rec)) = heap.pop() {
                    pending.push(rec);
                }
            }
        }
        if pending.is_empty() {
            return;
        }
        pending.sort_by(|a, b| a.ts.total_cmp(&b.ts));

        for chunk in pending.chunks(FLUSH_BATCH) {
            let frame = encode_records(codec, format, chunk);
            let count = chunk.len() as u64;
            let bytes = frame.len() as u64;
            if output.send_bytes(frame) {
                core.metrics.add_events(count);
                core.metrics.add_bytes(bytes);
            } else {
                log::warn!("[{}] downstream send would block", core.component_id());
            }
        }
    }
}

/// Re-encode sorted records in the configured format version.
fn encode_records(codec: &FrameCodec, format: FormatVersion, chunk: &[TimedRecord]) -> Vec<u8> {
    match format {
        FormatVersion::Minimal => {
            let records: Vec<MinimalEventRecord> = chunk
                .iter()
                .map(|t| match &t.record {
                    Record::Minimal(r) => *r,
                    Record::Full(r) => MinimalEventRecord::from_full(r),
                })
                .collect();
            codec.encode_minimal_auto(&records)
        }
        FormatVersion::Full => {
            let records: Vec<EventRecord> = chunk
                .iter()
                .map(|t| match &t.record {
                    Record::Full(r) => r.clone(),
                    Record::Minimal(r) => EventRecord::from_minimal(r),
                })
                .collect();
            codec.encode_auto(&records)
        }
    }
}

impl Component for TimeSortMerger {
    fn component_id(&self) -> String {
        self.core.component_id()
    }

    fn state(&self) -> ComponentState {
        self.core.state()
    }

    fn configure(&self, config: ComponentConfig) -> Result<(), ComponentError> {
        self.require_state(ComponentState::Idle, "Configure")?;
        if let Err(e) = config.validate() {
            self.core.fault(e.to_string());
            return Err(e.into());
        }
        if config.input_addresses.is_empty() {
            self.core.fault("merger requires at least one input address");
            return Err(ComponentError::Config(crate::config::ConfigError::Invalid(
                "merger requires at least one input address".into(),
            )));
        }
        if config.output_address.is_none() {
            self.core.fault("merger requires output_address");
            return Err(ComponentError::Config(crate::config::ConfigError::Invalid(
                "merger requires output_address".into(),
            )));
        }

        self.core.set_component_id(&config.component_id);
        *self.config.lock() = Some(config);
        self.core.lifecycle.transition(ComponentState::Configured);
        Ok(())
    }

    fn arm(&self) -> Result<(), ComponentError> {
        self.require_state(ComponentState::Configured, "Arm")?;
        let config = self.config.lock().clone().ok_or(ComponentError::NotConfigured)?;
        let output_address = config
            .output_address
            .clone()
            .ok_or(ComponentError::NotConfigured)?;

        let mut output = Transport::new();
        output.configure(TransportConfig {
            status_address: config.status_address.clone().unwrap_or_default(),
            receive_timeout: config.receive_timeout(),
            ..TransportConfig::data_only(output_address, config.output_pattern)
        })?;
        if let Err(e) = output.connect() {
            self.core.fault(format!("arm failed: {e}"));
            return Err(e.into());
        }

        let mut inputs = Vec::with_capacity(config.input_addresses.len());
        for address in &config.input_addresses {
            let mut transport = Transport::new();
            transport.configure(TransportConfig {
                receive_timeout: config.receive_timeout(),
                ..TransportConfig::data_only(address.clone(), config.input_pattern)
            })?;
            if let Err(e) = transport.connect() {
                self.core.fault(format!("arm failed on input {address}: {e}"));
                return Err(e.into());
            }
            inputs.push(Arc::new(transport));
        }

        let mut codec = FrameCodec::new();
        codec.enable_compression(config.compression);
        codec.enable_checksum(config.checksum);

        let slot_count = config.input_addresses.len();
        *self.output.lock() = Some(Arc::new(output));
        *self.inputs.lock() = inputs;
        *self.codec.lock() = Some(Arc::new(codec));
        *self.slots.lock() = (0..slot_count).map(|_| Arc::new(InputSlot::new())).collect();

        self.core.lifecycle.transition(ComponentState::Armed);
        Ok(())
    }

    fn start(&self, run_number: u32) -> Result<(), ComponentError> {
        self.require_state(ComponentState::Armed, "Start")?;
        let config = self.config.lock().clone().ok_or(ComponentError::NotConfigured)?;
        let output = self.output.lock().clone().ok_or(ComponentError::NotConfigured)?;
        let codec = self.codec.lock().clone().ok_or(ComponentError::NotConfigured)?;
        let inputs = self.inputs.lock().clone();
        let slots = self.slots.lock().clone();

        self.core.set_run_number(run_number);
        self.core.metrics.reset();
        codec.reset_sequence();
        self.watermark
            .store(f64::NEG_INFINITY.to_bits(), Ordering::SeqCst);
        self.eos_forwarded.store(false, Ordering::SeqCst);
        self.core.running.store(true, Ordering::SeqCst);

        let mut threads = self.threads.lock();

        for (input, slot) in inputs.into_iter().zip(slots.iter().cloned()) {
            let core = Arc::clone(&self.core);
            let recv_codec = Arc::clone(&codec);
            let recv_watermark = Arc::clone(&self.watermark);
            threads.push(std::thread::spawn(move || {
                TimeSortMerger::receiving_loop(&core, &input, &recv_codec, &slot, &recv_watermark);
            }));
        }

        let merge_core = Arc::clone(&self.core);
        let merge_output = Arc::clone(&output);
        let merge_codec = Arc::clone(&codec);
        let merge_slots = slots;
        let merge_watermark = Arc::clone(&self.watermark);
        let merge_eos = Arc::clone(&self.eos_forwarded);
        let window_ns = config.sort_window_ns;
        let format = config.format;
        threads.push(std::thread::spawn(move || {
            TimeSortMerger::merging_loop(
                &merge_core,
                &merge_output,
                &merge_codec,
                &merge_slots,
                &merge_watermark,
                window_ns,
                format,
                &merge_eos,
            );
        }));

        let hb_core = Arc::clone(&self.core);
        let hb_transport = Arc::clone(&output);
        threads.push(std::thread::spawn(move || {
            heartbeat_loop(&hb_core, &hb_transport);
        }));

        drop(threads);
        self.core.lifecycle.transition(ComponentState::Running);
        log::info!(
            "[{}] running (run {run_number}, window {window_ns} ns)",
            self.core.component_id()
        );
        Ok(())
    }

    fn stop(&self, graceful: bool) -> Result<(), ComponentError> {
        self.require_state(ComponentState::Running, "Stop")?;

        if graceful {
            let deadline = Instant::now() + EOS_FORWARD_TIMEOUT;
            while !self.has_forwarded_eos() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if !self.has_forwarded_eos() {
                log::warn!(
                    "[{}] graceful stop before all inputs reached EOS",
                    self.core.component_id()
                );
            }
        }

        self.core.running.store(false, Ordering::SeqCst);
        join_workers(&self.threads);

        *self.inputs.lock() = Vec::new();
        *self.output.lock() = None;
        *self.codec.lock() = None;
        *self.slots.lock() = Vec::new();
        self.core.set_run_number(0);

        self.core.lifecycle.transition(ComponentState::Configured);
        log::info!("[{}] stopped", self.core.component_id());
        Ok(())
    }

    fn reset(&self) {
        self.core.running.store(false, Ordering::SeqCst);
        join_workers(&self.threads);
        *self.inputs.lock() = Vec::new();
        *self.output.lock() = None;
        *self.codec.lock() = None;
        *self.slots.lock() = Vec::new();
        *self.config.lock() = None;
        self.eos_forwarded.store(false, Ordering::SeqCst);
        self.core.set_run_number(0);
        self.core.clear_error();
        self.core.lifecycle.reset();
    }

    fn status(&self) -> ComponentStatus {
        self.core.status()
    }

    fn active_config(&self) -> Option<ComponentConfig> {
        self.config.lock().clone()
    }

    fn force_error(&self, message: &str) {
        self.core.fault(message);
    }
}
