// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Writer component: decoded records onto disk, one file per run.
//!
//! One input, zero outputs. The receiving thread decodes frames, runs the
//! sequence-gap detector and queues batches; the writing thread appends
//! them through the [`FilePersister`]. A graceful stop waits (bounded) for
//! the EOS sentinel before closing the run file.

use super::source::heartbeat_loop;
use super::{join_workers, Component, ComponentCore, ComponentError};
use crate::codec::{DecodedBatch, FrameCodec, FrameInfo};
use crate::config::ComponentConfig;
use crate::control::ComponentStatus;
use crate::lifecycle::ComponentState;
use crate::runtime::{BoundedQueue, FilePersister, PushError, RawFilePersister};
use crate::seqgap::{SeqCheck, SequenceGapDetector};
use crate::transport::{Transport, TransportConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const WORKER_TICK: Duration = Duration::from_millis(100);

/// Budget for EOS to arrive during a graceful stop.
const EOS_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// File-writing sink at the tail of a pipeline.
pub struct Writer {
    core: Arc<ComponentCore>,
    config: Mutex<Option<ComponentConfig>>,
    transport: Mutex<Option<Arc<Transport>>>,
    codec: Mutex<Option<Arc<FrameCodec>>>,
    persister: Arc<Mutex<Option<Box<dyn FilePersister>>>>,
    queue: Mutex<Option<Arc<BoundedQueue<DecodedBatch>>>>,
    received_eos: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Arc::new(ComponentCore::new("writer")),
            config: Mutex::new(None),
            transport: Mutex::new(None),
            codec: Mutex::new(None),
            persister: Arc::new(Mutex::new(None)),
            queue: Mutex::new(None),
            received_eos: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Replace the persistence backend (defaults to [`RawFilePersister`]).
    pub fn set_persister(&self, persister: Box<dyn FilePersister>) {
        *self.persister.lock() = Some(persister);
    }

    /// Whether the EOS sentinel arrived during the current run.
    #[must_use]
    pub fn has_received_eos(&self) -> bool {
        self.received_eos.load(Ordering::SeqCst)
    }

    pub fn reset_eos_flag(&self) {
        self.received_eos.store(false, Ordering::SeqCst);
    }

    /// Path of the currently open run file.
    #[must_use]
    pub fn current_file(&self) -> Option<std::path::PathBuf> {
        self.persister
            .lock()
            .as_ref()
            .and_then(|p| p.current_path().map(std::path::Path::to_path_buf))
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
        queue: &BoundedQueue<DecodedBatch>,
        received_eos: &AtomicBool,
    ) {
        let mut gaps = SequenceGapDetector::new();
        while core.should_run() {
            let Some(buf) = transport.receive_bytes() else {
                continue;
            };

            match FrameInfo::parse(&buf) {
                Ok(info) if info.is_eos => {
                    log::info!("[{}] EOS received", core.component_id());
                    received_eos.store(true, Ordering::SeqCst);
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
                        if let Some(gap) = gaps.last_gap() {
                            log::warn!(
                                "[{}] sequence gap: expected {}, got {}, dropped {}",
                                core.component_id(),
                                gap.expected,
                                gap.received,
                                gap.dropped_count
                            );
                        }
                    }
                    core.metrics.add_bytes(buf.len() as u64);

                    let mut item = batch;
                    loop {
                        match queue.push(item, WORKER_TICK) {
                            Ok(()) => break,
                            Err(PushError::Full(back)) => {
                                if !core.running.load(Ordering::SeqCst) {
                                    break;
                                }
                                item = back;
                            }
                            Err(PushError::Closed(_)) => return,
                        }
                    }
                }
                Err(e) => {
                    core.metrics.add_bad_frame();
                    log::debug!("[{}] rejected frame: {e}", core.component_id());
                }
            }
        }
    }

    fn writing_loop(
        core: &ComponentCore,
        persister: &Mutex<Option<Box<dyn FilePersister>>>,
        queue: &BoundedQueue<DecodedBatch>,
    ) {
        loop {
            match queue.pop_timeout(WORKER_TICK) {
                Some(batch) => {
                    let count = batch.len() as u64;
                    let result = match persister.lock().as_mut() {
                        Some(p) => p.append(&batch),
                        None => break,
                    };
                    match result {
                        Ok(_) => core.metrics.add_events(count),
                        Err(e) => {
                            core.fault(format!("file append failed: {e}"));
                            return;
                        }
                    }
                    core.metrics
                        .set_queue_gauge(queue.len() as u32, queue.capacity() as u32);
                }
                None => {
                    if queue.is_closed() && queue.is_empty() {
                        return;
                    }
                }
            }
        }
    }
}

impl Component for Writer {
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
        if config.input_addresses.len() != 1 {
            self.core.fault("writer requires exactly one input address");
            return Err(ComponentError::Config(crate::config::ConfigError::Invalid(
                "writer requires exactly one input address".into(),
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

        let mut transport = Transport::new();
        let transport_config = TransportConfig {
            status_address: config.status_address.clone().unwrap_or_default(),
            receive_timeout: config.receive_timeout(),
            ..TransportConfig::data_only(config.input_addresses[0].clone(), config.input_pattern)
        };
        transport.configure(transport_config)?;
        if let Err(e) = transport.connect() {
            self.core.fault(format!("arm failed: {e}"));
            return Err(e.into());
        }

        {
            let mut persister = self.persister.lock();
            if persister.is_none() {
                let dir = config.output_dir.clone().unwrap_or_else(|| ".".into());
                *persister = Some(Box::new(RawFilePersister::new(
                    dir,
                    config.file_prefix.clone(),
                    config.file_extension.clone(),
                )));
            }
        }

        let mut codec = FrameCodec::new();
        codec.enable_compression(config.compression);
        codec.enable_checksum(config.checksum);

        *self.transport.lock() = Some(Arc::new(transport));
        *self.codec.lock() = Some(Arc::new(codec));
        *self.queue.lock() = Some(Arc::new(BoundedQueue::new(config.queue_capacity)));

        self.core.lifecycle.transition(ComponentState::Armed);
        Ok(())
    }

    fn start(&self, run_number: u32) -> Result<(), ComponentError> {
        self.require_state(ComponentState::Armed, "Start")?;
        let transport = self
            .transport
            .lock()
            .clone()
            .ok_or(ComponentError::NotConfigured)?;
        let codec = self.codec.lock().clone().ok_or(ComponentError::NotConfigured)?;
        let queue = self.queue.lock().clone().ok_or(ComponentError::NotConfigured)?;

        if let Err(e) = match self.persister.lock().as_mut() {
            Some(p) => p.open_run(run_number),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "no persister",
            )),
        } {
            self.core.fault(format!("open run file failed: {e}"));
            return Err(e.into());
        }

        self.core.set_run_number(run_number);
        self.core.metrics.reset();
        self.received_eos.store(false, Ordering::SeqCst);
        queue.reopen();
        self.core.running.store(true, Ordering::SeqCst);

        let mut threads = self.threads.lock();

        let recv_core = Arc::clone(&self.core);
        let recv_transport = Arc::clone(&transport);
        let recv_codec = Arc::clone(&codec);
        let recv_queue = Arc::clone(&queue);
        let recv_eos = Arc::clone(&self.received_eos);
        threads.push(std::thread::spawn(move || {
            Writer::receiving_loop(&recv_core, &recv_transport, &recv_codec, &recv_queue, &recv_eos);
        }));

        let write_core = Arc::clone(&self.core);
        let write_persister = Arc::clone(&self.persister);
        let write_queue = Arc::clone(&queue);
        threads.push(std::thread::spawn(move || {
            Writer::writing_loop(&write_core, &write_persister, &write_queue);
        }));

        let hb_core = Arc::clone(&self.core);
        let hb_transport = Arc::clone(&transport);
        threads.push(std::thread::spawn(move || {
            heartbeat_loop(&hb_core, &hb_transport);
        }));

        drop(threads);
        self.core.lifecycle.transition(ComponentState::Running);
        log::info!("[{}] running (run {run_number})", self.core.component_id());
        Ok(())
    }

    fn stop(&self, graceful: bool) -> Result<(), ComponentError> {
        self.require_state(ComponentState::Running, "Stop")?;

        if graceful {
            // Keep receiving until the EOS sentinel lands or the budget runs out.
            let deadline = Instant::now() + EOS_WAIT_TIMEOUT;
            while !self.has_received_eos() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if !self.has_received_eos() {
                log::warn!(
                    "[{}] graceful stop without EOS after {:?}",
                    self.core.component_id(),
                    EOS_WAIT_TIMEOUT
                );
            }
        }

        self.core.running.store(false, Ordering::SeqCst);
        if let Some(queue) = self.queue.lock().as_ref() {
            if !graceful {
                queue.clear();
            }
            queue.close();
        }
        join_workers(&self.threads);

        if let Some(p) = self.persister.lock().as_mut() {
            if let Err(e) = p.close_run() {
                log::warn!("[{}] close run file failed: {e}", self.core.component_id());
            }
        }

        *self.transport.lock() = None;
        *self.codec.lock() = None;
        *self.queue.lock() = None;
        self.core.set_run_number(0);

        self.core.lifecycle.transition(ComponentState::Configured);
        log::info!("[{}] stopped", self.core.component_id());
        Ok(())
    }

    fn reset(&self) {
        self.core.running.store(false, Ordering::SeqCst);
        if let Some(queue) = self.queue.lock().as_ref() {
            queue.clear();
            queue.close();
        }
        join_workers(&self.threads);
        if let Some(p) = self.persister.lock().as_mut() {
            let _ = p.close_run();
        }
        *self.persister.lock() = None;
        *self.transport.lock() = None;
        *self.codec.lock() = None;
        *self.queue.lock() = None;
        *self.config.lock() = None;
        self.received_eos.store(false, Ordering::SeqCst);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SocketPattern;

    fn writer_config(name: &str, input: &str, dir: &std::path::Path) -> ComponentConfig {
        let mut config = ComponentConfig::new(name);
        config.input_addresses = vec![input.to_string()];
        config.input_pattern = SocketPattern::Pull;
        config.output_dir = Some(dir.to_string_lossy().into_owned());
        config.compression = false;
        config
    }

    #[test]
    fn configure_requires_one_input() {
        let writer = Writer::new();
        assert!(writer.configure(ComponentConfig::new("w")).is_err());
        assert_eq!(writer.state(), ComponentState::Error);
        writer.reset();

        let mut config = ComponentConfig::new("w");
        config.input_addresses = vec![
            "inproc://writer-a".into(),
            "inproc://writer-b".into(),
        ];
        assert!(writer.configure(config).is_err());
        assert_eq!(writer.state(), ComponentState::Error);
    }

    #[test]
    fn writes_received_records_to_run_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        // The writer's PULL connects, so a PUSH binder must exist first.
        let mut sender = Transport::new();
        sender
            .configure(TransportConfig::data_only(
                "inproc://writer-data",
                SocketPattern::Push,
            ))
            .expect("configure sender");
        sender.connect().expect("connect sender");

        let writer = Writer::new();
        writer
            .configure(writer_config("writer_0", "inproc://writer-data", dir.path()))
            .expect("configure");
        writer.arm().expect("arm");
        writer.start(7).expect("start");

        let mut codec = FrameCodec::new();
        codec.enable_compression(false);
        let records: Vec<crate::record::MinimalEventRecord> = (0..20)
            .map(|i| crate::record::MinimalEventRecord::new(0, i as u8, f64::from(i), 100, 50, 0))
            .collect();
        assert!(sender.send_bytes(codec.encode_minimal_auto(&records)));

        let deadline = Instant::now() + Duration::from_secs(2);
        while writer.status().events_processed < 20 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(writer.status().events_processed, 20);

        let path = writer.current_file().expect("file path");
        assert!(path.ends_with("run_000007.dat"));

        assert!(sender.send_bytes(codec.encode_eos(crate::codec::FormatVersion::Minimal)));
        let deadline = Instant::now() + Duration::from_secs(1);
        while !writer.has_received_eos() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(writer.has_received_eos());

        writer.stop(true).expect("stop");
        let data = std::fs::read(&path).expect("read run file");
        assert_eq!(data.len(), 20 * crate::record::MINIMAL_RECORD_SIZE);
    }

    #[test]
    fn bad_frames_counted_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sender = Transport::new();
        sender
            .configure(TransportConfig::data_only(
                "inproc://writer-bad",
                SocketPattern::Push,
            ))
            .expect("configure sender");
        sender.connect().expect("connect sender");

        let writer = Writer::new();
        writer
            .configure(writer_config("writer_bad", "inproc://writer-bad", dir.path()))
            .expect("configure");
        writer.arm().expect("arm");
        writer.start(1).expect("start");

        let mut codec = FrameCodec::new();
        codec.enable_compression(false);

        // Corrupt a checksummed frame beyond the header.
        let records = vec![crate::record::MinimalEventRecord::new(0, 0, 1.0, 1, 1, 0)];
        let mut bad = codec.encode_minimal_auto(&records);
        bad[80] ^= 0x01;
        assert!(sender.send_bytes(bad));

        let good = codec.encode_minimal_auto(&records);
        assert!(sender.send_bytes(good));

        let deadline = Instant::now() + Duration::from_secs(2);
        while writer.status().events_processed < 1 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        // Only the valid frame counts.
        assert_eq!(writer.status().events_processed, 1);
        assert_eq!(writer.state(), ComponentState::Running);
        writer.stop(false).expect("stop");
    }
}
