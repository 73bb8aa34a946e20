// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Source component: hardware (or mock) events onto the data plane.
//!
//! Zero inputs, one output. Two worker threads: the acquisition thread
//! polls the [`HardwareSource`] into a bounded queue, the sending thread
//! encodes batches with the auto-sequencing codec and moves them into the
//! transport. A graceful stop drains the queue and emits one EOS frame.

use super::{join_workers, Component, ComponentCore, ComponentError};
use crate::codec::{FormatVersion, FrameCodec};
use crate::config::ComponentConfig;
use crate::control::ComponentStatus;
use crate::lifecycle::ComponentState;
use crate::record::{EventRecord, MinimalEventRecord};
use crate::runtime::{BoundedQueue, HardwareSource, MockHardwareSource, PushError};
use crate::transport::{Transport, TransportConfig};
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Largest batch pulled from the hardware in one poll.
const POLL_BATCH_MAX: usize = 4096;

/// Worker poll interval; bounds stop latency.
const WORKER_TICK: Duration = Duration::from_millis(100);

/// Event producer at the head of a pipeline.
pub struct Source {
    core: Arc<ComponentCore>,
    config: Mutex<Option<ComponentConfig>>,
    transport: Mutex<Option<Arc<Transport>>>,
    codec: Mutex<Option<Arc<FrameCodec>>>,
    hardware: Arc<Mutex<Option<Box<dyn HardwareSource>>>>,
    queue: Mutex<Option<Arc<BoundedQueue<Vec<EventRecord>>>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Source {
    fn default() -> Self {
        Self::new()
    }
}

impl Source {
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Arc::new(ComponentCore::new("source")),
            config: Mutex::new(None),
            transport: Mutex::new(None),
            codec: Mutex::new(None),
            hardware: Arc::new(Mutex::new(None)),
            queue: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Install a hardware driver; without one, mock mode is required.
    pub fn set_hardware(&self, hardware: Box<dyn HardwareSource>) {
        *self.hardware.lock() = Some(hardware);
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

    fn acquisition_loop(
        core: &ComponentCore,
        hardware: &Mutex<Option<Box<dyn HardwareSource>>>,
        queue: &BoundedQueue<Vec<EventRecord>>,
    ) {
        while core.should_run() {
            let polled = {
                let mut guard = hardware.lock();
                match guard.as_mut() {
                    Some(hw) => hw.poll_batch(POLL_BATCH_MAX),
                    None => break,
                }
            };

            match polled {
                Ok(batch) if batch.is_empty() => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(batch) => {
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
                    core.fault(format!("hardware poll failed: {e}"));
                    return;
                }
            }
        }
    }

    fn sending_loop(
        core: &ComponentCore,
        transport: &Transport,
        codec: &FrameCodec,
        queue: &BoundedQueue<Vec<EventRecord>>,
        format: FormatVersion,
    ) {
        loop {
            match queue.pop_timeout(WORKER_TICK) {
                Some(records) => {
                    let count = records.len() as u64;
                    let frame = match format {
                        FormatVersion::Full => codec.encode_auto(&records),
                        FormatVersion::Minimal => {
                            let minimal: Vec<MinimalEventRecord> =
                                records.iter().map(MinimalEventRecord::from_full).collect();
                            codec.encode_minimal_auto(&minimal)
                        }
                    };
                    let bytes = frame.len() as u64;
                    if transport.send_bytes(frame) {
                        core.metrics.add_events(count);
                        core.metrics.add_bytes(bytes);
                    } else {
                        log::warn!(
                            "[{}] send would block, dropping batch of {count}",
                            core.component_id()
                        );
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

impl Component for Source {
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
        if config.output_address.is_none() {
            self.core.fault("source requires output_address");
            return Err(ComponentError::Config(crate::config::ConfigError::Invalid(
                "source requires output_address".into(),
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
        let output = config
            .output_address
            .clone()
            .ok_or(ComponentError::NotConfigured)?;

        let mut transport = Transport::new();
        let transport_config = TransportConfig {
            status_address: config.status_address.clone().unwrap_or_default(),
            receive_timeout: config.receive_timeout(),
            ..TransportConfig::data_only(output, config.output_pattern)
        };
        transport.configure(transport_config)?;
        if let Err(e) = transport.connect() {
            self.core.fault(format!("arm failed: {e}"));
            return Err(e.into());
        }

        let arm_result = {
            let mut hardware = self.hardware.lock();
            if hardware.is_none() {
                if config.mock_mode {
                    *hardware = Some(Box::new(MockHardwareSource::new(
                        config.mock_event_rate,
                        0,
                    )));
                } else {
                    drop(hardware);
                    self.core.fault("no hardware driver installed");
                    return Err(ComponentError::Hardware(
                        crate::runtime::HardwareError::NotFound,
                    ));
                }
            }
            match hardware.as_mut() {
                Some(hw) => hw.arm(),
                None => Ok(()),
            }
        };
        if let Err(e) = arm_result {
            self.core.fault(format!("hardware arm failed: {e}"));
            return Err(e.into());
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
        let config = self.config.lock().clone().ok_or(ComponentError::NotConfigured)?;
        let transport = self
            .transport
            .lock()
            .clone()
            .ok_or(ComponentError::NotConfigured)?;
        let codec = self.codec.lock().clone().ok_or(ComponentError::NotConfigured)?;
        let queue = self.queue.lock().clone().ok_or(ComponentError::NotConfigured)?;

        let trigger_result = match self.hardware.lock().as_mut() {
            Some(hw) => hw.trigger(),
            None => Ok(()),
        };
        if let Err(e) = trigger_result {
            self.core.fault(format!("hardware trigger failed: {e}"));
            return Err(e.into());
        }

        self.core.set_run_number(run_number);
        self.core.metrics.reset();
        codec.reset_sequence();
        queue.reopen();
        self.core.running.store(true, Ordering::SeqCst);

        let mut threads = self.threads.lock();

        let acq_core = Arc::clone(&self.core);
        let acq_hw = Arc::clone(&self.hardware);
        let acq_queue = Arc::clone(&queue);
        threads.push(std::thread::spawn(move || {
            Source::acquisition_loop(&acq_core, &acq_hw, &acq_queue);
        }));

        let send_core = Arc::clone(&self.core);
        let send_transport = Arc::clone(&transport);
        let send_codec = Arc::clone(&codec);
        let send_queue = Arc::clone(&queue);
        let format = config.format;
        threads.push(std::thread::spawn(move || {
            Source::sending_loop(&send_core, &send_transport, &send_codec, &send_queue, format);
        }));

        let hb_core = Arc::clone(&self.core);
        let hb_transport = Arc::clone(&transport);
        threads.push(std::thread::spawn(move || {
            heartbeat_loop(&hb_core, &hb_transport);
        }));

        drop(threads);
        self.core.lifecycle.transition(ComponentState::Running);
        log::info!(
            "[{}] running (run {run_number})",
            self.core.component_id()
        );
        Ok(())
    }

    fn stop(&self, graceful: bool) -> Result<(), ComponentError> {
        self.require_state(ComponentState::Running, "Stop")?;

        self.core.running.store(false, Ordering::SeqCst);
        if let Some(queue) = self.queue.lock().as_ref() {
            if !graceful {
                queue.clear();
            }
            queue.close();
        }
        join_workers(&self.threads);

        if graceful {
            let transport = self.transport.lock().clone();
            let codec = self.codec.lock().clone();
            let format = self
                .config
                .lock()
                .as_ref()
                .map(|c| c.format)
                .unwrap_or_default();
            if let (Some(transport), Some(codec)) = (transport, codec) {
                if !transport.send_bytes(codec.encode_eos(format)) {
                    log::warn!("[{}] failed to send EOS", self.core.component_id());
                }
                // Leave the frame a moment to drain before sockets close.
                std::thread::sleep(Duration::from_millis(50));
            }
        }

        if let Some(hw) = self.hardware.lock().as_mut() {
            hw.disarm();
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
        if let Some(hw) = self.hardware.lock().as_mut() {
            hw.disarm();
        }
        *self.transport.lock() = None;
        *self.codec.lock() = None;
        *self.queue.lock() = None;
        *self.config.lock() = None;
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

/// Shared heartbeat loop: tick the counter and publish status once per
/// second while the component runs.
pub(crate) fn heartbeat_loop(core: &ComponentCore, transport: &Transport) {
    let mut last = Instant::now();
    while core.should_run() {
        std::thread::sleep(Duration::from_millis(100));
        if last.elapsed() >= Duration::from_secs(1) {
            core.metrics.tick_heartbeat();
            let _ = transport.send_status(&core.status());
            last = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FrameInfo;
    use crate::transport::SocketPattern;

    fn mock_config(name: &str, output: &str) -> ComponentConfig {
        let mut config = ComponentConfig::new(name);
        config.output_address = Some(output.to_string());
        config.output_pattern = SocketPattern::Push;
        config.mock_mode = true;
        config.mock_event_rate = 50_000;
        config.compression = false;
        config
    }

    #[test]
    fn lifecycle_rejects_out_of_order_calls() {
        let source = Source::new();
        assert!(source.arm().is_err());
        assert!(source.start(1).is_err());
        assert!(source.stop(true).is_err());
        assert_eq!(source.state(), ComponentState::Idle);
    }

    #[test]
    fn configure_without_output_faults() {
        let source = Source::new();
        let config = ComponentConfig::new("source_0");
        assert!(source.configure(config).is_err());
        assert_eq!(source.state(), ComponentState::Error);
        assert!(!source.status().error_message.is_empty());

        source.reset();
        assert_eq!(source.state(), ComponentState::Idle);
    }

    #[test]
    fn produces_frames_and_eos_on_graceful_stop() {
        let source = Source::new();
        source
            .configure(mock_config("source_eos", "inproc://source-eos"))
            .expect("configure");
        source.arm().expect("arm");

        let mut receiver = Transport::new();
        receiver
            .configure(TransportConfig {
                receive_timeout: Duration::from_millis(300),
                ..TransportConfig::data_only("inproc://source-eos", SocketPattern::Pull)
            })
            .expect("configure receiver");
        receiver.connect().expect("connect receiver");

        source.start(42).expect("start");
        assert_eq!(source.state(), ComponentState::Running);
        assert_eq!(source.status().run_number, 42);

        std::thread::sleep(Duration::from_millis(150));
        source.stop(true).expect("stop");
        assert_eq!(source.state(), ComponentState::Configured);

        let mut saw_data = false;
        let mut saw_eos = false;
        while let Some(frame) = receiver.receive_bytes() {
            let info = FrameInfo::parse(&frame).expect("frame");
            if info.is_eos {
                saw_eos = true;
                break;
            }
            saw_data = true;
        }
        assert!(saw_data, "no data frames before EOS");
        assert!(saw_eos, "graceful stop must emit EOS");
    }

    #[test]
    fn abrupt_stop_emits_no_eos() {
        let source = Source::new();
        source
            .configure(mock_config("source_abort", "inproc://source-abort"))
            .expect("configure");
        source.arm().expect("arm");

        let mut receiver = Transport::new();
        receiver
            .configure(TransportConfig {
                receive_timeout: Duration::from_millis(200),
                ..TransportConfig::data_only("inproc://source-abort", SocketPattern::Pull)
            })
            .expect("configure receiver");
        receiver.connect().expect("connect receiver");

        source.start(1).expect("start");
        std::thread::sleep(Duration::from_millis(100));
        source.stop(false).expect("stop");

        while let Some(frame) = receiver.receive_bytes() {
            let info = FrameInfo::parse(&frame).expect("frame");
            assert!(!info.is_eos, "emergency stop must not emit EOS");
        }
    }

    #[test]
    fn restart_resets_sequence_numbers() {
        let source = Source::new();
        source
            .configure(mock_config("source_restart", "inproc://source-restart"))
            .expect("configure");

        for run in 1..=2 {
            source.arm().expect("arm");
            let mut receiver = Transport::new();
            receiver
                .configure(TransportConfig {
                    receive_timeout: Duration::from_millis(300),
                    ..TransportConfig::data_only("inproc://source-restart", SocketPattern::Pull)
                })
                .expect("configure receiver");
            receiver.connect().expect("connect receiver");

            source.start(run).expect("start");
            let frame = receiver.receive_bytes().expect("first frame");
            let info = FrameInfo::parse(&frame).expect("frame");
            assert_eq!(info.sequence_number, 0, "run {run} must restart at 0");
            source.stop(false).expect("stop");
        }
    }

    #[test]
    fn force_error_requires_reset() {
        let source = Source::new();
        source
            .configure(mock_config("source_err", "inproc://source-err"))
            .expect("configure");
        source.force_error("injected");
        assert_eq!(source.state(), ComponentState::Error);
        assert_eq!(source.status().error_message, "injected");
        assert!(source.arm().is_err());

        source.reset();
        assert_eq!(source.state(), ComponentState::Idle);
        assert!(source.status().error_message.is_empty());
    }
}
