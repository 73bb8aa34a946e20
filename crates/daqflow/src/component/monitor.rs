// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Online monitor: decoded records into a histogram sink.
//!
//! One input, zero outputs. Aggregates reset on each run start; the sink's
//! `publish` hook fires about once per second. Rendering and HTTP serving
//! live behind the [`HistogramSink`] trait, outside the core.

use super::source::heartbeat_loop;
use super::{join_workers, Component, ComponentCore, ComponentError};
use crate::codec::{FrameCodec, FrameInfo};
use crate::config::ComponentConfig;
use crate::control::ComponentStatus;
use crate::lifecycle::ComponentState;
use crate::runtime::{EnergyHistogram, HistogramSink};
use crate::seqgap::{SeqCheck, SequenceGapDetector};
use crate::transport::{Transport, TransportConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Spectrum sink fed straight from the data plane.
pub struct Monitor {
    core: Arc<ComponentCore>,
    config: Mutex<Option<ComponentConfig>>,
    transport: Mutex<Option<Arc<Transport>>>,
    codec: Mutex<Option<Arc<FrameCodec>>>,
    sink: Arc<Mutex<Box<dyn HistogramSink>>>,
    received_eos: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    /// Monitor with the default per-channel energy histogram.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sink(Box::new(EnergyHistogram::new(16, 4096)))
    }

    #[must_use]
    pub fn with_sink(sink: Box<dyn HistogramSink>) -> Self {
        Self {
            core: Arc::new(ComponentCore::new("monitor")),
            config: Mutex::new(None),
            transport: Mutex::new(None),
            codec: Mutex::new(None),
            sink: Arc::new(Mutex::new(sink)),
            received_eos: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn has_received_eos(&self) -> bool {
        self.received_eos.load(Ordering::SeqCst)
    }

    /// Run a closure against the sink (test and aggregate access).
    pub fn with_sink_ref<R>(&self, f: impl FnOnce(&mut dyn HistogramSink) -> R) -> R {
        let mut sink = self.sink.lock();
        f(sink.as_mut())
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

    fn monitor_loop(
        core: &ComponentCore,
        transport: &Transport,
        codec: &FrameCodec,
        sink: &Mutex<Box<dyn HistogramSink>>,
        received_eos: &AtomicBool,
    ) {
        let mut gaps = SequenceGapDetector::new();
        let mut last_publish = Instant::now();

        while core.should_run() {
            if last_publish.elapsed() >= Duration::from_secs(1) {
                sink.lock().publish();
                last_publish = Instant::now();
            }

            let Some(buf) = transport.receive_bytes() else {
                continue;
            };

            match FrameInfo::parse(&buf) {
                Ok(info) if info.is_eos => {
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
                    }
                    core.metrics.add_bytes(buf.len() as u64);
                    let records = batch.into_records();
                    let count = records.len() as u64;
                    {
                        let mut sink = sink.lock();
                        for record in &records {
                            sink.consume(record);
                        }
                    }
                    core.metrics.add_events(count);
                }
                Err(e) => {
                    core.metrics.add_bad_frame();
                    log::debug!("[{}] rejected frame: {e}", core.component_id());
                }
            }
        }
    }
}

impl Component for Monitor {
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
            self.core.fault("monitor requires exactly one input address");
            return Err(ComponentError::Config(crate::config::ConfigError::Invalid(
                "monitor requires exactly one input address".into(),
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

        let mut codec = FrameCodec::new();
        codec.enable_compression(config.compression);
        codec.enable_checksum(config.checksum);

        *self.transport.lock() = Some(Arc::new(transport));
        *self.codec.lock() = Some(Arc::new(codec));

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

        self.core.set_run_number(run_number);
        self.core.metrics.reset();
        self.received_eos.store(false, Ordering::SeqCst);
        self.sink.lock().begin_run(run_number);
        self.core.running.store(true, Ordering::SeqCst);

        let mut threads = self.threads.lock();

        let core = Arc::clone(&self.core);
        let loop_transport = Arc::clone(&transport);
        let loop_codec = Arc::clone(&codec);
        let loop_sink = Arc::clone(&self.sink);
        let loop_eos = Arc::clone(&self.received_eos);
        threads.push(std::thread::spawn(move || {
            Monitor::monitor_loop(&core, &loop_transport, &loop_codec, &loop_sink, &loop_eos);
        }));

        let hb_core = Arc::clone(&self.core);
        let hb_transport = Arc::clone(&transport);
        threads.push(std::thread::spawn(move || {
            heartbeat_loop(&hb_core, &hb_transport);
        }));

        drop(threads);
        self.core.lifecycle.transition(ComponentState::Running);
        Ok(())
    }

    fn stop(&self, _graceful: bool) -> Result<(), ComponentError> {
        self.require_state(ComponentState::Running, "Stop")?;

        self.core.running.store(false, Ordering::SeqCst);
        join_workers(&self.threads);
        self.sink.lock().publish();

        *self.transport.lock() = None;
        *self.codec.lock() = None;
        self.core.set_run_number(0);

        self.core.lifecycle.transition(ComponentState::Configured);
        Ok(())
    }

    fn reset(&self) {
        self.core.running.store(false, Ordering::SeqCst);
        join_workers(&self.threads);
        *self.transport.lock() = None;
        *self.codec.lock() = None;
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
    use crate::record::MinimalEventRecord;
    use crate::transport::SocketPattern;

    #[test]
    fn histogram_fills_from_stream_and_resets_per_run() {
        let mut sender = Transport::new();
        sender
            .configure(TransportConfig::data_only(
                "inproc://monitor-data",
                SocketPattern::Push,
            ))
            .expect("configure sender");
        sender.connect().expect("connect sender");

        let monitor = Monitor::new();
        let mut config = ComponentConfig::new("monitor_0");
        config.input_addresses = vec!["inproc://monitor-data".into()];
        config.input_pattern = SocketPattern::Pull;
        config.compression = false;
        monitor.configure(config).expect("configure");
        monitor.arm().expect("arm");
        monitor.start(1).expect("start");

        let mut codec = FrameCodec::new();
        codec.enable_compression(false);
        let records: Vec<MinimalEventRecord> = (0..30)
            .map(|i| MinimalEventRecord::new(1, 2, f64::from(i), 500, 250, 0))
            .collect();
        assert!(sender.send_bytes(codec.encode_minimal_auto(&records)));

        let deadline = Instant::now() + Duration::from_secs(2);
        while monitor.status().events_processed < 30 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(monitor.status().events_processed, 30);
        monitor.stop(true).expect("stop");

        // A new run must reset the aggregates.
        monitor.arm().expect("re-arm");
        monitor.start(2).expect("restart");
        assert_eq!(monitor.status().events_processed, 0);
        monitor.stop(false).expect("stop again");
    }
}
