// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Simple merger: N inputs to one output, FIFO by arrival.
//!
//! Frames are forwarded raw; only the header's sequence field is restamped
//! with the merger's own counter so the downstream gap detector sees one
//! monotonic stream (the payload checksum does not cover the header, so
//! the splice is safe without a re-encode).
//!
//! EOS fan-in: each input's sentinel is swallowed until the last one
//! arrives, which is queued and forwarded downstream exactly once.

use super::source::heartbeat_loop;
use super::{join_workers, Component, ComponentCore, ComponentError};
use crate::codec::FrameInfo;
use crate::config::ComponentConfig;
use crate::control::ComponentStatus;
use crate::lifecycle::ComponentState;
use crate::runtime::{BoundedQueue, EosTracker, PushError};
use crate::seqgap::{SeqCheck, SequenceGapDetector};
use crate::transport::{Transport, TransportConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const WORKER_TICK: Duration = Duration::from_millis(100);

/// Budget for the downstream EOS to go out during a graceful stop.
const EOS_FORWARD_TIMEOUT: Duration = Duration::from_secs(2);

/// N-input FIFO forwarder.
pub struct SimpleMerger {
    core: Arc<ComponentCore>,
    config: Mutex<Option<ComponentConfig>>,
    inputs: Mutex<Vec<Arc<Transport>>>,
    output: Mutex<Option<Arc<Transport>>>,
    queue: Mutex<Option<Arc<BoundedQueue<Vec<u8>>>>>,
    eos_tracker: Mutex<Option<Arc<EosTracker>>>,
    eos_forwarded: Arc<AtomicBool>,
    sequence: Arc<AtomicU64>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for SimpleMerger {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleMerger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Arc::new(ComponentCore::new("merger")),
            config: Mutex::new(None),
            inputs: Mutex::new(Vec::new()),
            output: Mutex::new(None),
            queue: Mutex::new(None),
            eos_tracker: Mutex::new(None),
            eos_forwarded: Arc::new(AtomicBool::new(false)),
            sequence: Arc::new(AtomicU64::new(0)),
            threads: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn input_count(&self) -> usize {
        self.config
            .lock()
            .as_ref()
            .map_or(0, |c| c.input_addresses.len())
    }

    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.queue.lock().as_ref().map_or(0, |q| q.len())
    }

    /// Whether the downstream EOS went out this run.
    #[must_use]
    pub fn has_forwarded_eos(&self) -> bool {
        self.eos_forwarded.load(Ordering::SeqCst)
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
        input_index: usize,
        transport: &Transport,
        queue: &BoundedQueue<Vec<u8>>,
        tracker: &EosTracker,
    ) {
        let mut gaps = SequenceGapDetector::new();
        while core.should_run() {
            let Some(buf) = transport.receive_bytes() else {
                continue;
            };

            let info = match FrameInfo::parse(&buf) {
                Ok(info) => info,
                Err(_) => {
                    core.metrics.add_bad_frame();
                    continue;
                }
            };

            if info.is_eos {
                log::debug!("[{}] EOS from input {input_index}", core.component_id());
                if !tracker.record() {
                    continue;
                }
                // Last input done: forward this sentinel downstream.
            } else if gaps.check(info.sequence_number) == SeqCheck::Gap {
                core.metrics.add_gap();
            }

            let mut item = buf;
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
    }

    fn sending_loop(
        core: &ComponentCore,
        output: &Transport,
        queue: &BoundedQueue<Vec<u8>>,
        sequence: &AtomicU64,
        eos_forwarded: &AtomicBool,
    ) {
        loop {
            match queue.pop_timeout(WORKER_TICK) {
                Some(mut frame) => {
                    let is_eos = FrameInfo::parse(&frame).map(|i| i.is_eos).unwrap_or(false);
                    // Splice in this merger's own monotonic sequence.
                    let seq = if is_eos {
                        sequence.load(Ordering::SeqCst)
                    } else {
                        sequence.fetch_add(1, Ordering::SeqCst)
                    };
                    frame[8..16].copy_from_slice(&seq.to_le_bytes());

                    let events = FrameInfo::parse(&frame)
                        .map(|i| u64::from(i.event_count))
                        .unwrap_or(0);
                    let bytes = frame.len() as u64;
                    if output.send_bytes(frame) {
                        core.metrics.add_events(events);
                        core.metrics.add_bytes(bytes);
                        if is_eos {
                            eos_forwarded.store(true, Ordering::SeqCst);
                            log::info!("[{}] forwarded EOS downstream", core.component_id());
                        }
                    } else {
                        log::warn!("[{}] downstream send would block", core.component_id());
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

impl Component for SimpleMerger {
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

        // Bind the output before connecting the inputs.
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

        *self.output.lock() = Some(Arc::new(output));
        *self.inputs.lock() = inputs;
        *self.queue.lock() = Some(Arc::new(BoundedQueue::new(config.queue_capacity)));
        *self.eos_tracker.lock() = Some(Arc::new(EosTracker::new(config.input_addresses.len())));

        self.core.lifecycle.transition(ComponentState::Armed);
        Ok(())
    }

    fn start(&self, run_number: u32) -> Result<(), ComponentError> {
        self.require_state(ComponentState::Armed, "Start")?;
        let output = self.output.lock().clone().ok_or(ComponentError::NotConfigured)?;
        let queue = self.queue.lock().clone().ok_or(ComponentError::NotConfigured)?;
        let tracker = self
            .eos_tracker
            .lock()
            .clone()
            .ok_or(ComponentError::NotConfigured)?;
        let inputs = self.inputs.lock().clone();

        self.core.set_run_number(run_number);
        self.core.metrics.reset();
        self.sequence.store(0, Ordering::SeqCst);
        self.eos_forwarded.store(false, Ordering::SeqCst);
        tracker.reset();
        queue.reopen();
        self.core.running.store(true, Ordering::SeqCst);

        let mut threads = self.threads.lock();

        for (index, input) in inputs.into_iter().enumerate() {
            let core = Arc::clone(&self.core);
            let recv_queue = Arc::clone(&queue);
            let recv_tracker = Arc::clone(&tracker);
            threads.push(std::thread::spawn(move || {
                SimpleMerger::receiving_loop(&core, index, &input, &recv_queue, &recv_tracker);
            }));
        }

        let send_core = Arc::clone(&self.core);
        let send_output = Arc::clone(&output);
        let send_queue = Arc::clone(&queue);
        let send_sequence = Arc::clone(&self.sequence);
        let send_eos = Arc::clone(&self.eos_forwarded);
        threads.push(std::thread::spawn(move || {
            SimpleMerger::sending_loop(&send_core, &send_output, &send_queue, &send_sequence, &send_eos);
        }));

        let hb_core = Arc::clone(&self.core);
        let hb_transport = Arc::clone(&output);
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
        if let Some(queue) = self.queue.lock().as_ref() {
            if !graceful {
                queue.clear();
            }
            queue.close();
        }
        join_workers(&self.threads);

        *self.inputs.lock() = Vec::new();
        *self.output.lock() = None;
        *self.queue.lock() = None;
        *self.eos_tracker.lock() = None;
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
        *self.inputs.lock() = Vec::new();
        *self.output.lock() = None;
        *self.queue.lock() = None;
        *self.eos_tracker.lock() = None;
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
