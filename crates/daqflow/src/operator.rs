// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Operator: drives a registered set of components through the lifecycle.
//!
//! Every `*_all_async` operation mints a job id, runs on a detached worker
//! thread and reports through the job table. Workers open a short-lived
//! REQ transport per component and aggregate the replies.
//!
//! Ordering: Configure and Start sweep components by ascending
//! `start_order`; Arm, Stop and Reset sweep descending. Sources carry the
//! highest order, so binders arm first (their sockets exist before any
//! consumer connects), producers start last and stop first (EOS flows
//! downstream before the sinks close).
//!
//! The two-phase start holds the Armed barrier: no component sees Start
//! until every component reported Armed.

use crate::config::{ComponentEntry, OperatorConfig};
use crate::control::{
    wall_clock_ms, Command, CommandResponse, CommandType, ComponentStatus, JobState, JobStatus,
};
use crate::lifecycle::{ComponentState, LifecycleCore};
use crate::transport::{SocketPattern, Transport, TransportConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The lifecycle operation a job performs.
#[derive(Debug, Clone, Copy)]
enum JobKind {
    Configure,
    Arm,
    Start(u32),
    Stop(bool),
    Reset,
}

impl JobKind {
    fn name(self) -> &'static str {
        match self {
            JobKind::Configure => "Configure",
            JobKind::Arm => "Arm",
            JobKind::Start(_) => "Start",
            JobKind::Stop(_) => "Stop",
            JobKind::Reset => "Reset",
        }
    }

    /// Whether the sweep keeps going after a per-component failure.
    ///
    /// A failing component must not keep the rest of the system from
    /// stopping or resetting; the other operations abort early.
    fn continues_on_failure(self) -> bool {
        matches!(self, JobKind::Stop(_) | JobKind::Reset)
    }

    /// Ascending `start_order` for Configure/Start, descending otherwise
    /// (binders arm first, producers stop first).
    fn descending(self) -> bool {
        matches!(self, JobKind::Arm | JobKind::Stop(_) | JobKind::Reset)
    }
}

/// Central controller of a pipeline deployment.
pub struct Operator {
    operator_id: Mutex<String>,
    lifecycle: LifecycleCore,
    components: Arc<Mutex<Vec<ComponentEntry>>>,
    last_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    jobs: Arc<Mutex<HashMap<String, JobStatus>>>,
    job_counter: AtomicU64,
    request_counter: Arc<AtomicU32>,
    command_timeout: Mutex<Duration>,
}

impl Default for Operator {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            operator_id: Mutex::new("operator".to_string()),
            lifecycle: LifecycleCore::new(),
            components: Arc::new(Mutex::new(Vec::new())),
            last_states: Arc::new(Mutex::new(HashMap::new())),
            jobs: Arc::new(Mutex::new(HashMap::new())),
            job_counter: AtomicU64::new(0),
            request_counter: Arc::new(AtomicU32::new(0)),
            command_timeout: Mutex::new(Duration::from_secs(5)),
        }
    }

    #[must_use]
    pub fn operator_id(&self) -> String {
        self.operator_id.lock().clone()
    }

    #[must_use]
    pub fn state(&self) -> ComponentState {
        self.lifecycle.state()
    }

    /// Idle -> Configured: adopt an operator bundle.
    pub fn configure(&self, config: OperatorConfig) -> Result<(), crate::config::ConfigError> {
        config.validate()?;
        *self.operator_id.lock() = config.operator_id.clone();
        *self.command_timeout.lock() = config.command_timeout();
        *self.components.lock() = config.components;
        self.lifecycle.transition(ComponentState::Configured);
        Ok(())
    }

    /// Any state -> Idle: forget components and jobs.
    pub fn reset(&self) {
        self.components.lock().clear();
        self.last_states.lock().clear();
        self.jobs.lock().clear();
        self.lifecycle.reset();
    }

    /// Register one component directly (the config file is the usual way).
    pub fn register_component(&self, entry: ComponentEntry) {
        self.components.lock().push(entry);
        // A populated registry is as good as a loaded bundle.
        self.lifecycle.transition(ComponentState::Configured);
    }

    #[must_use]
    pub fn component_ids(&self) -> Vec<String> {
        self.components
            .lock()
            .iter()
            .map(|c| c.component_id.clone())
            .collect()
    }

    // === Async lifecycle jobs ===

    pub fn configure_all_async(&self) -> String {
        self.spawn_job(JobKind::Configure)
    }

    pub fn arm_all_async(&self) -> String {
        self.spawn_job(JobKind::Arm)
    }

    pub fn start_all_async(&self, run_number: u32) -> String {
        self.spawn_job(JobKind::Start(run_number))
    }

    pub fn stop_all_async(&self, graceful: bool) -> String {
        self.spawn_job(JobKind::Stop(graceful))
    }

    pub fn reset_all_async(&self) -> String {
        self.spawn_job(JobKind::Reset)
    }

    // === Job tracking ===

    #[must_use]
    pub fn job_status(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs.lock().get(job_id).cloned()
    }

    /// Poll a job until it completes or `timeout` elapses.
    #[must_use]
    pub fn wait_for_job(&self, job_id: &str, timeout: Duration) -> Option<JobStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.job_status(job_id)?;
            match status.state {
                JobState::Completed | JobState::Failed => return Some(status),
                JobState::Pending | JobState::Running => {
                    if Instant::now() >= deadline {
                        return Some(status);
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }
    }

    // === Component status ===

    /// Query one component over its command channel.
    #[must_use]
    pub fn component_status(&self, component_id: &str) -> Option<ComponentStatus> {
        let entry = self
            .components
            .lock()
            .iter()
            .find(|c| c.component_id == component_id)
            .cloned()?;
        let timeout = *self.command_timeout.lock();
        let cmd = Command::new(CommandType::GetStatus, self.next_request_id());
        let resp = send_to(&entry, &cmd, timeout)?;
        self.last_states
            .lock()
            .insert(entry.component_id.clone(), resp.current_state);
        serde_json::from_str(resp.payload.as_deref()?).ok()
    }

    /// Query every registered component.
    #[must_use]
    pub fn all_component_status(&self) -> Vec<ComponentStatus> {
        let ids = self.component_ids();
        ids.iter()
            .filter_map(|id| self.component_status(id))
            .collect()
    }

    /// Check the last-known state of every component.
    ///
    /// Vacuously true with an empty registry.
    #[must_use]
    pub fn is_all_in_state(&self, state: ComponentState) -> bool {
        let components = self.components.lock();
        let states = self.last_states.lock();
        components
            .iter()
            .all(|c| states.get(&c.component_id) == Some(&state))
    }

    // === Two-phase start ===

    /// Configure -> Arm -> (Armed barrier) -> Start.
    ///
    /// Each phase is one async job awaited with `phase_timeout`; the Start
    /// job is only dispatched once every component reports Armed.
    pub fn run_two_phase_start(
        &self,
        run_number: u32,
        phase_timeout: Duration,
    ) -> Result<(), String> {
        let job = self.configure_all_async();
        self.expect_job(&job, phase_timeout, "Configure")?;

        let job = self.arm_all_async();
        self.expect_job(&job, phase_timeout, "Arm")?;

        if !self.is_all_in_state(ComponentState::Armed) {
            return Err("armed barrier violated: not all components reached Armed".to_string());
        }

        let job = self.start_all_async(run_number);
        self.expect_job(&job, phase_timeout, "Start")?;
        self.lifecycle.transition(ComponentState::Armed);
        self.lifecycle.transition(ComponentState::Running);
        Ok(())
    }

    fn expect_job(&self, job_id: &str, timeout: Duration, phase: &str) -> Result<(), String> {
        match self.wait_for_job(job_id, timeout) {
            Some(job) if job.state == JobState::Completed => Ok(()),
            Some(job) => Err(format!("{phase} failed: {}", job.error_message)),
            None => Err(format!("{phase} job vanished")),
        }
    }

    fn next_request_id(&self) -> u32 {
        self.request_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn spawn_job(&self, kind: JobKind) -> String {
        let job_id = format!("job-{}", self.job_counter.fetch_add(1, Ordering::SeqCst) + 1);
        self.jobs
            .lock()
            .insert(job_id.clone(), JobStatus::new(job_id.clone()));

        let mut entries = self.components.lock().clone();
        entries.sort_by_key(|e| e.start_order);
        if kind.descending() {
            entries.reverse();
        }

        let timeout = *self.command_timeout.lock();
        let jobs = Arc::clone(&self.jobs);
        let last_states = Arc::clone(&self.last_states);
        let request_counter = Arc::clone(&self.request_counter);
        let worker_job_id = job_id.clone();

        std::thread::spawn(move || {
            run_job(
                kind,
                &entries,
                timeout,
                &jobs,
                &last_states,
                &request_counter,
                &worker_job_id,
            );
        });

        job_id
    }
}

fn run_job(
    kind: JobKind,
    entries: &[ComponentEntry],
    timeout: Duration,
    jobs: &Mutex<HashMap<String, JobStatus>>,
    last_states: &Mutex<HashMap<String, ComponentState>>,
    request_counter: &AtomicU32,
    job_id: &str,
) {
    if let Some(job) = jobs.lock().get_mut(job_id) {
        job.state = JobState::Running;
    }
    log::info!("[Operator] {job_id}: {} x{}", kind.name(), entries.len());

    let mut error: Option<String> = None;
    for entry in entries {
        let request_id = request_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let cmd = match kind {
            JobKind::Configure => {
                let mut cmd = Command::new(CommandType::Configure, request_id);
                cmd.config_path = entry.config_path.clone();
                cmd
            }
            JobKind::Arm => Command::new(CommandType::Arm, request_id),
            JobKind::Start(run) => Command::start(request_id, run),
            JobKind::Stop(graceful) => Command::stop(request_id, graceful),
            JobKind::Reset => Command::new(CommandType::Reset, request_id),
        };

        match send_to(entry, &cmd, timeout) {
            Some(resp) => {
                last_states
                    .lock()
                    .insert(entry.component_id.clone(), resp.current_state);
                if !resp.success {
                    let msg = format!(
                        "{}: {} ({})",
                        entry.component_id,
                        resp.message,
                        resp.error_code.code()
                    );
                    log::warn!("[Operator] {job_id}: {msg}");
                    error.get_or_insert(msg);
                    if !kind.continues_on_failure() {
                        break;
                    }
                }
            }
            None => {
                let msg = format!("{}: command timeout", entry.component_id);
                log::warn!("[Operator] {job_id}: {msg}");
                error.get_or_insert(msg);
                if !kind.continues_on_failure() {
                    break;
                }
            }
        }
    }

    let mut jobs = jobs.lock();
    if let Some(job) = jobs.get_mut(job_id) {
        job.completed_at_ms = Some(wall_clock_ms());
        match error {
            Some(msg) => {
                job.state = JobState::Failed;
                job.error_message = msg;
            }
            None => job.state = JobState::Completed,
        }
    }
}

/// One REQ round trip to a component's command address.
fn send_to(entry: &ComponentEntry, cmd: &Command, timeout: Duration) -> Option<CommandResponse> {
    let mut transport = Transport::new();
    transport
        .configure(TransportConfig::command_only(
            entry.command_address.clone(),
            SocketPattern::Req,
        ))
        .ok()?;
    transport.connect().ok()?;
    transport.send_command(cmd, timeout)
}
