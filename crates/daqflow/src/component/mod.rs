// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Data components and their shared harness.
//!
//! Every pipeline node implements [`Component`]: the lifecycle operations,
//! a lock-free status snapshot, and an optional command listener that lets
//! the operator drive the node over a REP socket. The concrete components
//! are [`Source`], [`Writer`], [`Monitor`], [`SimpleMerger`] and
//! [`TimeSortMerger`].

pub mod merger;
pub mod monitor;
pub mod source;
pub mod timesort;
pub mod writer;

pub use merger::SimpleMerger;
pub use monitor::Monitor;
pub use source::Source;
pub use timesort::TimeSortMerger;
pub use writer::Writer;

use crate::config::{load_component_config, ComponentConfig, ConfigError};
use crate::control::{wall_clock_ms, Command, CommandResponse, CommandType, ComponentStatus, ErrorCode};
use crate::lifecycle::{ComponentState, LifecycleCore};
use crate::runtime::{HardwareError, Metrics};
use crate::transport::{SocketPattern, Transport, TransportConfig, TransportError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Why a lifecycle operation was refused or failed.
#[derive(Debug)]
pub enum ComponentError {
    /// Operation not legal in the current state.
    InvalidTransition {
        from: ComponentState,
        operation: &'static str,
    },
    /// Operation requires a configuration that is not present.
    NotConfigured,
    Config(ConfigError),
    Transport(TransportError),
    Hardware(HardwareError),
    Io(std::io::Error),
    Internal(String),
}

impl std::fmt::Display for ComponentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTransition { from, operation } => {
                write!(f, "{operation} not valid in state {from}")
            }
            Self::NotConfigured => write!(f, "component not configured"),
            Self::Config(e) => write!(f, "{e}"),
            Self::Transport(e) => write!(f, "{e}"),
            Self::Hardware(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ComponentError {}

impl ComponentError {
    /// Error code reported on the command channel.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidTransition { .. } => ErrorCode::InvalidStateTransition,
            Self::NotConfigured => ErrorCode::NotConfigured,
            Self::Config(ConfigError::Io(_)) => ErrorCode::ConfigurationNotFound,
            Self::Config(_) => ErrorCode::ConfigurationValidationFailed,
            Self::Transport(_) => ErrorCode::CommunicationError,
            Self::Hardware(HardwareError::NotFound) => ErrorCode::HardwareNotFound,
            Self::Hardware(HardwareError::ConnectionFailed(_)) => {
                ErrorCode::HardwareConnectionFailed
            }
            Self::Hardware(HardwareError::Timeout) => ErrorCode::HardwareTimeout,
            Self::Hardware(HardwareError::Fault(_)) => ErrorCode::InternalError,
            Self::Io(_) | Self::Internal(_) => ErrorCode::InternalError,
        }
    }
}

impl From<ConfigError> for ComponentError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<TransportError> for ComponentError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<HardwareError> for ComponentError {
    fn from(e: HardwareError) -> Self {
        Self::Hardware(e)
    }
}

impl From<std::io::Error> for ComponentError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// State shared by every component implementation.
#[derive(Debug)]
pub struct ComponentCore {
    id: Mutex<String>,
    pub lifecycle: LifecycleCore,
    pub metrics: Metrics,
    run_number: AtomicU32,
    error_message: Mutex<String>,
    /// Observed by every worker loop each iteration.
    pub running: AtomicBool,
    pub shutdown_requested: AtomicBool,
}

impl ComponentCore {
    #[must_use]
    pub fn new(default_id: &str) -> Self {
        Self {
            id: Mutex::new(default_id.to_string()),
            lifecycle: LifecycleCore::new(),
            metrics: Metrics::new(),
            run_number: AtomicU32::new(0),
            error_message: Mutex::new(String::new()),
            running: AtomicBool::new(false),
            shutdown_requested: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn component_id(&self) -> String {
        self.id.lock().clone()
    }

    pub fn set_component_id(&self, id: &str) {
        *self.id.lock() = id.to_string();
    }

    #[must_use]
    pub fn state(&self) -> ComponentState {
        self.lifecycle.state()
    }

    #[must_use]
    pub fn run_number(&self) -> u32 {
        self.run_number.load(Ordering::SeqCst)
    }

    pub fn set_run_number(&self, run: u32) {
        self.run_number.store(run, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Worker-loop condition, observed every iteration.
    #[must_use]
    pub fn should_run(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Process-teardown request; stronger than a stop.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    /// Record an error message and fault the lifecycle.
    pub fn fault(&self, message: impl Into<String>) {
        let message = message.into();
        log::error!("[{}] fault: {message}", self.component_id());
        *self.error_message.lock() = message;
        self.running.store(false, Ordering::SeqCst);
        self.lifecycle.fault();
    }

    pub fn clear_error(&self) {
        self.error_message.lock().clear();
    }

    /// Snapshot from the atomic counters.
    #[must_use]
    pub fn status(&self) -> ComponentStatus {
        ComponentStatus {
            component_id: self.component_id(),
            state: self.state(),
            wall_timestamp_ms: wall_clock_ms(),
            run_number: self.run_number(),
            events_processed: self.metrics.events(),
            bytes_transferred: self.metrics.bytes(),
            queue_size: self.metrics.queue_size.load(Ordering::Relaxed),
            queue_max: self.metrics.queue_max.load(Ordering::Relaxed),
            error_message: self.error_message.lock().clone(),
            heartbeat_counter: self.metrics.heartbeat_counter.load(Ordering::Relaxed),
        }
    }
}

/// Common lifecycle surface of every pipeline node.
pub trait Component: Send + Sync {
    fn component_id(&self) -> String;
    fn state(&self) -> ComponentState;

    /// Idle -> Configured. Parses and validates the bundle.
    fn configure(&self, config: ComponentConfig) -> Result<(), ComponentError>;

    /// Idle -> Configured from a YAML file on disk.
    fn configure_from_file(&self, path: &str) -> Result<(), ComponentError> {
        let config = load_component_config(path)?;
        self.configure(config)
    }

    /// Configured -> Armed. Opens sockets (binders first) and prepares
    /// hardware and files without producing or consuming.
    fn arm(&self) -> Result<(), ComponentError>;

    /// Armed -> Running. Records the run number and starts the workers.
    fn start(&self, run_number: u32) -> Result<(), ComponentError>;

    /// Running -> Configured. Graceful stops flush and propagate EOS.
    fn stop(&self, graceful: bool) -> Result<(), ComponentError>;

    /// Any state -> Idle. Clears configuration and errors.
    fn reset(&self);

    fn status(&self) -> ComponentStatus;

    /// Active configuration, when configured.
    fn active_config(&self) -> Option<ComponentConfig>;

    /// Test hook: drive the component into the Error state.
    fn force_error(&self, message: &str);
}

/// Translate one command into lifecycle calls and build the reply.
pub fn handle_command(component: &dyn Component, cmd: &Command) -> CommandResponse {
    let id = cmd.request_id;
    let result: Result<Option<String>, ComponentError> = match cmd.command_type {
        CommandType::Configure => match &cmd.config_path {
            Some(path) => component.configure_from_file(path).map(|()| None),
            None => Err(ComponentError::Config(ConfigError::Invalid(
                "Configure requires config_path".into(),
            ))),
        },
        CommandType::Arm => component.arm().map(|()| None),
        CommandType::Start => {
            let run = cmd.run_number.unwrap_or(0);
            component.start(run).map(|()| None)
        }
        CommandType::Stop => {
            let graceful = cmd.graceful.unwrap_or(true);
            component.stop(graceful).map(|()| None)
        }
        CommandType::Reset => {
            component.reset();
            Ok(None)
        }
        CommandType::GetStatus => match serde_json::to_string(&component.status()) {
            Ok(json) => Ok(Some(json)),
            Err(e) => Err(ComponentError::Internal(e.to_string())),
        },
        CommandType::GetConfig => match component.active_config() {
            Some(config) => match serde_yaml::to_string(&config) {
                Ok(yaml) => Ok(Some(yaml)),
                Err(e) => Err(ComponentError::Internal(e.to_string())),
            },
            None => Err(ComponentError::NotConfigured),
        },
        CommandType::Ping => Ok(None),
    };

    match result {
        Ok(payload) => {
            let mut resp = CommandResponse::ok(id, component.state());
            resp.payload = payload;
            resp
        }
        Err(e) => CommandResponse::error(id, e.error_code(), component.state(), e.to_string()),
    }
}

/// Background REP-socket thread dispatching commands to a component.
pub struct CommandListener {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CommandListener {
    /// Bind `address` and start serving `component`.
    pub fn start(
        address: &str,
        component: Arc<dyn Component>,
    ) -> Result<Self, TransportError> {
        let mut transport = Transport::new();
        transport.configure(TransportConfig::command_only(address, SocketPattern::Rep))?;
        transport.connect()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);
        let id = component.component_id();
        let thread = std::thread::spawn(move || {
            log::debug!("[{id}] command listener up");
            while !thread_shutdown.load(Ordering::SeqCst) {
                let Some(cmd) = transport.receive_command(Duration::from_millis(200)) else {
                    continue;
                };
                log::debug!("[{id}] command {}", cmd.command_type.as_str());
                let resp = handle_command(component.as_ref(), &cmd);
                if !transport.send_command_response(&resp) {
                    log::warn!("[{id}] failed to send command response");
                }
            }
        });

        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }

    /// Stop and join the listener thread.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for CommandListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Join and drain a set of worker thread handles.
pub(crate) fn join_workers(threads: &Mutex<Vec<JoinHandle<()>>>) {
    let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *threads.lock());
    for handle in handles {
        let _ = handle.join();
    }
}
