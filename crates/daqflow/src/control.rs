// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Control-plane types: commands, responses, status reports, async jobs.
//!
//! These travel as JSON text frames on the command (REQ/REP) and status
//! (PUB/SUB) channels. The encoding is self-describing key/value; the
//! types here are the contract.

use crate::lifecycle::ComponentState;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Commands the operator can issue to a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandType {
    /// Load configuration and allocate resources.
    Configure,
    /// Prepare for acquisition (bind/connect sockets, arm hardware).
    Arm,
    /// Begin acquisition for a run.
    Start,
    /// End acquisition, optionally flushing and emitting EOS.
    Stop,
    /// Return to `Idle`, clearing configuration and errors.
    Reset,
    /// Query current status.
    GetStatus,
    /// Query active configuration.
    GetConfig,
    /// Liveness check.
    Ping,
}

impl CommandType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CommandType::Configure => "Configure",
            CommandType::Arm => "Arm",
            CommandType::Start => "Start",
            CommandType::Stop => "Stop",
            CommandType::Reset => "Reset",
            CommandType::GetStatus => "GetStatus",
            CommandType::GetConfig => "GetConfig",
            CommandType::Ping => "Ping",
        }
    }
}

/// A request on the command channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub command_type: CommandType,
    /// Correlates the response to this request.
    pub request_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graceful: Option<bool>,
}

impl Command {
    #[must_use]
    pub fn new(command_type: CommandType, request_id: u32) -> Self {
        Self {
            command_type,
            request_id,
            config_path: None,
            payload: None,
            run_number: None,
            graceful: None,
        }
    }

    #[must_use]
    pub fn configure(request_id: u32, config_path: impl Into<String>) -> Self {
        Self {
            config_path: Some(config_path.into()),
            ..Self::new(CommandType::Configure, request_id)
        }
    }

    #[must_use]
    pub fn start(request_id: u32, run_number: u32) -> Self {
        Self {
            run_number: Some(run_number),
            ..Self::new(CommandType::Start, request_id)
        }
    }

    #[must_use]
    pub fn stop(request_id: u32, graceful: bool) -> Self {
        Self {
            graceful: Some(graceful),
            ..Self::new(CommandType::Stop, request_id)
        }
    }
}

/// Closed set of error codes for command responses.
///
/// The numeric values group by failure family (configuration 1xx, state
/// 2xx, hardware 3xx, communication 4xx, internal 5xx).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Success,
    InvalidConfiguration,
    ConfigurationNotFound,
    ConfigurationValidationFailed,
    InvalidStateTransition,
    NotConfigured,
    NotArmed,
    AlreadyRunning,
    HardwareNotFound,
    HardwareConnectionFailed,
    HardwareTimeout,
    CommunicationError,
    Timeout,
    ConnectionLost,
    InternalError,
    OutOfMemory,
    Unknown,
}

impl ErrorCode {
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            ErrorCode::Success => 0,
            ErrorCode::InvalidConfiguration => 100,
            ErrorCode::ConfigurationNotFound => 101,
            ErrorCode::ConfigurationValidationFailed => 102,
            ErrorCode::InvalidStateTransition => 200,
            ErrorCode::NotConfigured => 201,
            ErrorCode::NotArmed => 202,
            ErrorCode::AlreadyRunning => 203,
            ErrorCode::HardwareNotFound => 300,
            ErrorCode::HardwareConnectionFailed => 301,
            ErrorCode::HardwareTimeout => 302,
            ErrorCode::CommunicationError => 400,
            ErrorCode::Timeout => 401,
            ErrorCode::ConnectionLost => 402,
            ErrorCode::InternalError => 500,
            ErrorCode::OutOfMemory => 501,
            ErrorCode::Unknown => 999,
        }
    }
}

/// A reply on the command channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub request_id: u32,
    pub success: bool,
    pub error_code: ErrorCode,
    pub current_state: ComponentState,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl CommandResponse {
    /// Build a success response.
    #[must_use]
    pub fn ok(request_id: u32, state: ComponentState) -> Self {
        Self {
            request_id,
            success: true,
            error_code: ErrorCode::Success,
            current_state: state,
            message: String::new(),
            payload: None,
        }
    }

    /// Build an error response.
    #[must_use]
    pub fn error(
        request_id: u32,
        code: ErrorCode,
        state: ComponentState,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request_id,
            success: false,
            error_code: code,
            current_state: state,
            message: message.into(),
            payload: None,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

/// Point-in-time snapshot of a component, produced from atomic counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub component_id: String,
    pub state: ComponentState,
    /// Unix wall-clock milliseconds when the snapshot was taken.
    pub wall_timestamp_ms: u64,
    /// Current run number (0 outside a run).
    pub run_number: u32,
    pub events_processed: u64,
    pub bytes_transferred: u64,
    pub queue_size: u32,
    pub queue_max: u32,
    pub error_message: String,
    pub heartbeat_counter: u64,
}

/// State of an asynchronous operator job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Tracking record for an asynchronous operator job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub state: JobState,
    pub error_message: String,
    /// Unix milliseconds when the job was created.
    pub created_at_ms: u64,
    /// Unix milliseconds when the job finished, if it has.
    pub completed_at_ms: Option<u64>,
}

impl JobStatus {
    #[must_use]
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            state: JobState::Pending,
            error_message: String::new(),
            created_at_ms: wall_clock_ms(),
            completed_at_ms: None,
        }
    }
}

/// Unix wall-clock milliseconds.
#[must_use]
pub fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_json_roundtrip() {
        let cmd = Command::start(17, 42);
        let json = serde_json::to_string(&cmd).expect("serialize");
        assert!(json.contains("\"Start\""));
        assert!(!json.contains("config_path"));
        let back: Command = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, cmd);
    }

    #[test]
    fn response_json_roundtrip() {
        let resp = CommandResponse::error(
            9,
            ErrorCode::InvalidStateTransition,
            ComponentState::Configured,
            "Arm rejected",
        );
        let json = serde_json::to_string(&resp).expect("serialize");
        let back: CommandResponse = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, resp);
        assert_eq!(back.error_code.code(), 200);
    }

    #[test]
    fn error_code_families() {
        assert_eq!(ErrorCode::Success.code(), 0);
        assert_eq!(ErrorCode::InvalidConfiguration.code(), 100);
        assert_eq!(ErrorCode::NotArmed.code(), 202);
        assert_eq!(ErrorCode::CommunicationError.code(), 400);
        assert_eq!(ErrorCode::Unknown.code(), 999);
    }

    #[test]
    fn status_json_roundtrip() {
        let status = ComponentStatus {
            component_id: "source_0".into(),
            state: ComponentState::Running,
            wall_timestamp_ms: wall_clock_ms(),
            run_number: 42,
            events_processed: 1000,
            bytes_transferred: 22000,
            queue_size: 3,
            queue_max: 10_000,
            error_message: String::new(),
            heartbeat_counter: 12,
        };
        let json = serde_json::to_string(&status).expect("serialize");
        let back: ComponentStatus = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, status);
    }

    #[test]
    fn job_status_starts_pending() {
        let job = JobStatus::new("job-1");
        assert_eq!(job.state, JobState::Pending);
        assert!(job.completed_at_ms.is_none());
        assert!(job.created_at_ms > 0);
    }
}
