// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! On-disk configuration bundles.
//!
//! Components and the operator are configured from self-describing YAML
//! files. Addresses are validated at load time so a typo fails the
//! `Configure` transition instead of a later bind.

use crate::codec::FormatVersion;
use crate::transport::{Endpoint, SocketPattern, TransportError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default bound for inter-thread frame queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default receive timeout in milliseconds.
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 1_000;

/// Default time-sort window (10 ms).
pub const DEFAULT_SORT_WINDOW_NS: u64 = 10_000_000;

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    /// File could not be read.
    Io(std::io::Error),
    /// YAML could not be parsed into the expected shape.
    Parse(serde_yaml::Error),
    /// Contents parsed but failed validation.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config io error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Parse(e)
    }
}

fn check_address(addr: &str, what: &str) -> Result<(), ConfigError> {
    Endpoint::parse(addr).map(|_| ()).map_err(|e| match e {
        TransportError::AddressParse(a) => ConfigError::Invalid(format!("{what}: {a}")),
        other => ConfigError::Invalid(format!("{what}: {other}")),
    })
}

/// Configuration bundle of one data component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentConfig {
    pub component_id: String,

    /// Upstream data addresses (empty for sources).
    #[serde(default)]
    pub input_addresses: Vec<String>,
    /// Downstream data address (absent for sinks).
    #[serde(default)]
    pub output_address: Option<String>,
    /// REP address for the command listener.
    #[serde(default)]
    pub command_address: Option<String>,
    /// PUB address for periodic status reports.
    #[serde(default)]
    pub status_address: Option<String>,

    /// Pattern of the output data socket (fan-out `pub` or load-balanced
    /// `push`).
    #[serde(default = "default_output_pattern")]
    pub output_pattern: SocketPattern,
    /// Pattern of the input data sockets (`sub` or `pull`).
    #[serde(default = "default_input_pattern")]
    pub input_pattern: SocketPattern,

    /// Payload layout this component produces.
    #[serde(default)]
    pub format: FormatVersion,
    #[serde(default = "default_true")]
    pub compression: bool,
    #[serde(default = "default_true")]
    pub checksum: bool,

    /// Source: use the synthetic generator instead of hardware.
    #[serde(default)]
    pub mock_mode: bool,
    /// Source: synthetic events per second.
    #[serde(default = "default_mock_rate")]
    pub mock_event_rate: u32,

    /// Writer: directory for run files.
    #[serde(default)]
    pub output_dir: Option<String>,
    /// Writer: run file prefix.
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    /// Writer: run file extension.
    #[serde(default = "default_file_extension")]
    pub file_extension: String,

    /// Time-sort merger: ordering window in nanoseconds.
    #[serde(default = "default_sort_window")]
    pub sort_window_ns: u64,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_output_pattern() -> SocketPattern {
    SocketPattern::Pub
}

fn default_input_pattern() -> SocketPattern {
    SocketPattern::Sub
}

fn default_mock_rate() -> u32 {
    1_000
}

fn default_file_prefix() -> String {
    "run_".to_string()
}

fn default_file_extension() -> String {
    "dat".to_string()
}

fn default_sort_window() -> u64 {
    DEFAULT_SORT_WINDOW_NS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_receive_timeout() -> u64 {
    DEFAULT_RECEIVE_TIMEOUT_MS
}

impl ComponentConfig {
    /// Minimal bundle with everything else defaulted.
    #[must_use]
    pub fn new(component_id: impl Into<String>) -> Self {
        Self {
            component_id: component_id.into(),
            input_addresses: Vec::new(),
            output_address: None,
            command_address: None,
            status_address: None,
            output_pattern: default_output_pattern(),
            input_pattern: default_input_pattern(),
            format: FormatVersion::default(),
            compression: true,
            checksum: true,
            mock_mode: false,
            mock_event_rate: default_mock_rate(),
            output_dir: None,
            file_prefix: default_file_prefix(),
            file_extension: default_file_extension(),
            sort_window_ns: default_sort_window(),
            queue_capacity: default_queue_capacity(),
            receive_timeout_ms: default_receive_timeout(),
        }
    }

    /// Validate identifiers and addresses.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.component_id.is_empty() {
            return Err(ConfigError::Invalid("component_id is empty".into()));
        }
        for addr in &self.input_addresses {
            check_address(addr, "input address")?;
        }
        if let Some(addr) = &self.output_address {
            check_address(addr, "output address")?;
        }
        if let Some(addr) = &self.command_address {
            check_address(addr, "command address")?;
        }
        if let Some(addr) = &self.status_address {
            check_address(addr, "status address")?;
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be > 0".into()));
        }
        Ok(())
    }

    pub fn receive_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.receive_timeout_ms)
    }
}

/// One managed component as seen by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentEntry {
    pub component_id: String,
    pub command_address: String,
    /// Free-form role tag ("source", "writer", ...); informational.
    #[serde(default)]
    pub role: String,
    /// Components start in ascending order and stop in descending order.
    #[serde(default)]
    pub start_order: u32,
    /// Configuration bundle passed along with the Configure command.
    #[serde(default)]
    pub config_path: Option<String>,
}

/// Configuration bundle of the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatorConfig {
    pub operator_id: String,
    #[serde(default)]
    pub components: Vec<ComponentEntry>,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
}

fn default_command_timeout() -> u64 {
    5_000
}

impl OperatorConfig {
    #[must_use]
    pub fn new(operator_id: impl Into<String>) -> Self {
        Self {
            operator_id: operator_id.into(),
            components: Vec::new(),
            command_timeout_ms: default_command_timeout(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.operator_id.is_empty() {
            return Err(ConfigError::Invalid("operator_id is empty".into()));
        }
        for entry in &self.components {
            if entry.component_id.is_empty() {
                return Err(ConfigError::Invalid("component_id is empty".into()));
            }
            check_address(&entry.command_address, "command address")?;
        }
        let mut ids: Vec<&str> = self
            .components
            .iter()
            .map(|c| c.component_id.as_str())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.components.len() {
            return Err(ConfigError::Invalid("duplicate component_id".into()));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.command_timeout_ms)
    }
}

/// Load and validate a component bundle from a YAML file.
pub fn load_component_config(path: impl AsRef<Path>) -> Result<ComponentConfig, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let config: ComponentConfig = serde_yaml::from_str(&text)?;
    config.validate()?;
    Ok(config)
}

/// Load and validate an operator bundle from a YAML file.
pub fn load_operator_config(path: impl AsRef<Path>) -> Result<OperatorConfig, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let config: OperatorConfig = serde_yaml::from_str(&text)?;
    config.validate()?;
    Ok(config)
}
