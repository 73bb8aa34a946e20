// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Broker-less byte transport.
//!
//! One [`Transport`] owns up to three independently addressed sockets: a
//! **data** socket, a **status** socket and a **command** socket. An empty
//! address disables a channel; setting two addresses equal disables the
//! duplicates. Bind-vs-connect is derived from each channel's pattern.
//!
//! The transport moves bytes, never records: `send_bytes` consumes the
//! buffer (ownership transfers into the socket queue) and `receive_bytes`
//! hands out freshly owned buffers. Command and status payloads are JSON
//! text frames of the [`crate::control`] types.
//!
//! Fan-out delivery has the usual slow-joiner caveat: a subscriber that
//! connects after the producer started misses earlier frames, which is why
//! the lifecycle arms (connects) every consumer before any producer runs.

pub mod endpoint;
mod inproc;
mod socket;
mod tcp;

pub use endpoint::{Endpoint, SocketPattern, TransportError};
pub use socket::{PatternSocket, DEFAULT_QUEUE_CAPACITY, DEFAULT_RECV_TIMEOUT, MAX_MESSAGE_SIZE};

use crate::control::{Command, CommandResponse, ComponentStatus};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Configuration of one transport instance.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Data channel address; empty disables the channel.
    pub data_address: String,
    /// Status channel address; empty (or equal to data) disables it.
    pub status_address: String,
    /// Command channel address; empty (or a duplicate) disables it.
    pub command_address: String,
    pub data_pattern: SocketPattern,
    pub status_pattern: SocketPattern,
    pub command_pattern: SocketPattern,
    /// Bound on every receive call.
    pub receive_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            data_address: String::new(),
            status_address: String::new(),
            command_address: String::new(),
            data_pattern: SocketPattern::Pub,
            status_pattern: SocketPattern::Pub,
            command_pattern: SocketPattern::Rep,
            receive_timeout: DEFAULT_RECV_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Data-only configuration, the common case for pipeline links.
    #[must_use]
    pub fn data_only(address: impl Into<String>, pattern: SocketPattern) -> Self {
        Self {
            data_address: address.into(),
            data_pattern: pattern,
            ..Self::default()
        }
    }

    /// Command-only configuration (REQ or REP end of a command channel).
    #[must_use]
    pub fn command_only(address: impl Into<String>, pattern: SocketPattern) -> Self {
        Self {
            command_address: address.into(),
            command_pattern: pattern,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), TransportError> {
        for addr in [&self.data_address, &self.status_address, &self.command_address] {
            if !addr.is_empty() {
                Endpoint::parse(addr)?;
            }
        }
        Ok(())
    }
}

/// A component's connection to the outside world.
pub struct Transport {
    config: Option<TransportConfig>,
    data: Option<PatternSocket>,
    status: Option<PatternSocket>,
    command: Option<PatternSocket>,
    /// Serializes REQ round trips so request/reply strictly alternate.
    req_lock: Mutex<()>,
    connected: bool,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: None,
            data: None,
            status: None,
            command: None,
            req_lock: Mutex::new(()),
            connected: false,
        }
    }

    /// Validate and store the configuration. Must precede [`Transport::connect`].
    pub fn configure(&mut self, config: TransportConfig) -> Result<(), TransportError> {
        config.validate()?;
        self.config = Some(config);
        Ok(())
    }

    /// Open every enabled socket per its address and role.
    pub fn connect(&mut self) -> Result<(), TransportError> {
        if self.connected {
            return Err(TransportError::AlreadyConnected);
        }
        let config = self.config.clone().ok_or(TransportError::NotConfigured)?;
        let timeout = config.receive_timeout;

        if !config.data_address.is_empty() {
            self.data = Some(PatternSocket::open(
                Endpoint::parse(&config.data_address)?,
                config.data_pattern,
                timeout,
            )?);
        }
        // Equal addresses collapse to one socket; the duplicates stay off.
        if !config.status_address.is_empty() && config.status_address != config.data_address {
            self.status = Some(PatternSocket::open(
                Endpoint::parse(&config.status_address)?,
                config.status_pattern,
                timeout,
            )?);
        }
        if !config.command_address.is_empty()
            && config.command_address != config.data_address
            && config.command_address != config.status_address
        {
            self.command = Some(PatternSocket::open(
                Endpoint::parse(&config.command_address)?,
                config.command_pattern,
                timeout,
            )?);
        }

        self.connected = true;
        Ok(())
    }

    /// Close every socket. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        self.data = None;
        self.status = None;
        self.command = None;
        self.connected = false;
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The data socket, when the data channel is enabled and connected.
    #[must_use]
    pub fn data_socket(&self) -> Option<&PatternSocket> {
        self.data.as_ref()
    }

    // === Data channel ===

    /// Move `buf` into the data socket's queue.
    ///
    /// Returns `false` when not connected or when a non-lossy send would
    /// block. A `true` return means the whole message was enqueued.
    pub fn send_bytes(&self, buf: Vec<u8>) -> bool {
        match &self.data {
            Some(socket) => socket.send(buf),
            None => false,
        }
    }

    /// Receive one message from the data socket, or `None` on timeout.
    #[must_use]
    pub fn receive_bytes(&self) -> Option<Vec<u8>> {
        self.data.as_ref()?.receive()
    }

    // === Status channel ===

    pub fn send_status(&self, status: &ComponentStatus) -> bool {
        let Some(socket) = &self.status else {
            return false;
        };
        match serde_json::to_vec(status) {
            Ok(bytes) => socket.send(bytes),
            Err(e) => {
                log::warn!("[Transport] status serialize failed: {e}");
                false
            }
        }
    }

    #[must_use]
    pub fn receive_status(&self) -> Option<ComponentStatus> {
        let bytes = self.status.as_ref()?.receive()?;
        match serde_json::from_slice(&bytes) {
            Ok(status) => Some(status),
            Err(e) => {
                log::warn!("[Transport] status decode failed: {e}");
                None
            }
        }
    }

    // === Command channel (requester side) ===

    /// Perform one request/reply round trip.
    ///
    /// Returns the decoded response, or `None` on timeout or when the
    /// command channel is disabled. Stale replies with a different
    /// `request_id` are discarded while waiting.
    pub fn send_command(&self, cmd: &Command, timeout: Duration) -> Option<CommandResponse> {
        let socket = self.command.as_ref()?;
        let _guard = self.req_lock.lock();

        let bytes = match serde_json::to_vec(cmd) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("[Transport] command serialize failed: {e}");
                return None;
            }
        };
        if !socket.send(bytes) {
            return None;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let reply = socket.receive_timeout(remaining)?;
            match serde_json::from_slice::<CommandResponse>(&reply) {
                Ok(resp) if resp.request_id == cmd.request_id => return Some(resp),
                Ok(resp) => {
                    log::debug!(
                        "[Transport] discarding stale reply for request {}",
                        resp.request_id
                    );
                }
                Err(e) => {
                    log::warn!("[Transport] response decode failed: {e}");
                    return None;
                }
            }
        }
    }

    // === Command channel (replier side) ===

    /// Wait up to `timeout` for an incoming command.
    #[must_use]
    pub fn receive_command(&self, timeout: Duration) -> Option<Command> {
        let bytes = self.command.as_ref()?.receive_timeout(timeout)?;
        match serde_json::from_slice(&bytes) {
            Ok(cmd) => Some(cmd),
            Err(e) => {
                log::warn!("[Transport] command decode failed: {e}");
                None
            }
        }
    }

    /// Reply to the most recently received command.
    pub fn send_command_response(&self, response: &CommandResponse) -> bool {
        let Some(socket) = &self.command else {
            return false;
        };
        match serde_json::to_vec(response) {
            Ok(bytes) => socket.send(bytes),
            Err(e) => {
                log::warn!("[Transport] response serialize failed: {e}");
                false
            }
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("connected", &self.connected)
            .field("data", &self.data.is_some())
            .field("status", &self.status.is_some())
            .field("command", &self.command.is_some())
            .finish()
    }
}
