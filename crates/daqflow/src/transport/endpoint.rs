// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Endpoint addresses and socket patterns.
//!
//! Addresses take the form `tcp://host:port` or `inproc://name`. An empty
//! address disables the channel that would use it; bind-vs-connect is
//! derived from the pattern, never from a separate flag.

use std::fmt;

/// A parsed transport address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP endpoint; `host` may be `*` on the binding side (any interface).
    Tcp { host: String, port: u16 },
    /// Process-internal endpoint identified by name.
    Inproc(String),
}

impl Endpoint {
    /// Parse an address string.
    ///
    /// `tcp://*:5555`, `tcp://127.0.0.1:5555` and `inproc://data-0` are all
    /// valid. Unknown schemes, missing ports and empty names are rejected.
    pub fn parse(address: &str) -> Result<Self, TransportError> {
        if let Some(rest) = address.strip_prefix("tcp://") {
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or_else(|| TransportError::AddressParse(address.to_string()))?;
            if host.is_empty() {
                return Err(TransportError::AddressParse(address.to_string()));
            }
            let port: u16 = port
                .parse()
                .map_err(|_| TransportError::AddressParse(address.to_string()))?;
            Ok(Endpoint::Tcp {
                host: host.to_string(),
                port,
            })
        } else if let Some(name) = address.strip_prefix("inproc://") {
            if name.is_empty() {
                return Err(TransportError::AddressParse(address.to_string()));
            }
            Ok(Endpoint::Inproc(name.to_string()))
        } else {
            Err(TransportError::AddressParse(address.to_string()))
        }
    }

    /// Host:port string suitable for binding (`*` maps to `0.0.0.0`).
    #[must_use]
    pub fn bind_addr(&self) -> Option<String> {
        match self {
            Endpoint::Tcp { host, port } => {
                let host = if host == "*" { "0.0.0.0" } else { host };
                Some(format!("{host}:{port}"))
            }
            Endpoint::Inproc(_) => None,
        }
    }

    /// Host:port string suitable for connecting (`*` maps to loopback).
    #[must_use]
    pub fn connect_addr(&self) -> Option<String> {
        match self {
            Endpoint::Tcp { host, port } => {
                let host = if host == "*" { "127.0.0.1" } else { host };
                Some(format!("{host}:{port}"))
            }
            Endpoint::Inproc(_) => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Endpoint::Inproc(name) => write!(f, "inproc://{name}"),
        }
    }
}

/// Messaging pattern of one socket.
///
/// The pattern determines the socket's role:
///
/// | pattern | role | delivery |
/// |---------|------|----------|
/// | `Pub` / `Sub` | bind / connect | fan-out, silent drop to slow peers |
/// | `Push` / `Pull` | bind / connect | round-robin with back-pressure |
/// | `Rep` / `Req` | bind / connect | strict request/reply alternation |
/// | `Pair` / `PairPeer` | bind / connect | exclusive 1:1 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketPattern {
    Pub,
    Sub,
    Push,
    Pull,
    Req,
    Rep,
    Pair,
    PairPeer,
}

impl SocketPattern {
    /// Whether this pattern binds (listens) rather than connects.
    #[must_use]
    pub fn binds(self) -> bool {
        matches!(
            self,
            SocketPattern::Pub | SocketPattern::Push | SocketPattern::Rep | SocketPattern::Pair
        )
    }

    /// Whether `send` is meaningful on this pattern.
    #[must_use]
    pub fn can_send(self) -> bool {
        !matches!(self, SocketPattern::Sub | SocketPattern::Pull)
    }

    /// Whether `receive` is meaningful on this pattern.
    #[must_use]
    pub fn can_recv(self) -> bool {
        !matches!(self, SocketPattern::Pub | SocketPattern::Push)
    }

    /// Whether delivery to a slow peer is silently dropped.
    #[must_use]
    pub fn is_lossy(self) -> bool {
        matches!(self, SocketPattern::Pub)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SocketPattern::Pub => "PUB",
            SocketPattern::Sub => "SUB",
            SocketPattern::Push => "PUSH",
            SocketPattern::Pull => "PULL",
            SocketPattern::Req => "REQ",
            SocketPattern::Rep => "REP",
            SocketPattern::Pair => "PAIR",
            SocketPattern::PairPeer => "PAIR",
        }
    }
}

/// Transport-layer error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Address string could not be parsed.
    AddressParse(String),
    /// Configure was not called before Connect.
    NotConfigured,
    /// Connect called twice.
    AlreadyConnected,
    /// Binding the endpoint failed.
    Bind(String),
    /// Connecting to the endpoint failed.
    Connect(String),
    /// Send/receive attempted on a pattern that does not support it.
    PatternMismatch,
    /// Inproc endpoint name already bound.
    EndpointInUse(String),
    /// Inproc endpoint does not exist.
    EndpointNotFound(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddressParse(addr) => write!(f, "invalid address: {addr}"),
            Self::NotConfigured => write!(f, "transport not configured"),
            Self::AlreadyConnected => write!(f, "transport already connected"),
            Self::Bind(msg) => write!(f, "bind failed: {msg}"),
            Self::Connect(msg) => write!(f, "connect failed: {msg}"),
            Self::PatternMismatch => write!(f, "operation not valid for socket pattern"),
            Self::EndpointInUse(name) => write!(f, "inproc endpoint already bound: {name}"),
            Self::EndpointNotFound(name) => write!(f, "inproc endpoint not found: {name}"),
        }
    }
}

impl std::error::Error for TransportError {}
