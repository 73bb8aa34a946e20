// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! # daqflow - distributed data-acquisition pipeline core
//!
//! A message-oriented runtime for physics-experiment digitizers: producers
//! (sources), transformers (mergers) and consumers (writers, monitors)
//! form a controllable graph. Event batches travel as framed binary
//! messages over broker-less sockets while an operator drives every node
//! through a shared lifecycle state machine.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                        Control Plane                               |
//! |   Operator -> REQ/REP command channels -> per-node Lifecycle       |
//! +--------------------------------------------------------------------+
//! |                        Component Layer                             |
//! |   Source | SimpleMerger | TimeSortMerger | Writer | Monitor        |
//! +--------------------------------------------------------------------+
//! |                        Framing Layer                               |
//! |   FrameCodec (64-byte header, LZ4, CRC32) | SequenceGapDetector    |
//! +--------------------------------------------------------------------+
//! |                        Transport Layer                             |
//! |   PUB/SUB | PUSH/PULL | REQ/REP | PAIR  over  tcp:// / inproc://   |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daqflow::component::{Component, Source, Writer};
//! use daqflow::config::ComponentConfig;
//! use daqflow::transport::SocketPattern;
//!
//! // A mock source pushing into a file writer.
//! let mut src_cfg = ComponentConfig::new("source_0");
//! src_cfg.output_address = Some("tcp://*:5555".into());
//! src_cfg.output_pattern = SocketPattern::Push;
//! src_cfg.mock_mode = true;
//!
//! let mut wrt_cfg = ComponentConfig::new("writer_0");
//! wrt_cfg.input_addresses = vec!["tcp://localhost:5555".into()];
//! wrt_cfg.input_pattern = SocketPattern::Pull;
//! wrt_cfg.output_dir = Some("/data".into());
//!
//! let source = Source::new();
//! let writer = Writer::new();
//! source.configure(src_cfg).unwrap();
//! writer.configure(wrt_cfg).unwrap();
//!
//! // Two-phase start: arm everything, then trigger.
//! source.arm().unwrap();
//! writer.arm().unwrap();
//! writer.start(42).unwrap();
//! source.start(42).unwrap();
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`codec::FrameCodec`] | Event batches to framed byte buffers and back |
//! | [`transport::Transport`] | Data/status/command sockets of one node |
//! | [`lifecycle::LifecycleCore`] | Atomic Idle/Configured/Armed/Running machine |
//! | [`component::Source`] | Hardware (or mock) events onto the data plane |
//! | [`operator::Operator`] | Async fan-out of lifecycle commands |
//! | [`twophase::TwoPhaseStartManager`] | Armed barrier for synchronized starts |

/// Frame codec: header, CRC32, LZ4, payload layouts, auto-sequencing.
pub mod codec;
/// Data components and the shared worker-thread harness.
pub mod component;
/// On-disk YAML configuration bundles.
pub mod config;
/// Control-plane types (commands, responses, status, jobs).
pub mod control;
/// Shared lifecycle state machine.
pub mod lifecycle;
/// Operator: registry, async jobs, two-phase orchestration.
pub mod operator;
/// Event record shapes and flag bits.
pub mod record;
/// Component runtime: bounded queues, metrics, collaborator traits.
pub mod runtime;
/// Receive-side sequence-gap detection.
pub mod seqgap;
/// Broker-less byte transport (tcp:// and inproc://).
pub mod transport;
/// Two-phase start coordination.
pub mod twophase;

pub use codec::{CodecError, DecodedBatch, FormatVersion, FrameCodec, FrameInfo};
pub use component::{
    Component, ComponentError, Monitor, SimpleMerger, Source, TimeSortMerger, Writer,
};
pub use config::{ComponentConfig, OperatorConfig};
pub use control::{Command, CommandResponse, CommandType, ComponentStatus, ErrorCode, JobState};
pub use lifecycle::ComponentState;
pub use operator::Operator;
pub use record::{EventRecord, MinimalEventRecord, Record};
pub use seqgap::{GapInfo, SeqCheck, SequenceGapDetector};
pub use transport::{SocketPattern, Transport, TransportConfig};
pub use twophase::{PhaseResult, StartPhase, TwoPhaseStartManager};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
