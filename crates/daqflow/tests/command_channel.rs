// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Command listener driving a component over the REQ/REP channel.

use daqflow::component::{Component, CommandListener, Source};
use daqflow::config::ComponentConfig;
use daqflow::control::{Command, CommandType, ComponentStatus, ErrorCode};
use daqflow::lifecycle::ComponentState;
use daqflow::transport::{SocketPattern, Transport, TransportConfig};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const CMD_TIMEOUT: Duration = Duration::from_secs(3);

fn write_source_config(output: &str) -> tempfile::NamedTempFile {
    let mut config = ComponentConfig::new("source_cmd");
    config.output_address = Some(output.to_string());
    config.output_pattern = SocketPattern::Push;
    config.mock_mode = true;
    config.mock_event_rate = 2_000;
    let yaml = serde_yaml::to_string(&config).expect("serialize config");

    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(yaml.as_bytes()).expect("write config");
    file.flush().expect("flush config");
    file
}

fn requester(address: &str) -> Transport {
    let mut transport = Transport::new();
    transport
        .configure(TransportConfig::command_only(address, SocketPattern::Req))
        .expect("configure requester");
    transport.connect().expect("connect requester");
    transport
}

#[test]
fn full_lifecycle_over_command_channel() {
    let source: Arc<dyn Component> = Arc::new(Source::new());
    let mut listener =
        CommandListener::start("inproc://cmd-lifecycle", Arc::clone(&source))
            .expect("listener");
    let client = requester("inproc://cmd-lifecycle");

    let config_file = write_source_config("inproc://cmd-lifecycle-data");

    // Ping while Idle.
    let resp = client
        .send_command(&Command::new(CommandType::Ping, 1), CMD_TIMEOUT)
        .expect("ping response");
    assert!(resp.success);
    assert_eq!(resp.current_state, ComponentState::Idle);

    // Configure from the YAML bundle.
    let resp = client
        .send_command(
            &Command::configure(2, config_file.path().to_string_lossy()),
            CMD_TIMEOUT,
        )
        .expect("configure response");
    assert!(resp.success, "{}", resp.message);
    assert_eq!(resp.current_state, ComponentState::Configured);

    // Arm, then start run 9.
    let resp = client
        .send_command(&Command::new(CommandType::Arm, 3), CMD_TIMEOUT)
        .expect("arm response");
    assert!(resp.success, "{}", resp.message);
    assert_eq!(resp.current_state, ComponentState::Armed);

    let resp = client
        .send_command(&Command::start(4, 9), CMD_TIMEOUT)
        .expect("start response");
    assert!(resp.success, "{}", resp.message);
    assert_eq!(resp.current_state, ComponentState::Running);

    // GetStatus carries the status snapshot as JSON payload.
    std::thread::sleep(Duration::from_millis(100));
    let resp = client
        .send_command(&Command::new(CommandType::GetStatus, 5), CMD_TIMEOUT)
        .expect("status response");
    let status: ComponentStatus =
        serde_json::from_str(resp.payload.as_deref().expect("payload")).expect("status json");
    assert_eq!(status.component_id, "source_cmd");
    assert_eq!(status.run_number, 9);
    assert_eq!(status.state, ComponentState::Running);

    // GetConfig returns the active YAML bundle.
    let resp = client
        .send_command(&Command::new(CommandType::GetConfig, 6), CMD_TIMEOUT)
        .expect("config response");
    let yaml = resp.payload.expect("config payload");
    let active: ComponentConfig = serde_yaml::from_str(&yaml).expect("config yaml");
    assert_eq!(active.component_id, "source_cmd");

    // Stop and reset.
    let resp = client
        .send_command(&Command::stop(7, true), CMD_TIMEOUT)
        .expect("stop response");
    assert!(resp.success, "{}", resp.message);
    assert_eq!(resp.current_state, ComponentState::Configured);

    let resp = client
        .send_command(&Command::new(CommandType::Reset, 8), CMD_TIMEOUT)
        .expect("reset response");
    assert!(resp.success);
    assert_eq!(resp.current_state, ComponentState::Idle);

    listener.stop();
}

#[test]
fn invalid_transition_reported_with_error_code() {
    let source: Arc<dyn Component> = Arc::new(Source::new());
    let mut listener =
        CommandListener::start("inproc://cmd-invalid", Arc::clone(&source))
            .expect("listener");
    let client = requester("inproc://cmd-invalid");

    // Arm straight from Idle is illegal.
    let resp = client
        .send_command(&Command::new(CommandType::Arm, 1), CMD_TIMEOUT)
        .expect("arm response");
    assert!(!resp.success);
    assert_eq!(resp.error_code, ErrorCode::InvalidStateTransition);
    assert_eq!(resp.current_state, ComponentState::Idle);

    // The rejection must not have mutated the state.
    assert_eq!(source.state(), ComponentState::Idle);

    listener.stop();
}

#[test]
fn configure_with_missing_file_reports_not_found() {
    let source: Arc<dyn Component> = Arc::new(Source::new());
    let mut listener =
        CommandListener::start("inproc://cmd-missing", Arc::clone(&source))
            .expect("listener");
    let client = requester("inproc://cmd-missing");

    let resp = client
        .send_command(
            &Command::configure(1, "/nonexistent/bundle.yaml"),
            CMD_TIMEOUT,
        )
        .expect("configure response");
    assert!(!resp.success);
    assert_eq!(resp.error_code, ErrorCode::ConfigurationNotFound);

    listener.stop();
}

#[test]
fn lifecycle_over_tcp_command_channel() {
    let source: Arc<dyn Component> = Arc::new(Source::new());
    let mut listener =
        CommandListener::start("tcp://127.0.0.1:47341", Arc::clone(&source))
            .expect("listener");
    let client = requester("tcp://127.0.0.1:47341");

    let resp = client
        .send_command(&Command::new(CommandType::Ping, 1), CMD_TIMEOUT)
        .expect("ping over tcp");
    assert!(resp.success);
    assert_eq!(resp.request_id, 1);

    let resp = client
        .send_command(&Command::new(CommandType::GetStatus, 2), CMD_TIMEOUT)
        .expect("status over tcp");
    assert!(resp.payload.is_some());

    listener.stop();
}
