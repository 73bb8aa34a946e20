// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Operator-driven lifecycle: two-phase start across source and writer.

use daqflow::component::{CommandListener, Component, Source, Writer};
use daqflow::config::{ComponentConfig, ComponentEntry};
use daqflow::control::JobState;
use daqflow::lifecycle::ComponentState;
use daqflow::operator::Operator;
use daqflow::transport::SocketPattern;
use std::io::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

const PHASE_TIMEOUT: Duration = Duration::from_secs(10);

fn write_yaml(config: &ComponentConfig) -> tempfile::NamedTempFile {
    let yaml = serde_yaml::to_string(config).expect("serialize config");
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(yaml.as_bytes()).expect("write config");
    file.flush().expect("flush config");
    file
}

fn entry(id: &str, addr: &str, order: u32, config_path: &std::path::Path) -> ComponentEntry {
    ComponentEntry {
        component_id: id.into(),
        command_address: addr.into(),
        role: String::new(),
        start_order: order,
        config_path: Some(config_path.to_string_lossy().into_owned()),
    }
}

#[test]
fn operator_runs_full_lifecycle_with_armed_barrier() {
    let dir = tempfile::tempdir().expect("tempdir");

    let mut source_cfg = ComponentConfig::new("source_0");
    source_cfg.output_address = Some("inproc://op-data".into());
    source_cfg.output_pattern = SocketPattern::Push;
    source_cfg.mock_mode = true;
    source_cfg.mock_event_rate = 2_000;
    let source_file = write_yaml(&source_cfg);

    let mut writer_cfg = ComponentConfig::new("writer_0");
    writer_cfg.input_addresses = vec!["inproc://op-data".into()];
    writer_cfg.input_pattern = SocketPattern::Pull;
    writer_cfg.output_dir = Some(dir.path().to_string_lossy().into_owned());
    let writer_file = write_yaml(&writer_cfg);

    let source = Arc::new(Source::new());
    let writer = Arc::new(Writer::new());
    let mut listeners = vec![
        CommandListener::start("inproc://op-cmd-source", Arc::clone(&source) as Arc<dyn Component>)
            .expect("source listener"),
        CommandListener::start("inproc://op-cmd-writer", Arc::clone(&writer) as Arc<dyn Component>)
            .expect("writer listener"),
    ];

    let operator = Operator::new();
    // Writers start first; sources carry the highest order so they arm
    // first (they bind) and stop first (they emit EOS).
    operator.register_component(entry("writer_0", "inproc://op-cmd-writer", 0, writer_file.path()));
    operator.register_component(entry("source_0", "inproc://op-cmd-source", 2, source_file.path()));

    // Phase 1: Configure.
    let job = operator.configure_all_async();
    let status = operator.wait_for_job(&job, PHASE_TIMEOUT).expect("job");
    assert_eq!(status.state, JobState::Completed, "{}", status.error_message);
    assert!(operator.is_all_in_state(ComponentState::Configured));

    // Phase 2: Arm; the barrier holds before any Start goes out.
    let job = operator.arm_all_async();
    let status = operator.wait_for_job(&job, PHASE_TIMEOUT).expect("job");
    assert_eq!(status.state, JobState::Completed, "{}", status.error_message);
    assert!(operator.is_all_in_state(ComponentState::Armed));
    assert_eq!(source.state(), ComponentState::Armed);
    assert_eq!(writer.state(), ComponentState::Armed);

    // Phase 3: Start run 42.
    let job = operator.start_all_async(42);
    let status = operator.wait_for_job(&job, PHASE_TIMEOUT).expect("job");
    assert_eq!(status.state, JobState::Completed, "{}", status.error_message);
    assert!(operator.is_all_in_state(ComponentState::Running));
    assert_eq!(source.status().run_number, 42);
    assert_eq!(writer.status().run_number, 42);

    std::thread::sleep(Duration::from_millis(200));

    // Graceful stop sweeps sources first, then the writer.
    let job = operator.stop_all_async(true);
    let status = operator.wait_for_job(&job, PHASE_TIMEOUT).expect("job");
    assert_eq!(status.state, JobState::Completed, "{}", status.error_message);
    assert!(operator.is_all_in_state(ComponentState::Configured));
    assert!(writer.has_received_eos(), "writer must see the EOS sentinel");

    // Status queries flow over the same command channel.
    let remote = operator
        .component_status("writer_0")
        .expect("writer status");
    assert_eq!(remote.state, ComponentState::Configured);
    assert!(remote.events_processed > 0);

    for listener in &mut listeners {
        listener.stop();
    }
}

#[test]
fn two_phase_start_helper_drives_all_phases() {
    let dir = tempfile::tempdir().expect("tempdir");

    let mut source_cfg = ComponentConfig::new("source_tp");
    source_cfg.output_address = Some("inproc://tp-data".into());
    source_cfg.output_pattern = SocketPattern::Push;
    source_cfg.mock_mode = true;
    let source_file = write_yaml(&source_cfg);

    let mut writer_cfg = ComponentConfig::new("writer_tp");
    writer_cfg.input_addresses = vec!["inproc://tp-data".into()];
    writer_cfg.input_pattern = SocketPattern::Pull;
    writer_cfg.output_dir = Some(dir.path().to_string_lossy().into_owned());
    let writer_file = write_yaml(&writer_cfg);

    let source = Arc::new(Source::new());
    let writer = Arc::new(Writer::new());
    let _listeners = [
        CommandListener::start("inproc://tp-cmd-source", Arc::clone(&source) as Arc<dyn Component>)
            .expect("source listener"),
        CommandListener::start("inproc://tp-cmd-writer", Arc::clone(&writer) as Arc<dyn Component>)
            .expect("writer listener"),
    ];

    let operator = Operator::new();
    operator.register_component(entry("writer_tp", "inproc://tp-cmd-writer", 0, writer_file.path()));
    operator.register_component(entry("source_tp", "inproc://tp-cmd-source", 2, source_file.path()));

    operator
        .run_two_phase_start(7, PHASE_TIMEOUT)
        .expect("two-phase start");
    assert_eq!(source.state(), ComponentState::Running);
    assert_eq!(writer.state(), ComponentState::Running);

    std::thread::sleep(Duration::from_millis(100));

    let job = operator.stop_all_async(true);
    let status = operator.wait_for_job(&job, PHASE_TIMEOUT).expect("job");
    assert_eq!(status.state, JobState::Completed, "{}", status.error_message);
}

#[test]
fn failing_component_fails_job_but_stop_continues() {
    let dir = tempfile::tempdir().expect("tempdir");

    let mut writer_cfg = ComponentConfig::new("writer_fail");
    writer_cfg.input_addresses = vec!["inproc://fail-data".into()];
    writer_cfg.input_pattern = SocketPattern::Pull;
    writer_cfg.output_dir = Some(dir.path().to_string_lossy().into_owned());
    let writer_file = write_yaml(&writer_cfg);

    let writer = Arc::new(Writer::new());
    let _listener = CommandListener::start("inproc://fail-cmd", Arc::clone(&writer) as Arc<dyn Component>)
        .expect("listener");

    let operator = Operator::new();
    operator.register_component(entry("writer_fail", "inproc://fail-cmd", 0, writer_file.path()));
    // A second component that is registered but has no listener at all.
    operator.register_component(ComponentEntry {
        component_id: "ghost".into(),
        command_address: "inproc://fail-ghost".into(),
        role: String::new(),
        start_order: 1,
        config_path: None,
    });

    let job = operator.configure_all_async();
    let status = operator.wait_for_job(&job, PHASE_TIMEOUT).expect("job");
    assert_eq!(status.state, JobState::Failed);
    assert!(status.error_message.contains("ghost"));

    // The healthy component configured before the failure was hit.
    assert_eq!(writer.state(), ComponentState::Configured);

    // A reset sweep keeps going past the dead component.
    let job = operator.reset_all_async();
    let status = operator.wait_for_job(&job, PHASE_TIMEOUT).expect("job");
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(writer.state(), ComponentState::Idle);

    let deadline = Instant::now() + Duration::from_secs(1);
    while writer.state() != ComponentState::Idle && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(writer.state(), ComponentState::Idle);
}
