// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Three mock sources through a simple merger into a file writer.

use daqflow::component::{Component, SimpleMerger, Source, Writer};
use daqflow::config::ComponentConfig;
use daqflow::record::MINIMAL_RECORD_SIZE;
use daqflow::transport::SocketPattern;
use std::time::{Duration, Instant};

fn source_config(name: &str, output: &str) -> ComponentConfig {
    let mut config = ComponentConfig::new(name);
    config.output_address = Some(output.to_string());
    config.output_pattern = SocketPattern::Push;
    config.mock_mode = true;
    config.mock_event_rate = 2_000;
    config
}

fn merger_config(name: &str, inputs: &[String], output: &str) -> ComponentConfig {
    let mut config = ComponentConfig::new(name);
    config.input_addresses = inputs.to_vec();
    config.input_pattern = SocketPattern::Pull;
    config.output_address = Some(output.to_string());
    config.output_pattern = SocketPattern::Push;
    config
}

fn writer_config(name: &str, input: &str, dir: &std::path::Path) -> ComponentConfig {
    let mut config = ComponentConfig::new(name);
    config.input_addresses = vec![input.to_string()];
    config.input_pattern = SocketPattern::Pull;
    config.output_dir = Some(dir.to_string_lossy().into_owned());
    config
}

#[test]
fn three_sources_merge_into_one_run_file() {
    let dir = tempfile::tempdir().expect("tempdir");

    let inputs: Vec<String> = (0..3).map(|i| format!("inproc://m3-src-{i}")).collect();
    let sources: Vec<Source> = (0..3).map(|_| Source::new()).collect();
    for (i, source) in sources.iter().enumerate() {
        source
            .configure(source_config(&format!("source_{i}"), &inputs[i]))
            .expect("configure source");
    }

    let merger = SimpleMerger::new();
    merger
        .configure(merger_config("merger_0", &inputs, "inproc://m3-out"))
        .expect("configure merger");

    let writer = Writer::new();
    writer
        .configure(writer_config("writer_0", "inproc://m3-out", dir.path()))
        .expect("configure writer");

    // Arm binders before their consumers: sources, then the merger
    // (binds its output, connects its inputs), then the writer.
    for source in &sources {
        source.arm().expect("arm source");
    }
    merger.arm().expect("arm merger");
    writer.arm().expect("arm writer");

    // Start consumers first, producers last.
    writer.start(5).expect("start writer");
    merger.start(5).expect("start merger");
    for source in &sources {
        source.start(5).expect("start source");
    }

    std::thread::sleep(Duration::from_millis(250));

    // Graceful stop, upstream to downstream.
    for source in &sources {
        source.stop(true).expect("stop source");
    }
    let total_sent: u64 = sources.iter().map(|s| s.status().events_processed).sum();

    merger.stop(true).expect("stop merger");
    assert!(merger.has_forwarded_eos(), "merger must forward one EOS");
    assert_eq!(merger.status().events_processed, total_sent);

    let deadline = Instant::now() + Duration::from_secs(2);
    while !writer.has_received_eos() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(writer.has_received_eos());

    let run_file = writer.current_file().expect("run file");
    writer.stop(true).expect("stop writer");

    assert!(total_sent > 0, "sources produced nothing");
    assert_eq!(writer.status().events_processed, total_sent);

    let data = std::fs::read(&run_file).expect("read run file");
    assert_eq!(data.len() as u64, total_sent * MINIMAL_RECORD_SIZE as u64);
}
