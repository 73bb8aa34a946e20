// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Gap detection across an in-process transport link.

use daqflow::codec::FrameCodec;
use daqflow::record::MinimalEventRecord;
use daqflow::seqgap::{GapInfo, SeqCheck, SequenceGapDetector};
use daqflow::transport::{SocketPattern, Transport, TransportConfig};
use std::time::Duration;

fn records() -> Vec<MinimalEventRecord> {
    vec![MinimalEventRecord::new(0, 0, 1.0, 100, 50, 0)]
}

#[test]
fn dropped_frame_detected_across_transport() {
    let mut sender = Transport::new();
    sender
        .configure(TransportConfig::data_only(
            "inproc://gap-link",
            SocketPattern::Push,
        ))
        .expect("configure sender");
    sender.connect().expect("connect sender");

    let mut receiver = Transport::new();
    receiver
        .configure(TransportConfig {
            receive_timeout: Duration::from_millis(300),
            ..TransportConfig::data_only("inproc://gap-link", SocketPattern::Pull)
        })
        .expect("configure receiver");
    receiver.connect().expect("connect receiver");

    // Auto-sequence three frames; frame 2 is "lost" before the wire.
    let mut codec = FrameCodec::new();
    codec.enable_compression(false);
    let frame0 = codec.encode_minimal_auto(&records());
    let frame1 = codec.encode_minimal_auto(&records());
    let _dropped = codec.encode_minimal_auto(&records());
    let frame3 = codec.encode_minimal_auto(&records());

    assert!(sender.send_bytes(frame0));
    assert!(sender.send_bytes(frame1));
    assert!(sender.send_bytes(frame3));

    let decoder = FrameCodec::new();
    let mut detector = SequenceGapDetector::new();
    let mut results = Vec::new();
    for _ in 0..3 {
        let buf = receiver.receive_bytes().expect("frame arrives");
        let (_, sequence) = decoder.decode(&buf).expect("decode");
        results.push(detector.check(sequence));
    }

    assert_eq!(results, vec![SeqCheck::Ok, SeqCheck::Ok, SeqCheck::Gap]);
    assert_eq!(detector.gap_count(), 1);
    assert_eq!(
        detector.last_gap(),
        Some(GapInfo {
            expected: 2,
            received: 3,
            dropped_count: 1
        })
    );
}

#[test]
fn continuous_stream_has_no_gaps_across_transport() {
    let mut sender = Transport::new();
    sender
        .configure(TransportConfig::data_only(
            "inproc://gap-clean",
            SocketPattern::Push,
        ))
        .expect("configure sender");
    sender.connect().expect("connect sender");

    let mut receiver = Transport::new();
    receiver
        .configure(TransportConfig {
            receive_timeout: Duration::from_millis(300),
            ..TransportConfig::data_only("inproc://gap-clean", SocketPattern::Pull)
        })
        .expect("configure receiver");
    receiver.connect().expect("connect receiver");

    let codec = FrameCodec::new();
    for _ in 0..20 {
        assert!(sender.send_bytes(codec.encode_minimal_auto(&records())));
    }

    let decoder = FrameCodec::new();
    let mut detector = SequenceGapDetector::new();
    for _ in 0..20 {
        let buf = receiver.receive_bytes().expect("frame arrives");
        let (_, sequence) = decoder.decode(&buf).expect("decode");
        assert_eq!(detector.check(sequence), SeqCheck::Ok);
    }
    assert_eq!(detector.gap_count(), 0);
}
