//! Synthetic packet streams for unit tests and benchmarks
//!
//! The fixture device is a CTD on source 1553 whose packets carry sequence
//! numbers from 100 and capture times 1000, 1050, 1100, ... ms.

#![cfg(any(test, feature = "benchmark"))]

use std::sync::Arc;

use crate::node::MemoryNode;
use crate::types::{Packet, Port};

pub const FIXTURE_SOURCE_ID: i64 = 1553;
pub const FIXTURE_FIRST_SEQUENCE: i64 = 100;
pub const FIXTURE_FIRST_TIME: i64 = 1000;
pub const FIXTURE_PERIOD_MILLIS: i64 = 50;

fn sample_text(i: i64) -> Vec<u8> {
    format!("{:.2},{:.3},{}", 12.0 + i as f64 * 0.01, 33.0 + i as f64 * 0.001, i).into_bytes()
}

/// `count` sensor-data packets from the fixture device.
pub fn fixture_packets(count: usize) -> Vec<Packet> {
    (0..count as i64)
        .map(|i| {
            Packet::sensor_data(
                FIXTURE_SOURCE_ID,
                FIXTURE_FIRST_TIME + FIXTURE_PERIOD_MILLIS * i,
                FIXTURE_FIRST_SEQUENCE + i,
                sample_text(i),
            )
        })
        .collect()
}

/// `count` packets cycling through every packet kind.
///
/// Every sample refers back to the most recent metadata packet.
pub fn mixed_packets(count: usize) -> Vec<Packet> {
    let mut last_metadata = 0;
    (0..count as i64)
        .map(|i| {
            let time = FIXTURE_FIRST_TIME + FIXTURE_PERIOD_MILLIS * i;
            let seq = FIXTURE_FIRST_SEQUENCE + i;
            match i % 4 {
                0 => {
                    last_metadata = seq;
                    Packet::metadata(
                        FIXTURE_SOURCE_ID,
                        time,
                        seq,
                        b"scheduled".to_vec(),
                        b"SBE37 baud=9600".to_vec(),
                    )
                }
                1 => Packet::sensor_data(FIXTURE_SOURCE_ID, time, seq, sample_text(i))
                    .with_metadata_ref(last_metadata),
                2 => Packet::device_message(
                    FIXTURE_SOURCE_ID,
                    time,
                    seq,
                    format!("sample {} ok", i).into_bytes(),
                ),
                _ => Packet::summary(FIXTURE_SOURCE_ID, time, seq, sample_text(i))
                    .with_metadata_ref(last_metadata),
            }
        })
        .collect()
}

pub fn fixture_port() -> Port {
    Port::new("ctd", FIXTURE_SOURCE_ID, "SeaBird37")
}

/// In-memory node "buoy-7" with the fixture port holding `packets`.
pub fn fixture_node(packets: Vec<Packet>) -> Arc<MemoryNode> {
    let node = Arc::new(MemoryNode::new("buoy-7", 42));
    node.add_port(fixture_port());
    for packet in packets {
        if let Err(e) = node.append(packet) {
            panic!("fixture packet rejected: {}", e);
        }
    }
    node
}
