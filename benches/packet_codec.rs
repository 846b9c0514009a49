//! Benchmarks for packet export/import and batch framing
//!
//! Tests throughput for:
//! - Exporting and importing single records of every packet kind
//! - Encoding a full `getDevicePackets` response
//! - Client-side type selection over a batch
//!
//! Platform: Cross-platform (synthetic packets, CI-safe)

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use mooring::codec;
use mooring::filter::TypeSelection;
use mooring::test_utils::{fixture_packets, mixed_packets};
use mooring::transport::wire::{self, Value};
use mooring::types::{DevicePacketSet, TypeMask};
use std::hint::black_box;

fn bench_record_codec(c: &mut Criterion) {
    let packets = mixed_packets(4);
    let mut group = c.benchmark_group("record_codec");

    for packet in &packets {
        let record = codec::to_bytes(packet).unwrap();
        group.throughput(Throughput::Bytes(record.len() as u64));

        group.bench_with_input(BenchmarkId::new("export", packet.kind()), packet, |b, packet| {
            b.iter(|| black_box(codec::to_bytes(black_box(packet)).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("import", packet.kind()), &record, |b, record| {
            b.iter(|| black_box(codec::from_bytes(black_box(record)).unwrap()))
        });
    }

    group.finish();
}

fn bench_response_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_framing");

    for count in [10usize, 100, 1000] {
        let response = Ok(Value::PacketSet(DevicePacketSet::new(fixture_packets(count), true)));
        let encoded = wire::encode_response(&response).unwrap().freeze();
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("encode", count), &response, |b, response| {
            b.iter(|| black_box(wire::encode_response(black_box(response)).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("decode", count), &encoded, |b, encoded| {
            b.iter(|| black_box(wire::decode_response(encoded.clone()).unwrap()))
        });
    }

    group.finish();
}

fn bench_type_selection(c: &mut Criterion) {
    let packets = mixed_packets(1000);
    let mut group = c.benchmark_group("type_selection");
    group.throughput(Throughput::Elements(packets.len() as u64));

    group.bench_function("data_every_tenth", |b| {
        b.iter(|| {
            let mut selection = TypeSelection::new(TypeMask::SENSOR_DATA, 9).unwrap();
            black_box(selection.apply(packets.iter().cloned()).len())
        })
    });
    group.bench_function("all", |b| {
        b.iter(|| {
            let mut selection = TypeSelection::all();
            black_box(selection.apply(packets.iter().cloned()).len())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_record_codec, bench_response_framing, bench_type_selection);
criterion_main!(benches);
