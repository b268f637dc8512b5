//! Codec benchmarks for huddle-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use huddle_protocol::{codec, ChatEvent, ServerFrame, WireFormat};

fn bench_encode_event(c: &mut Criterion) {
    let frame = ServerFrame::event(ChatEvent::msg("alice", "x".repeat(64)));

    let mut group = c.benchmark_group("encode_event");
    group.bench_function("json", |b| {
        b.iter(|| codec::encode(WireFormat::Json, black_box(&frame)))
    });
    group.bench_function("msgpack", |b| {
        b.iter(|| codec::encode(WireFormat::MsgPack, black_box(&frame)))
    });
    group.finish();
}

fn bench_decode_event(c: &mut Criterion) {
    let frame = ServerFrame::event(ChatEvent::msg("alice", "x".repeat(64)));
    let json = codec::encode(WireFormat::Json, &frame).unwrap();
    let msgpack = codec::encode(WireFormat::MsgPack, &frame).unwrap();

    let mut group = c.benchmark_group("decode_event");
    group.bench_function("json", |b| {
        b.iter(|| codec::decode::<ServerFrame>(WireFormat::Json, black_box(&json)))
    });
    group.bench_function("msgpack", |b| {
        b.iter(|| codec::decode::<ServerFrame>(WireFormat::MsgPack, black_box(&msgpack)))
    });
    group.finish();
}

fn bench_poll_batch(c: &mut Criterion) {
    let batch: Vec<ChatEvent> = (0..32)
        .map(|i| ChatEvent::msg(format!("user-{i}"), "hello"))
        .collect();

    c.bench_function("poll_batch_32_json", |b| {
        b.iter(|| codec::encode(WireFormat::Json, black_box(&batch)).unwrap())
    });
}

criterion_group!(benches, bench_encode_event, bench_decode_event, bench_poll_batch);
criterion_main!(benches);
