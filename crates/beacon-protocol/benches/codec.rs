//! Codec benchmarks for beacon-protocol.

use beacon_protocol::{codec, Message};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn sample_message(body_len: usize) -> Message {
    Message::new()
        .with("type", "chat")
        .with("from", "user-42")
        .with("body", "x".repeat(body_len))
}

fn bench_encode_small(c: &mut Criterion) {
    let message = sample_message(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("small_64B", |b| {
        b.iter(|| codec::encode(black_box(&message)))
    });
    group.finish();
}

fn bench_decode_small(c: &mut Criterion) {
    let encoded = codec::encode(&sample_message(64)).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("small_64B", |b| {
        b.iter(|| codec::decode::<Message>(black_box(&encoded)))
    });
    group.finish();
}

fn bench_encode_large(c: &mut Criterion) {
    let message = sample_message(16 * 1024);

    c.bench_function("encode_16KB", |b| b.iter(|| codec::encode(black_box(&message))));
}

criterion_group!(
    benches,
    bench_encode_small,
    bench_decode_small,
    bench_encode_large
);
criterion_main!(benches);
