use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;

use bytes::BytesMut;
use fanout::core::{dispatch_at, parse};
use fanout::net::frame::{encode_frame, try_decode_frame, Frame, DEFAULT_MAX_FRAME_BYTES};

const NOW: u64 = 1_700_000_000;

fn bench_parse_dispatch(c: &mut Criterion) {
    let requests = [
        "ping",
        "announce kittens!a kitten was sighted",
        "announce !missing topic",
        "what is this",
    ];

    let mut group = c.benchmark_group("parse_dispatch");
    group.throughput(Throughput::Elements(requests.len() as u64));
    group.bench_function("mixed", |b| {
        b.iter(|| {
            for raw in requests {
                black_box(dispatch_at(parse(black_box(raw)), NOW));
            }
        })
    });
    group.finish();
}

fn bench_frame_codec(c: &mut Criterion) {
    let frame = Frame::topic_message("kittens", &"x".repeat(256));
    let mut encoded = BytesMut::new();
    encode_frame(&frame, &mut encoded, DEFAULT_MAX_FRAME_BYTES).unwrap();

    let mut group = c.benchmark_group("frame_codec");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("encode", |b| {
        let mut buf = BytesMut::with_capacity(encoded.len());
        b.iter(|| {
            buf.clear();
            encode_frame(black_box(&frame), &mut buf, DEFAULT_MAX_FRAME_BYTES).unwrap();
        })
    });
    group.bench_function("decode", |b| {
        b.iter(|| {
            let mut buf = encoded.clone();
            black_box(try_decode_frame(&mut buf, DEFAULT_MAX_FRAME_BYTES).unwrap());
        })
    });
    group.finish();
}

criterion_group!(benches, bench_parse_dispatch, bench_frame_codec);
criterion_main!(benches);
