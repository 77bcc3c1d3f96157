use std::hint::black_box;

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput};
use libmqtt::network::application::mqtt::packet::{self, FrameCodec};
use tokio_util::codec::Decoder;

const TOPIC: &str = "libmqtt/bench-topic";
const PAYLOAD_SIZES: [usize; 3] = [16, 1024, 64 * 1024];

pub fn bench_encode_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_publish");
    for size in PAYLOAD_SIZES {
        let payload = vec![0x5a; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| packet::encode_publish(black_box(TOPIC), black_box(payload)).unwrap())
        });
    }
    group.finish();
}

pub fn bench_decode_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_publish");
    for size in PAYLOAD_SIZES {
        let publish = packet::encode_publish(TOPIC, &vec![0x5a; size]).unwrap();
        group.throughput(Throughput::Bytes(publish.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &publish, |b, publish| {
            b.iter(|| packet::decode_publish(black_box(publish)).unwrap())
        });
    }
    group.finish();
}

/// Split a buffer of 50 coalesced publishes and pings, as a busy read would see it.
pub fn bench_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");
    let payload = b"hello world from bench";
    let mut wire = BytesMut::new();
    for _ in 0..50 {
        wire.extend_from_slice(&packet::encode_publish(TOPIC, payload).unwrap());
        wire.extend_from_slice(&packet::encode_pingresp());
    }
    group.throughput(Throughput::Bytes(wire.len() as u64));

    group.bench_function("coalesced_50", |b| {
        b.iter_batched_ref(
            || (FrameCodec::default(), wire.clone()),
            |(codec, src)| {
                let mut frames = 0;
                while let Some(frame) = codec.decode(src).unwrap() {
                    black_box(frame);
                    frames += 1;
                }
                assert_eq!(frames, 100);
            },
            criterion::BatchSize::SmallInput,
        )
    });
    group.finish();
}
