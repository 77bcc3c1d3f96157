use criterion::{criterion_group, criterion_main};


criterion_group!(
    benches,
    network::application::mqtt::packet::bench_encode_publish,
    network::application::mqtt::packet::bench_decode_publish,
    network::application::mqtt::packet::bench_frame_decode
);
criterion_main!(benches);
