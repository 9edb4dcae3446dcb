use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use squallstream::Packet;

fn bench_encode(c: &mut Criterion) {
    let packet = Packet::new(7, 42, 10, Bytes::from(vec![0xAB; 2048]));
    c.bench_function("packet_encode_framed_2k", |b| {
        b.iter(|| black_box(&packet).encode_framed())
    });
}

fn bench_decode(c: &mut Criterion) {
    let framed = Packet::new(7, 42, 10, Bytes::from(vec![0xAB; 2048])).encode_framed();
    c.bench_function("packet_decode_2k", |b| {
        b.iter(|| Packet::decode(black_box(&framed[4..])).unwrap())
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
