use criterion::{black_box, criterion_group, criterion_main, Criterion};

use vban_bridge::audio::JitterBuffer;
use vban_bridge::protocol::{decode_header, encode_packet, VbanHeader};

fn header_codec(c: &mut Criterion) {
    let header = VbanHeader::audio("Stream1", 48000, 256, 2, 42).unwrap();
    let packet = encode_packet(&header, &[0u8; 1024]).unwrap();

    c.bench_function("decode_header", |b| {
        b.iter(|| decode_header(black_box(&packet)).unwrap())
    });
    c.bench_function("encode_packet_1024", |b| {
        b.iter(|| encode_packet(black_box(&header), black_box(&[0u8; 1024])).unwrap())
    });
}

fn jitter_buffer(c: &mut Criterion) {
    let buffer = JitterBuffer::with_thresholds(3840, 7680, 3840).unwrap();
    let payload = [1u8; 1024];

    // Steady state: ~3.75 packets in per frame out
    c.bench_function("push4_pop1", |b| {
        b.iter(|| {
            for _ in 0..4 {
                buffer.push(black_box(&payload));
            }
            black_box(buffer.pop_frame(3840))
        })
    });
}

criterion_group!(benches, header_codec, jitter_buffer);
criterion_main!(benches);
