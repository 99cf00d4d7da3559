use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serial_bridge_core::contracts::MAX_FRAME_LEN;
use serial_bridge_core::crc;
use serial_bridge_core::receiver::Receiver;
use serial_bridge_core::ring_buffer::RingBuffer;
use serial_bridge_core::transmitter::Transmitter;
use serial_bridge_core::{Command, MAX_PUBLISH_CHUNK};

fn full_chunk() -> [u8; MAX_PUBLISH_CHUNK] {
    let mut chunk = [0u8; MAX_PUBLISH_CHUNK];
    for (i, byte) in chunk.iter_mut().enumerate() {
        *byte = (i * 31) as u8;
    }
    chunk
}

fn benchmark_encode(c: &mut Criterion) {
    let chunk = full_chunk();
    let mut wire = [0u8; MAX_FRAME_LEN];

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(chunk.len() as u64));
    group.bench_function("publish_full_chunk", |b| {
        b.iter(|| {
            Transmitter::encode(Command::Publish.with_flag(true), black_box(&chunk), &mut wire)
        });
    });
    group.finish();
}

fn benchmark_parse(c: &mut Criterion) {
    let chunk = full_chunk();
    let mut wire = [0u8; MAX_FRAME_LEN];
    let len = Transmitter::encode(Command::Publish.with_flag(false), &chunk, &mut wire).unwrap();
    let mut parser = Receiver::new();

    let mut group = c.benchmark_group("parse");
    group.throughput(Throughput::Bytes(len as u64));
    group.bench_function("publish_full_chunk", |b| {
        b.iter(|| {
            let mut delivered = 0;
            for &byte in black_box(&wire[..len]) {
                if let Ok(Some(frame)) = parser.push(byte) {
                    delivered = frame.payload.len();
                }
            }
            delivered
        });
    });
    group.finish();
}

fn benchmark_crc(c: &mut Criterion) {
    let chunk = full_chunk();
    c.bench_function("crc32_full_chunk", |b| {
        b.iter(|| crc::checksum(black_box(&chunk)));
    });
}

fn benchmark_ring(c: &mut Criterion) {
    let chunk = full_chunk();
    let mut ring: RingBuffer = RingBuffer::new();
    let mut out = [0u8; MAX_PUBLISH_CHUNK];

    c.bench_function("ring_commit_and_drain", |b| {
        b.iter(|| {
            ring.write_all(black_box(&chunk)).unwrap();
            ring.read_into(&mut out)
        });
    });
}

criterion_group!(
    benches,
    benchmark_encode,
    benchmark_parse,
    benchmark_crc,
    benchmark_ring
);
criterion_main!(benches);
