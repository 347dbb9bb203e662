use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ulink_protocol::frame::{self, Frame, FrameKind, MAX_PAYLOAD};
use ulink_protocol::{Link, LinkConfig, LinkEngine, PacketHandler, Scheduler, SeqNo, Tick};

struct IdleScheduler;

impl Scheduler for IdleScheduler {
    fn now(&self) -> Tick {
        0
    }

    fn request_tick(&mut self, _delta: Tick) {}

    fn cancel_tick(&mut self) {}
}

struct Discard;

impl PacketHandler for Discard {
    fn on_packet(&mut self, _link: &mut dyn Link, _seqno: SeqNo, payload: Bytes, _synced: bool) {
        black_box(payload);
    }

    fn on_ack(&mut self, _link: &mut dyn Link, _seqno: SeqNo, _payload: Bytes) {}

    fn on_timeout(&mut self, _link: &mut dyn Link, _seqno: SeqNo) {}
}

fn bench_checksum(c: &mut Criterion) {
    let data = vec![0xA5u8; MAX_PAYLOAD];

    let mut group = c.benchmark_group("checksum");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("crc16_768", |b| {
        b.iter(|| black_box(frame::checksum(black_box(&data))));
    });
    group.finish();
}

fn bench_frame_encode(c: &mut Criterion) {
    let payload = vec![0u8; 250];
    let mut buf = BytesMut::with_capacity(frame::MAX_FRAME_SIZE);

    c.bench_function("frame_encode_250", |b| {
        b.iter(|| {
            buf.clear();
            frame::encode_into(FrameKind::Synced, SeqNo::new(5), black_box(&payload), &mut buf)
                .unwrap();
            black_box(&buf);
        });
    });
}

fn bench_frame_decode(c: &mut Criterion) {
    let frame = Frame::new(FrameKind::Unsynced, SeqNo::NONE, Bytes::from(vec![7u8; 250])).unwrap();
    let bytes = frame.to_bytes().unwrap();

    c.bench_function("frame_decode_250", |b| {
        b.iter(|| {
            let decoded = Frame::from_bytes(black_box(&bytes)).unwrap();
            black_box(decoded);
        });
    });
}

fn bench_engine_parse(c: &mut Criterion) {
    let mut stream = BytesMut::new();
    for _ in 0..64 {
        frame::encode_into(FrameKind::Unsynced, SeqNo::NONE, &[0x42; 250], &mut stream).unwrap();
    }
    let mut engine = LinkEngine::new(LinkConfig::default(), Vec::new(), IdleScheduler);
    let mut handler = Discard;

    let mut group = c.benchmark_group("engine");
    group.throughput(Throughput::Bytes(stream.len() as u64));
    group.bench_function("parse_64_frames", |b| {
        b.iter(|| engine.receive(black_box(&stream), &mut handler));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_checksum,
    bench_frame_encode,
    bench_frame_decode,
    bench_engine_parse
);
criterion_main!(benches);
