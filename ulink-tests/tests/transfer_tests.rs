//! End-to-end file transfers between a sender and a receiver

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ulink::io::ManualScheduler;
use ulink::transfer::{ChunkWindow, MemoryStream, ReceiverState, SenderState, TransferStream};
use ulink::{LinkConfig, TransferParams, TransferReceiver, TransferSender, TransferStatus};
use ulink_tests::Simulation;

type Transfer = Simulation<TransferSender<ManualScheduler>, TransferReceiver<ManualScheduler>>;

fn random_data(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

fn transfer(
    config: LinkConfig,
    proposal: TransferParams,
    data: Vec<u8>,
) -> (Transfer, MemoryStream) {
    let sink = MemoryStream::new();
    let out = sink.clone();
    let sim = Simulation::new(
        config,
        move |t| TransferSender::new(proposal, MemoryStream::with_data(data), t),
        move |t| TransferReceiver::new(TransferParams::default(), out, t),
    );
    (sim, sink)
}

fn both_finished(sim: &Transfer) -> bool {
    sim.a.handler.state() == SenderState::Finished
        && sim.b.handler.state() == ReceiverState::Finished
}

#[test]
fn test_small_transfer_clean_link() {
    let data = random_data(1000, 1);
    let (mut sim, sink) = transfer(LinkConfig::default(), TransferParams::default(), data.clone());

    let len = data.len() as u64;
    sim.a.handler.start(&mut sim.a.engine, len, Some("small.bin")).unwrap();
    assert!(sim.run_until(1_000_000, both_finished));

    assert_eq!(sink.data(), data);
    assert_eq!(sink.name().as_deref(), Some("small.bin"));
    assert_eq!(sim.a.handler.outcome(), Some(TransferStatus::Finished));
    assert_eq!(sim.b.handler.outcome(), Some(TransferStatus::Finished));
    assert_eq!(sim.a.handler.acked_bytes(), len);

    // 1000 bytes in 250-byte chunks, nothing lost
    assert_eq!(sim.b.handler.stats().chunks_stored, 4);
    assert_eq!(sim.a.handler.stats().chunks_resent, 0);
    assert_eq!(sim.b.handler.stats().duplicates, 0);
}

#[test]
fn test_zero_length_transfer() {
    let (mut sim, sink) = transfer(LinkConfig::default(), TransferParams::default(), Vec::new());

    sim.a.handler.start(&mut sim.a.engine, 0, Some("empty")).unwrap();
    assert!(sim.run_until(1_000_000, both_finished));

    assert!(sink.is_empty());
    assert_eq!(sink.name().as_deref(), Some("empty"));
    assert_eq!(sim.a.handler.stats().chunks_sent, 0);
}

#[test]
fn test_negotiated_parameters() {
    let data = random_data(600, 2);
    let (mut sim, _sink) = transfer(
        LinkConfig::default(),
        TransferParams::new(0, 0, 20),
        data.clone(),
    );

    sim.a.handler.start(&mut sim.a.engine, data.len() as u64, None).unwrap();
    assert!(sim.run_until(1_000_000, |s| s.a.handler.params().is_some()));

    let expected = TransferParams::new(250, 7, 10);
    assert_eq!(sim.a.handler.params(), Some(expected));
    assert_eq!(sim.b.handler.params(), Some(expected));
    assert_eq!(sim.a.handler.session_id(), sim.b.handler.session_id());
}

#[test]
fn test_window_slides_over_held_chunks() {
    let mut window = ChunkWindow::from_parts(5, 0b101);
    assert!(window.accept(5).is_new());
    assert_eq!(window.base(), 7);
    assert_eq!(window.mask(), 0b1);
}

#[test]
fn test_noisy_transfer_small_chunks() {
    let data = random_data(32_000, 3);
    let config = LinkConfig {
        // resync a stalled parser before the request retries run out
        rx_timeout: 200,
        ..LinkConfig::default()
    };
    let (sim, sink) = transfer(config, TransferParams::new(7, 0, 0), data.clone());
    let mut sim = sim.with_bit_errors(0.001, 0xF11E);

    sim.a.handler.start(&mut sim.a.engine, data.len() as u64, Some("noisy")).unwrap();
    assert!(
        sim.run_until(50_000_000, both_finished),
        "sender {:?}, receiver {:?}",
        sim.a.handler.state(),
        sim.b.handler.state()
    );

    assert_eq!(sim.a.handler.params().map(|p| p.mtu), Some(7));
    assert_eq!(sink.len(), data.len());
    assert!(sink.data() == data, "received data differs");
    assert!(sim.flips > 0);
    assert_eq!(sim.b.handler.stats().bytes_stored, data.len() as u64);
}

#[test]
fn test_second_transfer_after_finish() {
    let first = random_data(300, 4);
    let (mut sim, sink) = transfer(LinkConfig::default(), TransferParams::default(), first.clone());

    sim.a.handler.start(&mut sim.a.engine, 300, None).unwrap();
    assert!(sim.run_until(1_000_000, both_finished));
    let first_session = sim.b.handler.session_id();

    // the same source again, as a new session
    sim.a.handler.start(&mut sim.a.engine, 300, Some("again")).unwrap();
    assert_eq!(sim.a.handler.state(), SenderState::Requesting);
    assert!(sim.run_until(2_000_000, both_finished));

    assert_eq!(sink.data(), first);
    assert_eq!(sink.name().as_deref(), Some("again"));
    assert!(sim.b.handler.session_id().is_some());
    assert!(first_session.is_some());
}

/// Sink whose writes start failing after a few chunks
struct FailingSink {
    inner: MemoryStream,
    writes_left: u32,
}

impl TransferStream for FailingSink {
    fn create_data(&mut self, length: u64, name: Option<&str>) -> bool {
        self.inner.create_data(length, name)
    }

    fn write_data(&mut self, offset: u64, data: &[u8]) -> bool {
        if self.writes_left == 0 {
            return false;
        }
        self.writes_left -= 1;
        self.inner.write_data(offset, data)
    }
}

#[test]
fn test_write_failure_aborts_both_sides() {
    let data = random_data(2000, 5);
    let len = data.len() as u64;
    let sink = FailingSink {
        inner: MemoryStream::new(),
        writes_left: 3,
    };
    let mut sim: Transfer = Simulation::new(
        LinkConfig::default(),
        move |t| TransferSender::new(TransferParams::default(), MemoryStream::with_data(data), t),
        move |t| TransferReceiver::new(TransferParams::default(), sink, t),
    );

    sim.a.handler.start(&mut sim.a.engine, len, None).unwrap();
    assert!(
        sim.run_until(1_000_000, |s| s.a.handler.state() == SenderState::Aborted),
        "sender {:?}",
        sim.a.handler.state()
    );
    sim.settle(2_000_000);

    assert_eq!(sim.a.handler.outcome(), Some(TransferStatus::Abort));
    assert_eq!(sim.b.handler.state(), ReceiverState::Aborted);
    assert_eq!(sim.b.handler.outcome(), Some(TransferStatus::Abort));
    assert_eq!(sim.b.handler.stats().chunks_stored, 3);
    // nothing left running once the abort was acknowledged
    assert!(sim.clock.now() < 1_000_000);
}
