//! Simulation harness for ulink integration tests
//!
//! Two link endpoints joined by an in-memory wire, running on virtual time.
//! Bytes travel instantly; when nothing is in flight the clock jumps to the
//! earliest pending timer. An optional bit-error rate corrupts bytes in
//! transit.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::rc::Rc;
use ulink_io::{ManualClock, ManualScheduler};
use ulink_protocol::{Link, LinkConfig, LinkEngine, PacketHandler, SeqNo, Tick, Transport};
use ulink_transfer::{TransferReceiver, TransferSender};

/// One direction of the simulated wire
#[derive(Clone, Default)]
pub struct Wire {
    buf: Rc<RefCell<Vec<u8>>>,
}

impl Wire {
    /// Take everything written so far
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buf.borrow_mut())
    }
}

impl Transport for Wire {
    fn transmit(&mut self, bytes: &[u8]) {
        self.buf.borrow_mut().extend_from_slice(bytes);
    }
}

/// Packet handler with its own timer
pub trait Endpoint: PacketHandler {
    fn tick(&mut self, link: &mut dyn Link);
}

impl Endpoint for TransferSender<ManualScheduler> {
    fn tick(&mut self, link: &mut dyn Link) {
        TransferSender::tick(self, link);
    }
}

impl Endpoint for TransferReceiver<ManualScheduler> {
    fn tick(&mut self, link: &mut dyn Link) {
        TransferReceiver::tick(self, link);
    }
}

/// Handler recording every link event
#[derive(Debug, Default)]
pub struct Collector {
    pub packets: Vec<(SeqNo, Bytes, bool)>,
    pub acks: Vec<(SeqNo, Bytes)>,
    pub timeouts: Vec<SeqNo>,
    pub garbage: usize,
    /// Answer synced packets with their payload reversed
    pub echo: bool,
}

impl PacketHandler for Collector {
    fn on_packet(&mut self, link: &mut dyn Link, seqno: SeqNo, payload: Bytes, synced: bool) {
        if synced && self.echo {
            let reply: Vec<u8> = payload.iter().rev().copied().collect();
            assert!(link.ack_reply(&reply).is_ok());
        }
        self.packets.push((seqno, payload, synced));
    }

    fn on_ack(&mut self, _link: &mut dyn Link, seqno: SeqNo, payload: Bytes) {
        self.acks.push((seqno, payload));
    }

    fn on_timeout(&mut self, _link: &mut dyn Link, seqno: SeqNo) {
        self.timeouts.push(seqno);
    }

    fn on_garbage(&mut self, _byte: u8) {
        self.garbage += 1;
    }
}

impl Endpoint for Collector {
    fn tick(&mut self, _link: &mut dyn Link) {}
}

/// A link engine, its handler, and both of their timers
pub struct Side<H> {
    pub engine: LinkEngine<Wire, ManualScheduler>,
    pub handler: H,
    engine_timer: ManualScheduler,
    handler_timer: ManualScheduler,
    outbox: Wire,
}

impl<H: Endpoint> Side<H> {
    pub fn new(
        clock: &ManualClock,
        config: LinkConfig,
        make_handler: impl FnOnce(ManualScheduler) -> H,
    ) -> Self {
        let outbox = Wire::default();
        let engine_timer = ManualScheduler::new(clock.clone());
        let handler_timer = ManualScheduler::new(clock.clone());
        Side {
            engine: LinkEngine::new(config, outbox.clone(), engine_timer.clone()),
            handler: make_handler(handler_timer.clone()),
            engine_timer,
            handler_timer,
            outbox,
        }
    }

    fn receive(&mut self, bytes: &[u8]) {
        self.engine.receive(bytes, &mut self.handler);
    }

    fn next_deadline(&self) -> Option<Tick> {
        match (self.engine_timer.deadline(), self.handler_timer.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn fire_due(&mut self) {
        if self.engine_timer.take_due() {
            self.engine.tick(&mut self.handler);
        }
        if self.handler_timer.take_due() {
            self.handler.tick(&mut self.engine);
        }
    }
}

/// Two sides joined by a wire
pub struct Simulation<A, B> {
    pub clock: ManualClock,
    pub a: Side<A>,
    pub b: Side<B>,
    noise: Option<(StdRng, f64)>,
    /// Bits flipped in transit
    pub flips: u64,
    /// Bytes carried in both directions
    pub carried: u64,
}

impl<A: Endpoint, B: Endpoint> Simulation<A, B> {
    pub fn new(
        config: LinkConfig,
        make_a: impl FnOnce(ManualScheduler) -> A,
        make_b: impl FnOnce(ManualScheduler) -> B,
    ) -> Self {
        let clock = ManualClock::new();
        Simulation {
            a: Side::new(&clock, config, make_a),
            b: Side::new(&clock, config, make_b),
            clock,
            noise: None,
            flips: 0,
            carried: 0,
        }
    }

    /// Flip one random bit in a byte with probability `rate`
    pub fn with_bit_errors(mut self, rate: f64, seed: u64) -> Self {
        self.noise = Some((StdRng::seed_from_u64(seed), rate));
        self
    }

    fn corrupt(&mut self, bytes: &mut [u8]) {
        if let Some((rng, rate)) = self.noise.as_mut() {
            for byte in bytes.iter_mut() {
                if rng.gen_bool(*rate) {
                    *byte ^= 1u8 << rng.gen_range(0..8u32);
                    self.flips += 1;
                }
            }
        }
    }

    /// Deliver bytes in flight; false when the wire was idle
    pub fn deliver(&mut self) -> bool {
        let mut ab = self.a.outbox.take();
        let mut ba = self.b.outbox.take();
        if ab.is_empty() && ba.is_empty() {
            return false;
        }
        self.carried += (ab.len() + ba.len()) as u64;
        self.corrupt(&mut ab);
        self.corrupt(&mut ba);
        self.b.receive(&ab);
        self.a.receive(&ba);
        true
    }

    /// Jump to the earliest timer and fire what is due; false when idle
    pub fn advance(&mut self) -> bool {
        let next = match (self.a.next_deadline(), self.b.next_deadline()) {
            (Some(a), Some(b)) => a.min(b),
            (Some(t), None) | (None, Some(t)) => t,
            (None, None) => return false,
        };
        self.clock.advance_to(next);
        self.a.fire_due();
        self.b.fire_due();
        true
    }

    /// Run until `done` holds, everything goes idle, or `limit` ticks pass
    ///
    /// Returns the final value of `done`.
    pub fn run_until(&mut self, limit: Tick, mut done: impl FnMut(&Self) -> bool) -> bool {
        loop {
            if done(self) {
                return true;
            }
            if self.deliver() {
                continue;
            }
            if self.clock.now() > limit || !self.advance() {
                return done(self);
            }
        }
    }

    /// Run until nothing is in flight and no timer is pending
    pub fn settle(&mut self, limit: Tick) {
        self.run_until(limit, |_| false);
    }
}
