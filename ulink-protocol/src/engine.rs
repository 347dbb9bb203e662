//! Link Engine
//!
//! Byte-driven state machine implementing the link protocol: incremental
//! frame parsing with checksum verification, a single outstanding synced
//! frame per direction with retransmission, piggybacked acknowledgements and
//! NACK-triggered fast resend.
//!
//! The engine never blocks and is not internally synchronized. Callers must
//! serialize `receive`, `tick`, `send` and `ack_reply` for one engine.

use crate::config::LinkConfig;
use crate::frame::{
    self, FrameKind, Header, NackReason, CRC16, MAX_FRAME_SIZE, MAX_PAYLOAD, PREAMBLE,
};
use crate::link::{Link, LinkError, PacketHandler, Scheduler, Transport};
use crate::sequence::SeqNo;
use crate::timer::{Tick, TimerAction, TimerCoordinator, TimerKind};
use bytes::{Bytes, BytesMut};
use crc::Digest;

/// Receive parser state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    /// Waiting for a frame to start
    ExpectPreamble,
    /// Inside garbage, waiting for a preamble to resynchronize
    NotPreamble,
    ExpectHeaderHi,
    ExpectHeaderLo,
    Data,
    CrcHi,
    CrcLo,
}

/// Link statistics
#[derive(Debug, Clone, Default)]
pub struct LinkStats {
    /// Frames written, including acks, NACKs and retransmissions
    pub frames_sent: u64,
    /// Frames received with a valid checksum
    pub frames_received: u64,
    /// Bytes written to the transport
    pub bytes_sent: u64,
    /// Bytes fed to the parser
    pub bytes_received: u64,
    /// Synced frames sent again after a timeout or NACK
    pub retransmits: u64,
    /// Synced frames abandoned after all retries
    pub send_timeouts: u64,
    /// Frames dropped for a checksum mismatch
    pub checksum_errors: u64,
    /// Frames abandoned half way
    pub frame_timeouts: u64,
    pub nacks_sent: u64,
    pub nacks_received: u64,
    /// Duplicate synced frames answered from the ack cache
    pub duplicates: u64,
    /// Bytes received outside any frame
    pub garbage_bytes: u64,
}

/// Link protocol engine
pub struct LinkEngine<T: Transport, S: Scheduler> {
    config: LinkConfig,
    transport: T,
    scheduler: S,
    timers: TimerCoordinator,

    rx_state: RxState,
    rx_header: Header,
    rx_len: usize,
    rx_payload: BytesMut,
    rx_digest: Digest<'static, u16>,
    rx_crc: u16,

    tx_seqno: SeqNo,
    awaiting_ack: bool,
    retry: u8,
    tx_payload: Bytes,
    /// Last acknowledgement sent, replayed for duplicate synced frames
    ack_cache: Option<(SeqNo, Bytes)>,
    /// Synced frame being handled that has not been acknowledged yet
    pending_ack: Option<SeqNo>,
    scratch: BytesMut,

    stats: LinkStats,
}

impl<T: Transport, S: Scheduler> LinkEngine<T, S> {
    /// Create an engine writing to `transport` and timing with `scheduler`
    pub fn new(config: LinkConfig, transport: T, scheduler: S) -> Self {
        LinkEngine {
            config,
            transport,
            scheduler,
            timers: TimerCoordinator::new(),
            rx_state: RxState::ExpectPreamble,
            rx_header: Header::from_byte(0),
            rx_len: 0,
            rx_payload: BytesMut::with_capacity(MAX_PAYLOAD),
            rx_digest: CRC16.digest(),
            rx_crc: 0,
            tx_seqno: SeqNo::FIRST,
            awaiting_ack: false,
            retry: 0,
            tx_payload: Bytes::new(),
            ack_cache: None,
            pending_ack: None,
            scratch: BytesMut::with_capacity(MAX_FRAME_SIZE),
            stats: LinkStats::default(),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn rx_state(&self) -> RxState {
        self.rx_state
    }

    /// Sequence number of the next (or outstanding) synced frame
    pub fn tx_seqno(&self) -> SeqNo {
        self.tx_seqno
    }

    pub fn timers(&self) -> &TimerCoordinator {
        &self.timers
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    /// Feed received bytes to the parser
    pub fn receive<H: PacketHandler + ?Sized>(&mut self, bytes: &[u8], handler: &mut H) {
        for &byte in bytes {
            self.receive_byte(byte, handler);
        }
    }

    /// Feed one received byte to the parser
    pub fn receive_byte<H: PacketHandler + ?Sized>(&mut self, byte: u8, handler: &mut H) {
        self.stats.bytes_received += 1;

        match self.rx_state {
            RxState::ExpectPreamble => {
                if byte == PREAMBLE {
                    self.start_frame();
                } else {
                    self.stats.garbage_bytes += 1;
                    self.rx_state = RxState::NotPreamble;
                    handler.on_garbage(byte);
                }
            }
            RxState::NotPreamble => {
                if byte == PREAMBLE {
                    if self.config.nack_garbage {
                        self.send_nack(NackReason::NotPreamble, SeqNo::NONE);
                    }
                    self.start_frame();
                } else {
                    self.stats.garbage_bytes += 1;
                    handler.on_garbage(byte);
                }
            }
            RxState::ExpectHeaderHi => {
                self.rx_header = Header::from_byte(byte);
                self.rx_digest = CRC16.digest();
                self.rx_digest.update(&[byte]);
                self.rx_payload.clear();
                self.rx_len = 0;
                self.rx_state = if self.rx_header.has_length() {
                    RxState::ExpectHeaderLo
                } else {
                    RxState::CrcHi
                };
            }
            RxState::ExpectHeaderLo => {
                self.rx_len = frame::payload_len(self.rx_header.selector, byte);
                self.rx_digest.update(&[byte]);
                self.rx_state = RxState::Data;
            }
            RxState::Data => {
                self.rx_payload.extend_from_slice(&[byte]);
                self.rx_digest.update(&[byte]);
                if self.rx_payload.len() >= self.rx_len {
                    self.rx_state = RxState::CrcHi;
                }
            }
            RxState::CrcHi => {
                self.rx_crc = (byte as u16) << 8;
                self.rx_state = RxState::CrcLo;
            }
            RxState::CrcLo => {
                self.rx_crc |= byte as u16;
                self.rx_state = RxState::ExpectPreamble;
                self.cancel_timer(TimerKind::Frame);
                self.finish_frame(handler);
            }
        }
    }

    /// Run expired timers; called when the scheduler's requested tick fires
    pub fn tick<H: PacketHandler + ?Sized>(&mut self, handler: &mut H) {
        let now = self.scheduler.now();
        let expired = self.timers.fire(now);

        if expired.frame {
            self.frame_timeout();
        }
        if expired.ack_retry {
            self.ack_timeout(handler);
        }

        let action = self.timers.reschedule(self.scheduler.now());
        self.apply(action);
    }

    fn start_frame(&mut self) {
        self.rx_header = Header::from_byte(0);
        self.arm_timer(TimerKind::Frame, self.config.rx_timeout);
        self.rx_state = RxState::ExpectHeaderHi;
    }

    fn finish_frame<H: PacketHandler + ?Sized>(&mut self, handler: &mut H) {
        let digest = std::mem::replace(&mut self.rx_digest, CRC16.digest());
        let computed = digest.finalize();
        let header = self.rx_header;

        if computed != self.rx_crc {
            self.stats.checksum_errors += 1;
            tracing::debug!(
                "RX: bad checksum seq {} (got {:#06x}, want {:#06x})",
                header.seqno,
                self.rx_crc,
                computed
            );
            self.send_nack(NackReason::BadChecksum, header.seqno);
            return;
        }

        self.stats.frames_received += 1;
        let payload = self.rx_payload.split().freeze();
        tracing::trace!(
            "RX: {:?} seq {} len {}",
            header.kind,
            header.seqno,
            payload.len()
        );
        self.dispatch(header.kind, header.seqno, payload, handler);
    }

    fn dispatch<H: PacketHandler + ?Sized>(
        &mut self,
        kind: FrameKind,
        seqno: SeqNo,
        payload: Bytes,
        handler: &mut H,
    ) {
        match kind {
            FrameKind::Ack => {
                if self.awaiting_ack && seqno == self.tx_seqno {
                    self.cancel_timer(TimerKind::AckRetry);
                    self.awaiting_ack = false;
                    self.tx_payload = Bytes::new();
                    self.tx_seqno.increment();
                    handler.on_ack(self, seqno, payload);
                } else {
                    tracing::trace!("RX: ack for unknown seq {}", seqno);
                }
            }
            FrameKind::Nack => {
                self.stats.nacks_received += 1;
                let reason = payload.first().copied().and_then(NackReason::from_u8);
                match reason {
                    Some(reason)
                        if self.awaiting_ack
                            && seqno == self.tx_seqno
                            && reason.triggers_resend() =>
                    {
                        tracing::debug!("RX: NACK seq {} ({:?}), resending", seqno, reason);
                        self.cancel_timer(TimerKind::AckRetry);
                        self.stats.retransmits += 1;
                        self.transmit_outstanding();
                        self.retry = 0;
                        self.arm_timer(TimerKind::AckRetry, self.config.backoff.delay(0));
                    }
                    _ => {
                        tracing::debug!("RX: NACK seq {} ({:?}) ignored", seqno, reason);
                    }
                }
            }
            FrameKind::Unsynced | FrameKind::Synced => {
                let synced = kind == FrameKind::Synced;
                let cached = match &self.ack_cache {
                    Some((cached_seq, cached_payload)) if synced && *cached_seq == seqno => {
                        Some(cached_payload.clone())
                    }
                    _ => None,
                };

                if let Some(cached_payload) = cached {
                    self.stats.duplicates += 1;
                    tracing::debug!("RX: duplicate seq {}, re-acking", seqno);
                    self.transmit_frame(FrameKind::Ack, seqno, &cached_payload);
                    return;
                }

                self.pending_ack = synced.then_some(seqno);
                handler.on_packet(self, seqno, payload, synced);
                if let Some(seqno) = self.pending_ack.take() {
                    self.ack_cache = Some((seqno, Bytes::new()));
                    self.transmit_frame(FrameKind::Ack, seqno, &[]);
                }
            }
        }
    }

    fn frame_timeout(&mut self) {
        self.stats.frame_timeouts += 1;
        let seqno = self.rx_header.seqno;
        tracing::debug!("RX: frame timeout seq {} in {:?}", seqno, self.rx_state);
        self.send_nack(NackReason::FrameTimeout, seqno);
        self.rx_payload.clear();
        self.rx_state = RxState::ExpectPreamble;
    }

    fn ack_timeout<H: PacketHandler + ?Sized>(&mut self, handler: &mut H) {
        if !self.awaiting_ack {
            return;
        }

        self.retry = self.retry.saturating_add(1);
        if self.retry > self.config.retries {
            let seqno = self.tx_seqno;
            tracing::warn!("TX: no ack for seq {} after {} retries", seqno, self.config.retries);
            self.stats.send_timeouts += 1;
            self.tx_seqno.increment();
            self.retry = 0;
            self.awaiting_ack = false;
            self.tx_payload = Bytes::new();
            handler.on_timeout(self, seqno);
        } else {
            tracing::debug!("TX: no ack, resending seq {} (#{})", self.tx_seqno, self.retry);
            self.stats.retransmits += 1;
            self.transmit_outstanding();
            self.arm_timer(TimerKind::AckRetry, self.config.backoff.delay(self.retry));
        }
    }

    fn transmit_outstanding(&mut self) {
        let payload = self.tx_payload.clone();
        self.transmit_frame(FrameKind::Synced, self.tx_seqno, &payload);
    }

    fn send_nack(&mut self, reason: NackReason, seqno: SeqNo) {
        self.stats.nacks_sent += 1;
        self.transmit_frame(FrameKind::Nack, seqno, &[reason.as_u8()]);
    }

    fn transmit_frame(&mut self, kind: FrameKind, seqno: SeqNo, payload: &[u8]) {
        self.scratch.clear();
        if let Err(e) = frame::encode_into(kind, seqno, payload, &mut self.scratch) {
            tracing::warn!("TX: dropping {:?} seq {}: {}", kind, seqno, e);
            return;
        }
        tracing::trace!("TX: {:?} seq {} len {}", kind, seqno, payload.len());
        self.stats.frames_sent += 1;
        self.stats.bytes_sent += self.scratch.len() as u64;
        self.transport.transmit(&self.scratch);
    }

    fn arm_timer(&mut self, kind: TimerKind, delta: Tick) {
        let now = self.scheduler.now();
        let action = self.timers.arm(kind, delta, now);
        self.apply(action);
    }

    fn cancel_timer(&mut self, kind: TimerKind) {
        let now = self.scheduler.now();
        let action = self.timers.cancel(kind, now);
        self.apply(action);
    }

    fn apply(&mut self, action: TimerAction) {
        match action {
            TimerAction::Keep => {}
            TimerAction::Arm(delta) => self.scheduler.request_tick(delta),
            TimerAction::Rearm(delta) => {
                self.scheduler.cancel_tick();
                self.scheduler.request_tick(delta);
            }
            TimerAction::Cancel => self.scheduler.cancel_tick(),
        }
    }
}

impl<T: Transport, S: Scheduler> Link for LinkEngine<T, S> {
    fn send(&mut self, synced: bool, payload: &[u8]) -> Result<Option<SeqNo>, LinkError> {
        if synced && self.awaiting_ack {
            tracing::debug!("TX: synced send while busy");
            return Err(LinkError::Busy);
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(LinkError::too_long(payload.len()));
        }

        if synced {
            let seqno = self.tx_seqno;
            self.tx_payload = Bytes::copy_from_slice(payload);
            self.transmit_frame(FrameKind::Synced, seqno, payload);
            self.retry = 0;
            self.awaiting_ack = true;
            self.arm_timer(TimerKind::AckRetry, self.config.backoff.delay(0));
            Ok(Some(seqno))
        } else {
            self.transmit_frame(FrameKind::Unsynced, SeqNo::NONE, payload);
            Ok(None)
        }
    }

    fn ack_reply(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        let seqno = self.pending_ack.ok_or(LinkError::WrongState)?;
        if payload.len() > MAX_PAYLOAD {
            return Err(LinkError::too_long(payload.len()));
        }

        self.pending_ack = None;
        self.ack_cache = Some((seqno, Bytes::copy_from_slice(payload)));
        self.transmit_frame(FrameKind::Ack, seqno, payload);
        Ok(())
    }

    fn now(&self) -> Tick {
        self.scheduler.now()
    }

    fn is_busy(&self) -> bool {
        self.awaiting_ack
    }
}
