//! File Transfer Sender
//!
//! Opens a transfer with a synced send-file request, then streams unsynced
//! data chunks paced by its own timer. Receiver status reports drive the
//! retransmission window and the pacing interval; the reply to each report
//! tells the receiver which interval is in use.

use crate::pacing::{Pacer, DEFAULT_DDT};
use crate::stream::TransferStream;
use crate::window::{ChunkWindow, SendWindow};
use crate::wire::{
    DataChunk, Message, SendFileReply, SendFileRequest, StatusReply, StatusReport,
    TransferParams, TransferStatus, MAX_NAME_LEN,
};
use crate::StatusListener;
use bytes::Bytes;
use thiserror::Error;
use ulink_protocol::{Link, LinkError, PacketHandler, Scheduler, SeqNo};

/// Errors starting a transfer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("A transfer is already in progress")]
    AlreadyRunning,

    #[error("File name too long: {0} bytes")]
    NameTooLong(usize),

    #[error("File too large: {0} bytes")]
    TooLarge(u64),
}

/// Sender lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    /// Send-file request awaiting the receiver's reply
    Requesting,
    /// Streaming chunks
    Running,
    Finished,
    Aborted,
}

/// Sender statistics
#[derive(Debug, Clone, Default)]
pub struct SenderStats {
    pub chunks_sent: u64,
    pub chunks_resent: u64,
    pub bytes_sent: u64,
    pub reports_received: u64,
    pub stale_reports: u64,
}

#[derive(Debug)]
struct TxSession {
    id: u16,
    params: TransferParams,
    pacer: Pacer,
    reported: ChunkWindow,
    window: SendWindow,
    chunk_count: u64,
    /// Highest chunk index sent so far plus one
    high_water: u64,
    acked_chunks: u64,
}

/// Sending end of a file transfer
pub struct TransferSender<S: Scheduler> {
    proposal: TransferParams,
    ddt: u32,
    stream: Box<dyn TransferStream + Send>,
    scheduler: S,
    listener: Option<StatusListener>,
    state: SenderState,
    request_seqno: SeqNo,
    length: u64,
    session: Option<TxSession>,
    /// Session that finished, so repeated final reports still get a reply
    finished_session: Option<u16>,
    outcome: Option<TransferStatus>,
    stats: SenderStats,
}

impl<S: Scheduler> TransferSender<S> {
    /// Create a sender proposing `proposal` and reading from `stream`
    pub fn new<T>(proposal: TransferParams, stream: T, scheduler: S) -> Self
    where
        T: TransferStream + Send + 'static,
    {
        TransferSender {
            proposal,
            ddt: DEFAULT_DDT,
            stream: Box::new(stream),
            scheduler,
            listener: None,
            state: SenderState::Idle,
            request_seqno: SeqNo::NONE,
            length: 0,
            session: None,
            finished_session: None,
            outcome: None,
            stats: SenderStats::default(),
        }
    }

    /// Pacing step applied per status report
    pub fn with_ddt(mut self, ddt: u32) -> Self {
        self.ddt = ddt;
        self
    }

    /// Call `listener` once per transfer with its final status
    pub fn with_listener<F>(mut self, listener: F) -> Self
    where
        F: FnMut(TransferStatus) + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn outcome(&self) -> Option<TransferStatus> {
        self.outcome
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    pub fn session_id(&self) -> Option<u16> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Negotiated parameters of the current transfer
    pub fn params(&self) -> Option<TransferParams> {
        self.session.as_ref().map(|s| s.params)
    }

    /// Current chunk interval
    pub fn interval(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.pacer.interval())
    }

    /// Bytes the receiver has confirmed
    pub fn acked_bytes(&self) -> u64 {
        self.session.as_ref().map_or(0, |s| {
            (s.reported.base() as u64 * s.params.mtu as u64).min(self.length)
        })
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    /// Request a transfer of `length` bytes named `name`
    pub fn start(
        &mut self,
        link: &mut dyn Link,
        length: u64,
        name: Option<&str>,
    ) -> Result<SeqNo, TransferError> {
        if matches!(self.state, SenderState::Requesting | SenderState::Running) {
            return Err(TransferError::AlreadyRunning);
        }
        if let Some(name) = name {
            if name.len() > MAX_NAME_LEN {
                return Err(TransferError::NameTooLong(name.len()));
            }
        }
        let wire_length = u32::try_from(length).map_err(|_| TransferError::TooLarge(length))?;

        let request = SendFileRequest {
            length: wire_length,
            params: self.proposal,
            name: name.map(str::to_owned),
        };
        let seqno = link.send(true, &request.to_bytes())?.unwrap_or(SeqNo::NONE);

        tracing::info!("Requesting transfer of {} bytes as seq {}", length, seqno);
        self.state = SenderState::Requesting;
        self.request_seqno = seqno;
        self.length = length;
        self.session = None;
        self.finished_session = None;
        self.outcome = None;
        self.stats = SenderStats::default();
        Ok(seqno)
    }

    /// Pacing timer expired: send the next chunk
    pub fn tick(&mut self, link: &mut dyn Link) {
        if self.state != SenderState::Running {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let interval = session.pacer.interval() as u64;

        if let Some(index) = session.window.next_unsent(session.chunk_count) {
            let mtu = session.params.mtu as u64;
            let offset = index as u64 * mtu;
            let len = (self.length - offset).min(mtu) as usize;

            let data = match self.stream.read_data(offset, len) {
                Ok(data) if data.len() == len => data,
                Ok(data) => {
                    tracing::warn!(
                        "Short read at {}: {} of {} bytes",
                        offset,
                        data.len(),
                        len
                    );
                    self.abort();
                    return;
                }
                Err(e) => {
                    tracing::warn!("Read at {} failed: {}", offset, e);
                    self.abort();
                    return;
                }
            };

            let chunk = DataChunk::encode(session.id, index, &data);
            match link.send(false, &chunk) {
                Ok(_) => {
                    session.window.mark_sent(index);
                    if (index as u64) < session.high_water {
                        self.stats.chunks_resent += 1;
                    } else {
                        session.high_water = index as u64 + 1;
                    }
                    self.stats.chunks_sent += 1;
                    self.stats.bytes_sent += len as u64;
                    tracing::trace!("Sent chunk {} ({} bytes)", index, len);
                }
                Err(e) => tracing::warn!("Cannot send chunk {}: {}", index, e),
            }
        }

        // window exhausted: keep polling until a report reopens it
        self.scheduler.request_tick(interval.max(1));
    }

    fn handle_reply(&mut self, payload: &[u8]) {
        let reply = match SendFileReply::from_bytes(payload) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Bad send-file reply: {}", e);
                self.abort();
                return;
            }
        };
        if reply.status != TransferStatus::Ok || reply.params.mtu == 0 {
            tracing::warn!("Receiver refused the transfer ({:?})", reply.status);
            self.abort();
            return;
        }

        let params = reply.params;
        let pacer = Pacer::new(&params, self.ddt);
        tracing::info!(
            "Transfer session {:04x} open: mtu {}, dt {}..{}, starting at {}",
            reply.session,
            params.mtu,
            params.dt_min,
            params.dt_max,
            pacer.interval()
        );

        self.session = Some(TxSession {
            id: reply.session,
            params,
            pacer,
            reported: ChunkWindow::new(),
            window: SendWindow::new(),
            chunk_count: params.chunk_count(self.length),
            high_water: 0,
            acked_chunks: 0,
        });
        self.state = SenderState::Running;
        self.scheduler.request_tick(pacer.interval().max(1) as u64);
    }

    fn handle_report(&mut self, link: &mut dyn Link, report: StatusReport) {
        if self.finished_session == Some(report.session) {
            self.reply(link, TransferStatus::Finished, 0);
            return;
        }
        let Some(session) = self.session.as_mut() else {
            tracing::debug!("Status report for unknown session {:04x}", report.session);
            return;
        };
        if session.id != report.session {
            tracing::debug!("Status report for foreign session {:04x}", report.session);
            return;
        }
        if self.state != SenderState::Running {
            self.reply(link, TransferStatus::Abort, 0);
            return;
        }

        self.stats.reports_received += 1;
        let next = ChunkWindow::from_parts(report.base, report.mask);
        let newly = session.reported.newly_acked(&next);
        if next.base() >= session.reported.base() {
            session.acked_chunks += newly as u64;
            session.reported = next;
            session.window.update(&next);
        } else {
            self.stats.stale_reports += 1;
        }
        let dt = session.pacer.on_report(newly);
        tracing::debug!(
            "Report {:?} base {} mask {:08x}: {} new, dt now {}",
            report.status,
            report.base,
            report.mask,
            newly,
            dt
        );

        match report.status {
            TransferStatus::Ok => self.reply(link, TransferStatus::Ok, dt),
            TransferStatus::Finished => {
                tracing::info!("Receiver reports transfer {:04x} complete", report.session);
                self.state = SenderState::Finished;
                self.finished_session = Some(report.session);
                self.scheduler.cancel_tick();
                self.reply(link, TransferStatus::Finished, dt);
                self.notify(TransferStatus::Finished);
            }
            TransferStatus::Abort => {
                tracing::warn!("Receiver aborted transfer {:04x}", report.session);
                self.reply(link, TransferStatus::Abort, dt);
                self.abort();
            }
        }
    }

    fn reply(&mut self, link: &mut dyn Link, status: TransferStatus, dt: u32) {
        let reply = StatusReply { status, dt };
        if let Err(e) = link.ack_reply(&reply.to_bytes()) {
            tracing::debug!("Cannot answer status report: {}", e);
        }
    }

    fn abort(&mut self) {
        self.state = SenderState::Aborted;
        self.scheduler.cancel_tick();
        self.notify(TransferStatus::Abort);
    }

    fn notify(&mut self, status: TransferStatus) {
        self.outcome = Some(status);
        if let Some(listener) = self.listener.as_mut() {
            listener(status);
        }
    }
}

impl<S: Scheduler> PacketHandler for TransferSender<S> {
    fn on_packet(&mut self, link: &mut dyn Link, _seqno: SeqNo, payload: Bytes, synced: bool) {
        match Message::from_bytes(payload) {
            Ok(Message::Status(report)) if synced => self.handle_report(link, report),
            Ok(other) => tracing::trace!("Sender ignores {:?}", other),
            Err(e) => tracing::debug!("Sender ignores packet: {}", e),
        }
    }

    fn on_ack(&mut self, _link: &mut dyn Link, seqno: SeqNo, payload: Bytes) {
        if self.state == SenderState::Requesting && seqno == self.request_seqno {
            self.handle_reply(&payload);
        }
    }

    fn on_timeout(&mut self, _link: &mut dyn Link, seqno: SeqNo) {
        if self.state == SenderState::Requesting && seqno == self.request_seqno {
            tracing::warn!("Send-file request {} was never answered", seqno);
            self.abort();
        }
    }
}
