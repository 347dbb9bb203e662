//! File Transfer Receiver
//!
//! Accepts a send-file request, negotiates parameters, stores incoming
//! chunks through the stream and reports its window back to the sender.
//! A status report goes out every [`STATUS_EVERY_CHUNKS`] received chunks,
//! and again whenever the sender falls silent for `dt * 16` ticks. Once all
//! bytes are in, the receiver keeps repeating its finished status until the
//! sender acknowledges it. A local failure is reported to the sender the same
//! way, with an abort status.

use crate::pacing::status_interval;
use crate::stream::TransferStream;
use crate::window::ChunkWindow;
use crate::wire::{
    DataChunk, Message, SendFileReply, SendFileRequest, StatusReply, StatusReport,
    TransferParams, TransferStatus,
};
use crate::StatusListener;
use bytes::Bytes;
use ulink_protocol::{Link, LinkError, PacketHandler, Scheduler, SeqNo};

/// Chunks received between unsolicited status reports
pub const STATUS_EVERY_CHUNKS: u32 = 16;

/// Idle intervals a finished or abort status is repeated before giving up
pub const FINISH_ATTEMPTS: u32 = 8;

/// Receiver lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// No transfer yet
    Idle,
    /// Receiving chunks
    Running,
    /// All data stored, waiting for the sender to confirm
    Finishing,
    /// Sender confirmed the end of the transfer
    Finished,
    Aborted,
}

/// Receiver statistics
#[derive(Debug, Clone, Default)]
pub struct ReceiverStats {
    pub chunks_received: u64,
    pub chunks_stored: u64,
    pub bytes_stored: u64,
    pub duplicates: u64,
    pub out_of_window: u64,
    pub malformed: u64,
    pub status_sent: u64,
}

#[derive(Debug)]
struct Session {
    id: u16,
    length: u64,
    params: TransferParams,
    chunk_count: u64,
    dt: u32,
    window: ChunkWindow,
    since_status: u32,
    finish_attempts: u32,
    /// A local abort the sender has not acknowledged yet
    abort_owed: bool,
}

impl Session {
    fn complete(&self) -> bool {
        self.window.base() as u64 >= self.chunk_count
    }

    /// Bytes of the file stored contiguously from its start
    fn contiguous_bytes(&self) -> u64 {
        (self.window.base() as u64 * self.params.mtu as u64).min(self.length)
    }

    fn expected_len(&self, index: u32) -> Option<usize> {
        let offset = index as u64 * self.params.mtu as u64;
        if offset >= self.length {
            return None;
        }
        Some((self.length - offset).min(self.params.mtu as u64) as usize)
    }
}

/// Receiving end of a file transfer
pub struct TransferReceiver<S: Scheduler> {
    proposal: TransferParams,
    stream: Box<dyn TransferStream + Send>,
    scheduler: S,
    listener: Option<StatusListener>,
    state: ReceiverState,
    session: Option<Session>,
    /// Outstanding status report and the status it carried
    status_pending: Option<(SeqNo, TransferStatus)>,
    outcome: Option<TransferStatus>,
    stats: ReceiverStats,
}

impl<S: Scheduler> TransferReceiver<S> {
    /// Create a receiver proposing `proposal` and storing into `stream`
    pub fn new<T>(proposal: TransferParams, stream: T, scheduler: S) -> Self
    where
        T: TransferStream + Send + 'static,
    {
        TransferReceiver {
            proposal,
            stream: Box::new(stream),
            scheduler,
            listener: None,
            state: ReceiverState::Idle,
            session: None,
            status_pending: None,
            outcome: None,
            stats: ReceiverStats::default(),
        }
    }

    /// Call `listener` once per transfer with its final status
    pub fn with_listener<F>(mut self, listener: F) -> Self
    where
        F: FnMut(TransferStatus) + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Final status of the last transfer
    pub fn outcome(&self) -> Option<TransferStatus> {
        self.outcome
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    pub fn session_id(&self) -> Option<u16> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Negotiated parameters of the current transfer
    pub fn params(&self) -> Option<TransferParams> {
        self.session.as_ref().map(|s| s.params)
    }

    pub fn window(&self) -> Option<ChunkWindow> {
        self.session.as_ref().map(|s| s.window)
    }

    /// Announced length of the current transfer
    pub fn length(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.length)
    }

    /// Bytes stored contiguously from the start of the file
    pub fn contiguous_bytes(&self) -> u64 {
        self.session.as_ref().map_or(0, Session::contiguous_bytes)
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    /// Idle timer expired
    pub fn tick(&mut self, link: &mut dyn Link) {
        match self.state {
            ReceiverState::Running => {
                let Some(session) = self.session.as_ref() else {
                    return;
                };
                if !session.complete() {
                    let dt = session.dt;
                    tracing::debug!("Receiver idle, reporting status");
                    self.send_status(link);
                    self.scheduler.request_tick(status_interval(dt));
                }
            }
            ReceiverState::Finishing => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                session.finish_attempts += 1;
                let dt = session.dt;
                if session.finish_attempts > FINISH_ATTEMPTS {
                    tracing::warn!("Sender never confirmed the finished transfer");
                    self.state = ReceiverState::Finished;
                    self.status_pending = None;
                } else {
                    self.send_status(link);
                    self.scheduler.request_tick(status_interval(dt));
                }
            }
            ReceiverState::Aborted => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if !session.abort_owed {
                    return;
                }
                session.finish_attempts += 1;
                let dt = session.dt;
                if session.finish_attempts > FINISH_ATTEMPTS {
                    tracing::warn!("Sender never acknowledged the abort");
                    session.abort_owed = false;
                    self.status_pending = None;
                } else {
                    self.send_status(link);
                    self.scheduler.request_tick(status_interval(dt));
                }
            }
            _ => {}
        }
    }

    fn handle_request(&mut self, link: &mut dyn Link, request: SendFileRequest) {
        if matches!(
            self.state,
            ReceiverState::Running | ReceiverState::Finishing
        ) {
            tracing::info!("New send-file request replaces the current transfer");
        }

        let params = TransferParams::negotiate(&request.params, &self.proposal);
        let length = request.length as u64;
        let accepted = self.stream.create_data(length, request.name.as_deref());
        let id: u16 = rand::random();

        let reply = SendFileReply {
            status: if accepted {
                TransferStatus::Ok
            } else {
                TransferStatus::Abort
            },
            params,
            session: id,
        };
        if let Err(e) = link.ack_reply(&reply.to_bytes()) {
            tracing::warn!("Cannot answer send-file request: {}", e);
        }

        self.scheduler.cancel_tick();
        self.status_pending = None;
        self.outcome = None;

        if !accepted {
            tracing::warn!("Stream rejected transfer of {} bytes", length);
            self.session = None;
            self.abort();
            return;
        }

        tracing::info!(
            "Accepted transfer session {:04x}: {} bytes, mtu {}, dt {}..{}",
            id,
            length,
            params.mtu,
            params.dt_min,
            params.dt_max
        );
        self.session = Some(Session {
            id,
            length,
            params,
            chunk_count: params.chunk_count(length),
            dt: params.initial_dt(),
            window: ChunkWindow::new(),
            since_status: 0,
            finish_attempts: 0,
            abort_owed: false,
        });
        self.state = ReceiverState::Running;

        if length == 0 {
            self.finish(link);
        } else {
            self.scheduler.request_tick(status_interval(params.dt_max));
        }
    }

    fn handle_chunk(&mut self, link: &mut dyn Link, chunk: DataChunk) {
        if self.state != ReceiverState::Running {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if chunk.session != session.id {
            tracing::trace!("Chunk for foreign session {:04x}", chunk.session);
            return;
        }

        self.stats.chunks_received += 1;
        session.since_status += 1;

        let offset = chunk.index as u64 * session.params.mtu as u64;
        let mut write_failed = false;
        match session.expected_len(chunk.index) {
            Some(len) if len == chunk.data.len() => {
                if session.window.contains(chunk.index) {
                    self.stats.duplicates += 1;
                    tracing::trace!("Duplicate chunk {}", chunk.index);
                } else if chunk.index as u64 > session.window.last_slot() {
                    self.stats.out_of_window += 1;
                    tracing::trace!(
                        "Chunk {} beyond window at {}",
                        chunk.index,
                        session.window.base()
                    );
                } else if self.stream.write_data(offset, &chunk.data) {
                    let accept = session.window.accept(chunk.index);
                    debug_assert!(accept.is_new());
                    self.stats.chunks_stored += 1;
                    self.stats.bytes_stored += len as u64;
                } else {
                    write_failed = true;
                }
            }
            _ => {
                self.stats.malformed += 1;
                tracing::debug!(
                    "Dropping chunk {} of {} bytes",
                    chunk.index,
                    chunk.data.len()
                );
            }
        }

        if write_failed {
            tracing::warn!("Write of chunk {} failed, aborting", chunk.index);
            self.fail(link);
            return;
        }

        self.scheduler.cancel_tick();
        let (complete, report_due, dt) = match self.session.as_mut() {
            Some(session) => {
                let report_due = session.since_status >= STATUS_EVERY_CHUNKS;
                if report_due {
                    session.since_status = 0;
                }
                (session.complete(), report_due, session.dt)
            }
            None => return,
        };

        if complete {
            self.finish(link);
        } else {
            if report_due {
                self.send_status(link);
            }
            self.scheduler.request_tick(status_interval(dt));
        }
    }

    fn handle_status_reply(&mut self, link: &mut dyn Link, sent: TransferStatus, payload: Bytes) {
        match self.state {
            ReceiverState::Finishing if sent == TransferStatus::Finished => {
                tracing::info!("Sender confirmed end of transfer");
                self.state = ReceiverState::Finished;
                self.scheduler.cancel_tick();
            }
            ReceiverState::Finishing => {
                // an older report was answered; the finished one is still owed
                self.send_status(link);
            }
            ReceiverState::Running => match StatusReply::from_bytes(&payload) {
                Ok(reply) if reply.status != TransferStatus::Ok => {
                    tracing::warn!("Sender answered status with {:?}", reply.status);
                    self.abort();
                }
                Ok(reply) => {
                    if let Some(session) = self.session.as_mut() {
                        session.dt = reply.dt.max(1);
                    }
                }
                Err(e) => tracing::debug!("Ignoring status reply: {}", e),
            },
            ReceiverState::Aborted if sent == TransferStatus::Abort => {
                tracing::info!("Sender acknowledged the abort");
                if let Some(session) = self.session.as_mut() {
                    session.abort_owed = false;
                }
                self.scheduler.cancel_tick();
            }
            ReceiverState::Aborted => {
                // an older report was answered; the abort is still owed
                if self.session.as_ref().map_or(false, |s| s.abort_owed) {
                    self.send_status(link);
                }
            }
            _ => {}
        }
    }

    fn finish(&mut self, link: &mut dyn Link) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.finish_attempts = 0;
        let dt = session.dt;
        tracing::info!("Transfer {:04x} complete", session.id);

        self.state = ReceiverState::Finishing;
        self.send_status(link);
        self.scheduler.request_tick(status_interval(dt));
        self.notify(TransferStatus::Finished);
    }

    fn send_status(&mut self, link: &mut dyn Link) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let status = match self.state {
            ReceiverState::Running => TransferStatus::Ok,
            ReceiverState::Finishing | ReceiverState::Finished => TransferStatus::Finished,
            _ => TransferStatus::Abort,
        };
        let report = StatusReport {
            session: session.id,
            status,
            base: session.window.base(),
            mask: session.window.mask(),
        };

        match link.send(true, &report.to_bytes()) {
            Ok(Some(seqno)) => {
                tracing::trace!(
                    "Status {:?} base {} mask {:08x} as seq {}",
                    status,
                    report.base,
                    report.mask,
                    seqno
                );
                self.stats.status_sent += 1;
                self.status_pending = Some((seqno, status));
            }
            Ok(None) => {}
            Err(LinkError::Busy) => tracing::debug!("Link busy, status deferred"),
            Err(e) => tracing::warn!("Cannot send status: {}", e),
        }
    }

    fn abort(&mut self) {
        self.state = ReceiverState::Aborted;
        self.scheduler.cancel_tick();
        self.notify(TransferStatus::Abort);
    }

    /// Abort on a local error and report it to the sender
    fn fail(&mut self, link: &mut dyn Link) {
        self.abort();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.abort_owed = true;
        session.finish_attempts = 0;
        let dt = session.dt;
        self.send_status(link);
        self.scheduler.request_tick(status_interval(dt));
    }

    fn notify(&mut self, status: TransferStatus) {
        self.outcome = Some(status);
        if let Some(listener) = self.listener.as_mut() {
            listener(status);
        }
    }
}

impl<S: Scheduler> PacketHandler for TransferReceiver<S> {
    fn on_packet(&mut self, link: &mut dyn Link, _seqno: SeqNo, payload: Bytes, synced: bool) {
        match Message::from_bytes(payload) {
            Ok(Message::SendFile(request)) if synced => self.handle_request(link, request),
            Ok(Message::Chunk(chunk)) if !synced => self.handle_chunk(link, chunk),
            Ok(other) => tracing::trace!("Receiver ignores {:?}", other),
            Err(e) => {
                self.stats.malformed += 1;
                tracing::debug!("Receiver ignores packet: {}", e);
            }
        }
    }

    fn on_ack(&mut self, link: &mut dyn Link, seqno: SeqNo, payload: Bytes) {
        match self.status_pending {
            Some((pending, sent)) if pending == seqno => {
                self.status_pending = None;
                self.handle_status_reply(link, sent, payload);
            }
            _ => tracing::trace!("Receiver ignores ack {}", seqno),
        }
    }

    fn on_timeout(&mut self, _link: &mut dyn Link, seqno: SeqNo) {
        if matches!(self.status_pending, Some((pending, _)) if pending == seqno) {
            tracing::debug!("Status report {} went unanswered", seqno);
            self.status_pending = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;
    use crate::testing::{MockLink, RecordingScheduler};
    use crate::wire::CMD_STATUS;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Fixture {
        receiver: TransferReceiver<RecordingScheduler>,
        sink: MemoryStream,
        link: MockLink,
        timer: RecordingScheduler,
        statuses: Arc<Mutex<Vec<TransferStatus>>>,
    }

    fn fixture(proposal: TransferParams) -> Fixture {
        let sink = MemoryStream::new();
        let timer = RecordingScheduler::default();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let log = statuses.clone();
        let receiver = TransferReceiver::new(proposal, sink.clone(), timer.clone())
            .with_listener(move |status| log.lock().push(status));
        Fixture {
            receiver,
            sink,
            link: MockLink::new(),
            timer,
            statuses,
        }
    }

    impl Fixture {
        fn request(&mut self, length: u32, mtu: u16) -> SendFileReply {
            let request = SendFileRequest {
                length,
                params: TransferParams::new(mtu, 2, 4),
                name: Some("data.bin".to_string()),
            };
            self.receiver
                .on_packet(&mut self.link, SeqNo::new(1), request.to_bytes().freeze(), true);
            SendFileReply::from_bytes(self.link.replies.last().unwrap()).unwrap()
        }

        fn chunk(&mut self, session: u16, index: u32, data: &[u8]) {
            let bytes = DataChunk::encode(session, index, data).freeze();
            self.receiver
                .on_packet(&mut self.link, SeqNo::NONE, bytes, false);
        }

        fn reports(&self) -> Vec<StatusReport> {
            self.link
                .synced()
                .iter()
                .map(|b| StatusReport::from_bytes(b).unwrap())
                .collect()
        }
    }

    #[test]
    fn test_accepts_request() {
        let mut fx = fixture(TransferParams::new(0, 0, 20));
        let reply = fx.request(100, 10);

        assert_eq!(reply.status, TransferStatus::Ok);
        assert_eq!(reply.params, TransferParams::new(10, 2, 4));
        assert_eq!(fx.receiver.state(), ReceiverState::Running);
        assert_eq!(fx.receiver.session_id(), Some(reply.session));
        assert_eq!(fx.sink.len(), 100);
        assert_eq!(fx.sink.name().as_deref(), Some("data.bin"));
        assert_eq!(fx.timer.pending.get(), Some(4 * 16));
    }

    #[test]
    fn test_rejected_request_aborts() {
        struct Refuse;
        impl TransferStream for Refuse {}

        let timer = RecordingScheduler::default();
        let mut receiver = TransferReceiver::new(TransferParams::default(), Refuse, timer);
        let mut link = MockLink::new();
        let request = SendFileRequest {
            length: 5,
            params: TransferParams::default(),
            name: None,
        };
        receiver.on_packet(&mut link, SeqNo::new(1), request.to_bytes().freeze(), true);

        let reply = SendFileReply::from_bytes(&link.replies[0]).unwrap();
        assert_eq!(reply.status, TransferStatus::Abort);
        assert_eq!(receiver.state(), ReceiverState::Aborted);
        assert_eq!(receiver.outcome(), Some(TransferStatus::Abort));
    }

    #[test]
    fn test_in_order_transfer_finishes() {
        let mut fx = fixture(TransferParams::unspecified());
        let session = fx.request(10, 4).session;

        fx.chunk(session, 0, b"0123");
        fx.chunk(session, 1, b"4567");
        assert!(fx.reports().is_empty());
        assert_eq!(fx.receiver.contiguous_bytes(), 8);
        fx.chunk(session, 2, b"89");

        assert_eq!(fx.sink.data(), b"0123456789".to_vec());
        assert_eq!(fx.receiver.state(), ReceiverState::Finishing);
        assert_eq!(*fx.statuses.lock(), vec![TransferStatus::Finished]);
        assert_eq!(fx.receiver.contiguous_bytes(), 10);

        let reports = fx.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, TransferStatus::Finished);
        assert_eq!(reports[0].base, 3);
    }

    #[test]
    fn test_finish_repeats_until_confirmed() {
        let mut fx = fixture(TransferParams::unspecified());
        let session = fx.request(4, 4).session;
        fx.chunk(session, 0, b"abcd");
        assert_eq!(fx.reports().len(), 1);

        // first report lost
        fx.receiver.on_timeout(&mut fx.link, SeqNo::new(1));
        fx.receiver.tick(&mut fx.link);
        let reports = fx.reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].status, TransferStatus::Finished);

        let reply = StatusReply {
            status: TransferStatus::Finished,
            dt: 3,
        };
        fx.receiver
            .on_ack(&mut fx.link, SeqNo::new(2), reply.to_bytes().freeze());
        assert_eq!(fx.receiver.state(), ReceiverState::Finished);
        assert_eq!(fx.timer.pending.get(), None);
        assert_eq!(*fx.statuses.lock(), vec![TransferStatus::Finished]);
    }

    #[test]
    fn test_finish_gives_up_eventually() {
        let mut fx = fixture(TransferParams::unspecified());
        let session = fx.request(4, 4).session;
        fx.chunk(session, 0, b"abcd");
        for _ in 0..=FINISH_ATTEMPTS {
            fx.receiver.tick(&mut fx.link);
        }
        assert_eq!(fx.receiver.state(), ReceiverState::Finished);
    }

    #[test]
    fn test_zero_length_finishes_at_once() {
        let mut fx = fixture(TransferParams::unspecified());
        fx.request(0, 4);
        assert_eq!(fx.receiver.state(), ReceiverState::Finishing);
        assert_eq!(*fx.statuses.lock(), vec![TransferStatus::Finished]);
        assert_eq!(fx.reports()[0].status, TransferStatus::Finished);
    }

    #[test]
    fn test_out_of_order_and_duplicates() {
        let mut fx = fixture(TransferParams::unspecified());
        let session = fx.request(40, 1).session;

        fx.chunk(session, 2, b"c");
        fx.chunk(session, 2, b"c");
        fx.chunk(session, 39, b"z");
        fx.chunk(0x5555u16.wrapping_add(session), 0, b"a");
        fx.chunk(session, 0, b"aa");

        let stats = fx.receiver.stats();
        assert_eq!(stats.chunks_stored, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.out_of_window, 1);
        assert_eq!(stats.malformed, 1);
        assert_eq!(fx.receiver.window(), Some(ChunkWindow::from_parts(0, 0b10)));
    }

    #[test]
    fn test_status_every_sixteen_chunks() {
        let mut fx = fixture(TransferParams::unspecified());
        let session = fx.request(100, 1).session;

        for i in 0..16u32 {
            // chunk 0 never arrives
            fx.chunk(session, i + 1, &[i as u8]);
        }
        let reports = fx.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, TransferStatus::Ok);
        assert_eq!(reports[0].base, 0);
        assert_eq!(reports[0].mask, 0xFFFF);
        assert_eq!(fx.link.synced()[0][0], CMD_STATUS);
    }

    #[test]
    fn test_idle_tick_reports_and_adopts_dt() {
        let mut fx = fixture(TransferParams::unspecified());
        fx.request(100, 1);

        fx.receiver.tick(&mut fx.link);
        assert_eq!(fx.reports().len(), 1);

        let reply = StatusReply {
            status: TransferStatus::Ok,
            dt: 3,
        };
        fx.receiver
            .on_ack(&mut fx.link, SeqNo::new(1), reply.to_bytes().freeze());
        fx.receiver.tick(&mut fx.link);
        assert_eq!(fx.timer.pending.get(), Some(3 * 16));
    }

    #[test]
    fn test_abort_reply_aborts() {
        let mut fx = fixture(TransferParams::unspecified());
        fx.request(100, 1);
        fx.receiver.tick(&mut fx.link);

        let reply = StatusReply {
            status: TransferStatus::Abort,
            dt: 3,
        };
        fx.receiver
            .on_ack(&mut fx.link, SeqNo::new(1), reply.to_bytes().freeze());
        assert_eq!(fx.receiver.state(), ReceiverState::Aborted);
        assert_eq!(*fx.statuses.lock(), vec![TransferStatus::Abort]);
        assert_eq!(fx.timer.pending.get(), None);
    }

    #[test]
    fn test_busy_link_defers_status() {
        let mut fx = fixture(TransferParams::unspecified());
        let session = fx.request(2, 1).session;
        fx.link.busy = true;
        fx.chunk(session, 0, b"a");
        fx.chunk(session, 1, b"b");
        assert_eq!(fx.receiver.state(), ReceiverState::Finishing);
        assert!(fx.reports().is_empty());

        fx.link.busy = false;
        fx.receiver.tick(&mut fx.link);
        assert_eq!(fx.reports()[0].status, TransferStatus::Finished);
    }

    /// Accepts a transfer, then fails every write
    struct ReadOnly;

    impl TransferStream for ReadOnly {
        fn create_data(&mut self, _length: u64, _name: Option<&str>) -> bool {
            true
        }
    }

    #[test]
    fn test_write_failure_reports_abort() {
        let timer = RecordingScheduler::default();
        let mut receiver = TransferReceiver::new(TransferParams::default(), ReadOnly, timer.clone());
        let mut link = MockLink::new();
        let request = SendFileRequest {
            length: 8,
            params: TransferParams::new(4, 2, 4),
            name: None,
        };
        receiver.on_packet(&mut link, SeqNo::new(1), request.to_bytes().freeze(), true);
        let session = SendFileReply::from_bytes(&link.replies[0]).unwrap().session;

        link.busy = true;
        let chunk = DataChunk::encode(session, 0, b"abcd").freeze();
        receiver.on_packet(&mut link, SeqNo::NONE, chunk, false);
        assert_eq!(receiver.state(), ReceiverState::Aborted);
        assert_eq!(receiver.outcome(), Some(TransferStatus::Abort));
        assert!(link.synced().is_empty());
        assert!(timer.pending.get().is_some());

        // deferred while busy, sent from the idle timer
        link.busy = false;
        receiver.tick(&mut link);
        let reports = link.synced();
        assert_eq!(reports.len(), 1);
        let report = StatusReport::from_bytes(&reports[0]).unwrap();
        assert_eq!(report.status, TransferStatus::Abort);
        assert_eq!(report.session, session);

        let reply = StatusReply {
            status: TransferStatus::Abort,
            dt: 0,
        };
        receiver.on_ack(&mut link, SeqNo::new(1), reply.to_bytes().freeze());
        assert_eq!(timer.pending.get(), None);
        receiver.tick(&mut link);
        assert_eq!(link.synced().len(), 1);
    }

    #[test]
    fn test_abort_report_gives_up_eventually() {
        let timer = RecordingScheduler::default();
        let mut receiver = TransferReceiver::new(TransferParams::default(), ReadOnly, timer);
        let mut link = MockLink::new();
        let request = SendFileRequest {
            length: 8,
            params: TransferParams::new(4, 2, 4),
            name: None,
        };
        receiver.on_packet(&mut link, SeqNo::new(1), request.to_bytes().freeze(), true);
        let session = SendFileReply::from_bytes(&link.replies[0]).unwrap().session;
        let chunk = DataChunk::encode(session, 0, b"abcd").freeze();
        receiver.on_packet(&mut link, SeqNo::NONE, chunk, false);

        for _ in 0..FINISH_ATTEMPTS + 4 {
            receiver.tick(&mut link);
        }
        // the first report plus one per attempt
        assert_eq!(link.synced().len(), 1 + FINISH_ATTEMPTS as usize);
        assert_eq!(receiver.stats().status_sent, 1 + FINISH_ATTEMPTS as u64);
    }
}

