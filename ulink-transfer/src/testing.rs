//! Test doubles for the transfer endpoints

use bytes::Bytes;
use std::cell::Cell;
use std::rc::Rc;
use ulink_protocol::{Link, LinkError, Scheduler, SeqNo, Tick};

/// Link that records everything sent through it
#[derive(Default)]
pub struct MockLink {
    pub sent: Vec<(bool, Bytes)>,
    pub replies: Vec<Bytes>,
    pub busy: bool,
    pub next_seq: SeqNo,
    pub now: Tick,
}

impl MockLink {
    pub fn new() -> Self {
        MockLink {
            next_seq: SeqNo::FIRST,
            ..Default::default()
        }
    }

    pub fn synced(&self) -> Vec<Bytes> {
        self.sent
            .iter()
            .filter(|(synced, _)| *synced)
            .map(|(_, b)| b.clone())
            .collect()
    }

    pub fn unsynced(&self) -> Vec<Bytes> {
        self.sent
            .iter()
            .filter(|(synced, _)| !*synced)
            .map(|(_, b)| b.clone())
            .collect()
    }
}

impl Link for MockLink {
    fn send(&mut self, synced: bool, payload: &[u8]) -> Result<Option<SeqNo>, LinkError> {
        if synced && self.busy {
            return Err(LinkError::Busy);
        }
        self.sent.push((synced, Bytes::copy_from_slice(payload)));
        if synced {
            let seq = self.next_seq;
            self.next_seq.increment();
            Ok(Some(seq))
        } else {
            Ok(None)
        }
    }

    fn ack_reply(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        self.replies.push(Bytes::copy_from_slice(payload));
        Ok(())
    }

    fn now(&self) -> Tick {
        self.now
    }

    fn is_busy(&self) -> bool {
        self.busy
    }
}

/// Scheduler that only remembers the last request
#[derive(Clone, Default)]
pub struct RecordingScheduler {
    pub pending: Rc<Cell<Option<Tick>>>,
}

impl Scheduler for RecordingScheduler {
    fn now(&self) -> Tick {
        0
    }

    fn request_tick(&mut self, delta: Tick) {
        self.pending.set(Some(delta));
    }

    fn cancel_tick(&mut self) {
        self.pending.set(None);
    }
}
