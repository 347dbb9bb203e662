//! Link Capabilities
//!
//! The engine is platform independent. Byte output, timekeeping and packet
//! delivery are provided by the embedding application through the traits in
//! this module.

use crate::frame::MAX_PAYLOAD;
use crate::sequence::SeqNo;
use crate::timer::Tick;
use bytes::Bytes;
use thiserror::Error;

/// Errors returned by the link send operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    #[error("A synced frame is already awaiting its acknowledgement")]
    Busy,

    #[error("Payload too long: {len} bytes (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("No synced frame is waiting for a reply")]
    WrongState,
}

impl LinkError {
    pub(crate) fn too_long(len: usize) -> Self {
        LinkError::TooLong {
            len,
            max: MAX_PAYLOAD,
        }
    }
}

/// Outgoing byte stream
pub trait Transport {
    /// Write a run of bytes to the peer
    fn transmit(&mut self, bytes: &[u8]);

    /// Write a single byte to the peer
    fn transmit_byte(&mut self, byte: u8) {
        self.transmit(&[byte]);
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn transmit(&mut self, bytes: &[u8]) {
        (**self).transmit(bytes);
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn transmit(&mut self, bytes: &[u8]) {
        (**self).transmit(bytes);
    }
}

impl Transport for Vec<u8> {
    fn transmit(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Single-slot one-shot timer
///
/// At most one tick is pending at a time. `request_tick` replaces a pending
/// request; both operations are idempotent.
pub trait Scheduler {
    /// Current time
    fn now(&self) -> Tick;

    /// Ask for one `tick` call `delta` ticks from now
    fn request_tick(&mut self, delta: Tick);

    /// Drop the pending request, if any
    fn cancel_tick(&mut self);
}

impl<S: Scheduler + ?Sized> Scheduler for &mut S {
    fn now(&self) -> Tick {
        (**self).now()
    }

    fn request_tick(&mut self, delta: Tick) {
        (**self).request_tick(delta);
    }

    fn cancel_tick(&mut self) {
        (**self).cancel_tick();
    }
}

impl<S: Scheduler + ?Sized> Scheduler for Box<S> {
    fn now(&self) -> Tick {
        (**self).now()
    }

    fn request_tick(&mut self, delta: Tick) {
        (**self).request_tick(delta);
    }

    fn cancel_tick(&mut self) {
        (**self).cancel_tick();
    }
}

/// Sending side of a link, handed to packet handlers
pub trait Link {
    /// Send a payload
    ///
    /// Synced sends are retransmitted until acknowledged and return the
    /// sequence number used; unsynced sends return `None`.
    fn send(&mut self, synced: bool, payload: &[u8]) -> Result<Option<SeqNo>, LinkError>;

    /// Acknowledge the synced frame currently being handled, with a payload
    fn ack_reply(&mut self, payload: &[u8]) -> Result<(), LinkError>;

    /// Current time of the link scheduler
    fn now(&self) -> Tick;

    /// True while a synced send awaits its acknowledgement
    fn is_busy(&self) -> bool;
}

/// Receiver of link events
///
/// Every callback gets the link so replies can be sent synchronously.
pub trait PacketHandler {
    /// A data frame arrived
    ///
    /// For synced frames the handler may call [`Link::ack_reply`] once; if it
    /// does not, an empty acknowledgement is sent after this returns.
    fn on_packet(&mut self, link: &mut dyn Link, seqno: SeqNo, payload: Bytes, synced: bool);

    /// The outstanding synced frame was acknowledged
    fn on_ack(&mut self, link: &mut dyn Link, seqno: SeqNo, payload: Bytes);

    /// The outstanding synced frame ran out of retries
    fn on_timeout(&mut self, link: &mut dyn Link, seqno: SeqNo);

    /// A byte outside any frame was received
    fn on_garbage(&mut self, _byte: u8) {}
}
