//! ulink Protocol Core Implementation
//!
//! This crate implements the link layer: the CRC-protected frame format,
//! 4-bit sequence numbers, the dual countdown timer coordination and the
//! byte-driven link engine with acknowledgements, retransmission and NACKs.

pub mod config;
pub mod engine;
pub mod frame;
pub mod link;
pub mod sequence;
pub mod timer;

pub use config::{Backoff, LinkConfig};
pub use engine::{LinkEngine, LinkStats, RxState};
pub use frame::{Frame, FrameError, FrameKind, NackReason, MAX_PAYLOAD};
pub use link::{Link, LinkError, PacketHandler, Scheduler, Transport};
pub use sequence::SeqNo;
pub use timer::{Tick, TimerAction, TimerCoordinator, TimerKind};
