//! ulink - Reliable Serial-Style Links
//!
//! High-level API over the ulink crates: the framed link engine, the
//! windowed file transfer built on it, and the I/O adapters that drive both.

pub use ulink_io as io;
pub use ulink_protocol as protocol;
pub use ulink_transfer as transfer;

// Re-export commonly used types
pub use protocol::{
    Link, LinkConfig, LinkEngine, LinkError, PacketHandler, Scheduler, SeqNo, Tick, Transport,
};
pub use transfer::{TransferParams, TransferReceiver, TransferSender, TransferStatus};
