//! ulink File Transfer
//!
//! Windowed file transfer on top of a ulink link. The sender asks the
//! receiver to accept a file with a synced request, both sides settle on a
//! chunk size and pacing range, and the file then travels as unsynced data
//! chunks. The receiver reports a 32-chunk acknowledgement window with
//! synced status reports; the sender resends what the window shows missing
//! and adapts its chunk interval to how many chunks got through.

pub mod pacing;
pub mod receiver;
pub mod sender;
pub mod stream;
pub mod window;
pub mod wire;

#[cfg(test)]
mod testing;

pub use pacing::Pacer;
pub use receiver::{ReceiverState, ReceiverStats, TransferReceiver};
pub use sender::{SenderState, SenderStats, TransferError, TransferSender};
pub use stream::{FileSink, FileSource, MemoryStream, TransferStream};
pub use window::{Accept, ChunkWindow, SendWindow};
pub use wire::{TransferParams, TransferStatus, WireError};

/// Callback receiving the final status of a transfer
pub type StatusListener = Box<dyn FnMut(TransferStatus) + Send>;
