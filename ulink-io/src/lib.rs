//! ulink I/O and Platform Adapters
//!
//! Concrete implementations of the link capabilities: a thread-backed
//! ticker and a virtual-time scheduler implementing `Scheduler`, and a TCP
//! byte stream implementing `Transport`.

pub mod manual;
pub mod socket;
pub mod ticker;
pub mod time;

pub use manual::ManualScheduler;
pub use socket::{SocketError, StreamListener, StreamSocket};
pub use ticker::{Ticker, TickerHandle};
pub use time::{ManualClock, MonotonicClock};
