//! ulink CLI Library
//!
//! Shared functionality for the ulink command-line tools.

pub mod config;
pub mod endpoint;
pub mod noise;
pub mod stats;

pub use config::{Config, ConfigError, TransferConfig};
pub use endpoint::{spawn, Endpoint, Event, Running, TransferEndpoint};
pub use stats::{display_link_stats, display_progress, format_bandwidth, format_bytes};

use std::net::SocketAddr;
use std::time::Duration;
use ulink_io::{StreamListener, StreamSocket};

/// Connection timeout for outgoing links
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Install the tracing subscriber
pub fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();
}

/// Connect to `connect`, or wait for one peer on `listen`
pub fn open_link(
    connect: Option<SocketAddr>,
    listen: Option<SocketAddr>,
) -> anyhow::Result<StreamSocket> {
    match (connect, listen) {
        (Some(addr), None) => {
            tracing::info!("Connecting to {}", addr);
            Ok(StreamSocket::connect(addr, CONNECT_TIMEOUT)?)
        }
        (None, Some(addr)) => {
            let listener = StreamListener::bind(addr)?;
            tracing::info!("Waiting for a peer on {}", listener.local_addr()?);
            let (socket, peer) = listener.accept()?;
            tracing::info!("Peer connected from {}", peer);
            Ok(socket)
        }
        _ => anyhow::bail!("Exactly one of --connect and --listen is required"),
    }
}
