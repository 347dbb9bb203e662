//! ulink Sender - send one file over a ulink link

use clap::Parser;
use crossbeam::channel::RecvTimeoutError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use ulink_cli::stats::{display_progress, display_sender_stats};
use ulink_cli::{display_link_stats, open_link, spawn, Config, Event};
use ulink::transfer::{FileSource, SenderState, TransferSender, TransferStatus};

#[derive(Parser, Debug)]
#[command(name = "ulink-send")]
#[command(about = "Send a file over a ulink link", long_about = None)]
struct Args {
    /// File to send
    input: PathBuf,

    /// Name announced to the receiver (defaults to the file name)
    #[arg(short, long)]
    name: Option<String>,

    /// Connect to a receiver or relay at this address
    #[arg(short, long)]
    connect: Option<SocketAddr>,

    /// Wait for the receiver to connect on this address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Proposed chunk size
    #[arg(long)]
    mtu: Option<u16>,

    /// Proposed minimum chunk interval (ms)
    #[arg(long)]
    dt_min: Option<u32>,

    /// Proposed maximum chunk interval (ms)
    #[arg(long)]
    dt_max: Option<u32>,

    /// Statistics interval in seconds
    #[arg(long)]
    stats: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    ulink_cli::init_logging(args.verbose);

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(mtu) = args.mtu {
        config.transfer.mtu = mtu;
    }
    if let Some(dt_min) = args.dt_min {
        config.transfer.dt_min = dt_min;
    }
    if let Some(dt_max) = args.dt_max {
        config.transfer.dt_max = dt_max;
    }
    if let Some(stats) = args.stats {
        config.stats_interval_secs = stats;
    }
    config.validate()?;

    let source = FileSource::open(&args.input)
        .map_err(|e| anyhow::anyhow!("Failed to open '{}': {}", args.input.display(), e))?;
    let length = source.length();
    let name = match args.name {
        Some(name) => Some(name),
        None => args
            .input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned()),
    };

    tracing::info!("ulink sender starting");
    tracing::info!("Input: {} ({} bytes)", args.input.display(), length);

    let socket = open_link(args.connect, args.listen)?;
    let params = config.transfer.params();
    let ddt = config.transfer.ddt;
    let running = spawn(socket, config.link, move |timer, events| {
        TransferSender::new(params, source, timer)
            .with_ddt(ddt)
            .with_listener(move |status| {
                let _ = events.send(Event::Outcome(status));
            })
    })?;

    running
        .with(|ep| ep.handler.start(&mut ep.engine, length, name.as_deref()))
        .ok_or_else(|| anyhow::anyhow!("Endpoint closed"))??;

    let start = Instant::now();
    let tick = config.stats_interval().unwrap_or(Duration::from_secs(1));
    let outcome = loop {
        match running.events().recv_timeout(tick) {
            Ok(Event::Outcome(status)) => break Some(status),
            Ok(Event::Closed) | Err(RecvTimeoutError::Disconnected) => break None,
            Err(RecvTimeoutError::Timeout) => {
                if config.stats_interval().is_some() {
                    let done = running.with(|ep| ep.handler.acked_bytes()).unwrap_or(0);
                    display_progress(done, length, start.elapsed());
                }
            }
        }
    };
    eprintln!();

    let state = running.with(|ep| ep.handler.state());
    if let Some(sender_stats) = running.with(|ep| ep.handler.stats().clone()) {
        display_sender_stats(&sender_stats);
    }
    display_link_stats(&running.link_stats());

    // the finished status reply is an ack payload; let it reach the wire
    std::thread::sleep(Duration::from_millis(100));
    running.close();

    match (outcome, state) {
        (Some(TransferStatus::Finished), Some(SenderState::Finished)) => {
            tracing::info!("Sent {} bytes in {:?}", length, start.elapsed());
            Ok(())
        }
        (Some(status), _) => anyhow::bail!("Transfer ended with {:?}", status),
        (None, _) => anyhow::bail!("Link closed before the transfer finished"),
    }
}
