//! ulink Receiver - receive one file over a ulink link

use clap::Parser;
use crossbeam::channel::RecvTimeoutError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use ulink_cli::stats::{display_progress, display_receiver_stats};
use ulink_cli::{display_link_stats, open_link, spawn, Config, Event};
use ulink::transfer::{FileSink, ReceiverState, TransferReceiver, TransferStatus};

/// How long to wait for the sender to confirm the end of the transfer
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "ulink-recv")]
#[command(about = "Receive a file over a ulink link", long_about = None)]
struct Args {
    /// Output file, or a directory to store the file under its announced name
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Connect to a sender or relay at this address
    #[arg(short, long)]
    connect: Option<SocketAddr>,

    /// Wait for the sender to connect on this address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Largest chunk size to accept
    #[arg(long)]
    mtu: Option<u16>,

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
    if let Some(stats) = args.stats {
        config.stats_interval_secs = stats;
    }
    config.validate()?;

    let sink = if args.output.is_dir() {
        tracing::info!("Storing into directory {}", args.output.display());
        FileSink::in_directory(&args.output)
    } else {
        tracing::info!("Writing to file: {}", args.output.display());
        FileSink::to_path(&args.output)
    };

    tracing::info!("ulink receiver starting");
    let socket = open_link(args.connect, args.listen)?;
    let params = config.transfer.params();
    let running = spawn(socket, config.link, move |timer, events| {
        TransferReceiver::new(params, sink, timer).with_listener(move |status| {
            let _ = events.send(Event::Outcome(status));
        })
    })?;

    let start = Instant::now();
    let tick = config.stats_interval().unwrap_or(Duration::from_secs(1));
    let outcome = loop {
        match running.events().recv_timeout(tick) {
            Ok(Event::Outcome(status)) => break Some(status),
            Ok(Event::Closed) | Err(RecvTimeoutError::Disconnected) => break None,
            Err(RecvTimeoutError::Timeout) => {
                let progress = running
                    .with(|ep| {
                        let done = ep.handler.contiguous_bytes();
                        ep.handler.length().map(|total| (done, total))
                    })
                    .flatten();
                if let (Some((done, total)), Some(_)) = (progress, config.stats_interval()) {
                    display_progress(done, total, start.elapsed());
                }
            }
        }
    };
    eprintln!();

    if outcome == Some(TransferStatus::Finished) {
        // keep the link up until the sender confirms the finished status
        let deadline = Instant::now() + CONFIRM_TIMEOUT;
        while Instant::now() < deadline {
            if running.with(|ep| ep.handler.state()) != Some(ReceiverState::Finishing) {
                break;
            }
            if let Ok(Event::Closed) = running.events().recv_timeout(Duration::from_millis(50)) {
                break;
            }
        }
    }

    if let Some(receiver_stats) = running.with(|ep| ep.handler.stats().clone()) {
        display_receiver_stats(&receiver_stats);
    }
    display_link_stats(&running.link_stats());
    let length = running.with(|ep| ep.handler.length()).flatten();
    running.close();

    match outcome {
        Some(TransferStatus::Finished) => {
            tracing::info!(
                "Received {} bytes in {:?}",
                length.unwrap_or(0),
                start.elapsed()
            );
            Ok(())
        }
        Some(status) => anyhow::bail!("Transfer ended with {:?}", status),
        None => anyhow::bail!("Link closed before the transfer finished"),
    }
}
