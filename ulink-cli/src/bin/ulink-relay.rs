//! ulink Relay - byte relay between two link peers
//!
//! Accepts two connections and copies bytes between them, optionally
//! flipping random bits to exercise the link's error recovery.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use ulink_cli::format_bytes;
use ulink_cli::noise::Noise;
use ulink::io::{StreamListener, StreamSocket};

#[derive(Parser, Debug)]
#[command(name = "ulink-relay")]
#[command(about = "Relay a ulink link between two peers", long_about = None)]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "127.0.0.1:7400")]
    listen: SocketAddr,

    /// Probability of a bit error per relayed byte
    #[arg(short, long, default_value = "0.0")]
    error_rate: f64,

    /// Seed for the error generator
    #[arg(long)]
    seed: Option<u64>,

    /// Statistics interval in seconds (0 disables)
    #[arg(long, default_value = "1")]
    stats: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Default)]
struct Counters {
    bytes: AtomicU64,
    flips: AtomicU64,
}

fn pump(from: StreamSocket, to: StreamSocket, mut noise: Noise, counters: Arc<Counters>) {
    let res = from.read_loop(|bytes| {
        let mut buf = bytes.to_vec();
        let flips = noise.corrupt(&mut buf);
        counters.bytes.fetch_add(buf.len() as u64, Ordering::Relaxed);
        counters.flips.fetch_add(flips, Ordering::Relaxed);
        if let Err(e) = to.write_all(&buf) {
            tracing::warn!("Relay write failed: {}", e);
        }
    });
    if let Err(e) = res {
        tracing::warn!("Relay read failed: {}", e);
    }
    let _ = to.shutdown();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    ulink_cli::init_logging(args.verbose);

    tracing::info!("ulink relay starting");
    tracing::info!("Bit error rate: {}", args.error_rate);

    let listener = StreamListener::bind(args.listen)?;
    tracing::info!("Listening on: {}", listener.local_addr()?);

    let (a, addr_a) = listener.accept()?;
    tracing::info!("First peer: {}", addr_a);
    let (b, addr_b) = listener.accept()?;
    tracing::info!("Second peer: {}", addr_b);

    let counters = Arc::new(Counters::default());
    // distinct streams per direction, still reproducible from one seed
    let seed_ba = args.seed.map(|s| s.wrapping_add(1));

    let forward = {
        let (from, to) = (a.try_clone()?, b.try_clone()?);
        let noise = Noise::new(args.error_rate, args.seed);
        let counters = counters.clone();
        thread::Builder::new()
            .name("relay-ab".to_string())
            .spawn(move || pump(from, to, noise, counters))?
    };
    let backward = {
        let noise = Noise::new(args.error_rate, seed_ba);
        let counters = counters.clone();
        thread::Builder::new()
            .name("relay-ba".to_string())
            .spawn(move || pump(b, a, noise, counters))?
    };

    let start = Instant::now();
    if args.stats > 0 {
        let counters = counters.clone();
        let interval = Duration::from_secs(args.stats);
        thread::spawn(move || loop {
            thread::sleep(interval);
            tracing::info!(
                "Stats: {} relayed, {} bit errors",
                format_bytes(counters.bytes.load(Ordering::Relaxed)),
                counters.flips.load(Ordering::Relaxed)
            );
        });
    }

    let _ = forward.join();
    let _ = backward.join();

    tracing::info!(
        "Relay finished after {:?}: {} relayed, {} bit errors",
        start.elapsed(),
        format_bytes(counters.bytes.load(Ordering::Relaxed)),
        counters.flips.load(Ordering::Relaxed)
    );
    Ok(())
}
