//! Statistics display and formatting

use std::io::Write;
use std::time::Duration;
use ulink_protocol::LinkStats;
use ulink_transfer::{ReceiverStats, SenderStats};

/// Byte count with binary units, e.g. `2.00 KB`
pub fn format_bytes(bytes: u64) -> String {
    scaled(bytes, 1024, &["B", "KB", "MB", "GB"])
}

/// Bit rate with decimal units, e.g. `10.00 Kbps`
pub fn format_bandwidth(bps: u64) -> String {
    scaled(bps, 1000, &["bps", "Kbps", "Mbps"])
}

fn scaled(value: u64, step: u64, units: &[&str]) -> String {
    let mut unit = 0;
    let mut div = 1u64;
    while unit + 1 < units.len() && value / div >= step {
        div *= step;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", value, units[0])
    } else {
        format!("{:.2} {}", value as f64 / div as f64, units[unit])
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match (secs / 3600, secs / 60 % 60, secs % 60) {
        (0, 0, s) => format!("{}s", s),
        (0, m, s) => format!("{}m {:02}s", m, s),
        (h, m, s) => format!("{}h {:02}m {:02}s", h, m, s),
    }
}

/// One-line progress: elapsed time, bytes done, percentage and rate
pub fn format_progress(done: u64, total: u64, elapsed: Duration) -> String {
    let percent = if total == 0 {
        100.0
    } else {
        done as f64 * 100.0 / total as f64
    };
    let millis = elapsed.as_millis() as u64;
    let rate = if millis > 0 { done * 8 * 1000 / millis } else { 0 };

    format!(
        "[{:>8}] {} / {} ({:5.1}%) {}",
        format_duration(elapsed),
        format_bytes(done),
        format_bytes(total),
        percent,
        format_bandwidth(rate)
    )
}

/// Print progress in place
pub fn display_progress(done: u64, total: u64, elapsed: Duration) {
    let mut out = std::io::stderr();
    let _ = write!(out, "\r{}    ", format_progress(done, total, elapsed));
    let _ = out.flush();
}

/// Display link statistics
pub fn display_link_stats(stats: &LinkStats) {
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│ LINK STATISTICS                             │");
    println!("├─────────────────────────────────────────────┤");
    println!(
        "│ Frames:      {} sent / {} received",
        stats.frames_sent, stats.frames_received
    );
    println!(
        "│ Bytes:       {} sent / {} received",
        format_bytes(stats.bytes_sent),
        format_bytes(stats.bytes_received)
    );
    println!(
        "│ Retransmits: {} ({} send timeouts)",
        stats.retransmits, stats.send_timeouts
    );
    println!(
        "│ Errors:      {} checksum / {} frame timeouts / {} garbage bytes",
        stats.checksum_errors, stats.frame_timeouts, stats.garbage_bytes
    );
    println!(
        "│ NACKs:       {} sent / {} received, {} duplicates",
        stats.nacks_sent, stats.nacks_received, stats.duplicates
    );
    println!("└─────────────────────────────────────────────┘");
}

pub fn display_sender_stats(stats: &SenderStats) {
    println!(
        "Chunks: {} sent ({} resent), {} payload, {} status reports ({} stale)",
        stats.chunks_sent,
        stats.chunks_resent,
        format_bytes(stats.bytes_sent),
        stats.reports_received,
        stats.stale_reports
    );
}

pub fn display_receiver_stats(stats: &ReceiverStats) {
    println!(
        "Chunks: {} received, {} stored ({}), {} duplicate, {} out of window, {} malformed, {} status reports",
        stats.chunks_received,
        stats.chunks_stored,
        format_bytes(stats.bytes_stored),
        stats.duplicates,
        stats.out_of_window,
        stats.malformed,
        stats.status_sent
    );
}
