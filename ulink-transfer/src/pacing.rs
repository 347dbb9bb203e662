//! Adaptive Chunk Pacing
//!
//! The sender spaces chunks `dt` ticks apart. Each status report from the
//! receiver says how many chunks got through since the previous one: few
//! deliveries widen the spacing, many narrow it, always within the
//! negotiated `[dt_min, dt_max]` range.

use crate::wire::TransferParams;

/// Reports acknowledging at most this many new chunks slow the sender down
pub const SLOWDOWN_THRESHOLD: u32 = 8;

/// Default pacing step in ticks
pub const DEFAULT_DDT: u32 = 1;

/// The receiver reports status every this many chunk intervals when idle
pub const STATUS_INTERVAL_FACTOR: u64 = 16;

/// Chunk interval controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacer {
    dt: u32,
    dt_min: u32,
    dt_max: u32,
    ddt: u32,
}

impl Pacer {
    /// Start at the initial interval of the negotiated parameters
    pub fn new(params: &TransferParams, ddt: u32) -> Self {
        Pacer {
            dt: params.initial_dt(),
            dt_min: params.dt_min,
            dt_max: params.dt_max,
            ddt,
        }
    }

    /// Current chunk interval
    pub fn interval(&self) -> u32 {
        self.dt
    }

    /// Adjust after a status report that acknowledged `newly_acked` chunks
    pub fn on_report(&mut self, newly_acked: u32) -> u32 {
        if newly_acked <= SLOWDOWN_THRESHOLD {
            self.dt = self.dt.saturating_add(self.ddt).min(self.dt_max);
        } else {
            let dt = if self.dt > self.ddt {
                self.dt - self.ddt
            } else {
                self.dt_min
            };
            self.dt = dt.max(self.dt_min);
        }
        self.dt
    }
}

/// Idle status interval for chunk interval `dt`
pub fn status_interval(dt: u32) -> u64 {
    (dt.max(1) as u64) * STATUS_INTERVAL_FACTOR
}
