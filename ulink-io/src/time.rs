//! Time sources
//!
//! Link ticks are milliseconds. [`MonotonicClock`] counts them from its
//! creation; [`ManualClock`] only moves when told to, for simulations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use ulink_protocol::Tick;

/// Wall duration of one tick
pub const TICK: Duration = Duration::from_millis(1);

/// Monotonic millisecond clock
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            origin: Instant::now(),
        }
    }

    /// Ticks since the clock was created
    #[inline]
    pub fn now(&self) -> Tick {
        self.origin
            .elapsed()
            .as_millis()
            .try_into()
            .unwrap_or(Tick::MAX)
    }

    /// Instant `delta` ticks from now
    pub fn deadline(&self, delta: Tick) -> Instant {
        Instant::now() + ticks_to_duration(delta)
    }
}

/// Convert ticks to wall time
pub fn ticks_to_duration(ticks: Tick) -> Duration {
    TICK.saturating_mul(u32::try_from(ticks).unwrap_or(u32::MAX))
}

/// Shared virtual clock
///
/// Clones observe the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn now(&self) -> Tick {
        self.now.load(Ordering::Acquire)
    }

    /// Move forward by `delta` ticks
    pub fn advance(&self, delta: Tick) {
        self.now.fetch_add(delta, Ordering::AcqRel);
    }

    /// Jump to `at`; time never moves backwards
    pub fn advance_to(&self, at: Tick) {
        self.now.fetch_max(at, Ordering::AcqRel);
    }
}
