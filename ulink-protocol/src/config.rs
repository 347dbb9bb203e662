//! Link engine configuration

use crate::timer::Tick;
use serde::{Deserialize, Serialize};

/// Default number of retransmissions of an unacknowledged synced frame
pub const DEFAULT_RETRIES: u8 = 10;

/// Default delay between retransmissions
pub const DEFAULT_RETRY_DELAY: Tick = 40;

/// Default time allowed for a frame to arrive completely
pub const DEFAULT_RX_TIMEOUT: Tick = 2 * DEFAULT_RETRY_DELAY * DEFAULT_RETRIES as Tick;

/// Retransmission delay policy, indexed by the retry counter
///
/// The initial transmission arms the ack timer with `delay(0)`, the n-th
/// retransmission with `delay(n)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay for every attempt
    Constant { delay: Tick },
    /// `base + step * retry`
    Linear { base: Tick, step: Tick },
    /// `base * 2^retry`, capped at `max`
    Exponential { base: Tick, max: Tick },
    /// Caller supplied function
    #[serde(skip)]
    Custom(fn(u8) -> Tick),
}

impl Backoff {
    /// Delay before the ack timer for attempt `retry` expires
    pub fn delay(&self, retry: u8) -> Tick {
        match *self {
            Backoff::Constant { delay } => delay,
            Backoff::Linear { base, step } => base.saturating_add(step.saturating_mul(retry as Tick)),
            Backoff::Exponential { base, max } => {
                let factor = 1u64.checked_shl(retry as u32).unwrap_or(u64::MAX);
                base.saturating_mul(factor).min(max)
            }
            Backoff::Custom(f) => f(retry),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Constant {
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Link engine configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Ticks allowed between a preamble and the end of its frame
    pub rx_timeout: Tick,
    /// Retransmissions before a synced send is reported as timed out
    pub retries: u8,
    /// Answer garbage bytes with a not-preamble NACK once the stream resyncs
    pub nack_garbage: bool,
    /// Retransmission delay policy
    pub backoff: Backoff,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            rx_timeout: DEFAULT_RX_TIMEOUT,
            retries: DEFAULT_RETRIES,
            nack_garbage: false,
            backoff: Backoff::default(),
        }
    }
}

impl LinkConfig {
    /// Configuration with a constant retry delay
    pub fn with_retries(retries: u8, retry_delay: Tick, rx_timeout: Tick) -> Self {
        LinkConfig {
            rx_timeout,
            retries,
            nack_garbage: false,
            backoff: Backoff::Constant { delay: retry_delay },
        }
    }
}
