//! Virtual-time scheduler
//!
//! [`ManualScheduler`] records the pending request as an absolute deadline
//! on a [`ManualClock`]. A simulation loop looks for the earliest deadline
//! among its schedulers, advances the clock there and delivers the tick.

use crate::time::ManualClock;
use parking_lot::Mutex;
use std::sync::Arc;
use ulink_protocol::{Scheduler, Tick};

/// Single-slot scheduler on virtual time
///
/// Clones share the pending slot, so the driver can keep a handle while the
/// engine owns another.
#[derive(Debug, Clone)]
pub struct ManualScheduler {
    clock: ManualClock,
    deadline: Arc<Mutex<Option<Tick>>>,
}

impl ManualScheduler {
    pub fn new(clock: ManualClock) -> Self {
        ManualScheduler {
            clock,
            deadline: Arc::new(Mutex::new(None)),
        }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Absolute time of the pending tick
    pub fn deadline(&self) -> Option<Tick> {
        *self.deadline.lock()
    }

    /// Consume the pending tick if it is due
    ///
    /// The slot is cleared before returning so the tick handler may request
    /// the next one.
    pub fn take_due(&self) -> bool {
        let mut deadline = self.deadline.lock();
        match *deadline {
            Some(at) if at <= self.clock.now() => {
                *deadline = None;
                true
            }
            _ => false,
        }
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Tick {
        self.clock.now()
    }

    fn request_tick(&mut self, delta: Tick) {
        *self.deadline.lock() = Some(self.clock.now().saturating_add(delta));
    }

    fn cancel_tick(&mut self) {
        *self.deadline.lock() = None;
    }
}
