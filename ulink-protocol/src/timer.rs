//! Dual Countdown Timer Coordination
//!
//! The link engine needs two independent timers: the frame timeout, armed
//! while a frame is being received, and the ack-retry timer, armed while a
//! synced frame waits for its acknowledgement. The platform only provides a
//! single one-shot timer, so this module keeps both countdowns in software
//! and tells the caller how to steer the physical timer.
//!
//! Every operation first fast-forwards both countdowns by the ticks elapsed
//! since they were last adjusted (floored at zero), so repeated re-arming
//! does not accumulate drift. While the physical timer is armed it is aimed
//! at the earliest armed countdown.

/// Scheduler time unit
pub type Tick = u64;

/// Logical timers multiplexed onto the physical timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// A started frame must complete before this expires
    Frame,
    /// The outstanding synced frame is retransmitted when this expires
    AckRetry,
}

/// What the caller must do with the physical timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// Leave the physical timer alone
    Keep,
    /// Request a tick `delta` from now (no request pending)
    Arm(Tick),
    /// Cancel the pending request, then request a tick `delta` from now
    Rearm(Tick),
    /// Cancel the pending request
    Cancel,
}

/// Countdowns that reached zero on a physical tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Expired {
    pub frame: bool,
    pub ack_retry: bool,
}

impl Expired {
    pub fn any(&self) -> bool {
        self.frame || self.ack_retry
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Countdown {
    armed: bool,
    remaining: Tick,
    since: Tick,
}

impl Countdown {
    fn advance(&mut self, now: Tick) {
        if self.armed {
            let elapsed = now.saturating_sub(self.since);
            self.since = now;
            self.remaining = self.remaining.saturating_sub(elapsed);
        }
    }

    fn pending(&self) -> Option<Tick> {
        self.armed.then_some(self.remaining)
    }
}

/// Two software countdowns driving one physical timer
#[derive(Debug, Clone, Default)]
pub struct TimerCoordinator {
    frame: Countdown,
    ack_retry: Countdown,
    physical_armed: bool,
}

impl TimerCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, kind: TimerKind) -> (&mut Countdown, &mut Countdown) {
        match kind {
            TimerKind::Frame => (&mut self.frame, &mut self.ack_retry),
            TimerKind::AckRetry => (&mut self.ack_retry, &mut self.frame),
        }
    }

    fn advance(&mut self, now: Tick) {
        self.frame.advance(now);
        self.ack_retry.advance(now);
    }

    /// Arm (or re-arm) countdown `kind` to expire `delta` ticks from `now`
    pub fn arm(&mut self, kind: TimerKind, delta: Tick, now: Tick) -> TimerAction {
        self.advance(now);
        let physical_armed = self.physical_armed;
        let (this, other) = self.slot(kind);
        *this = Countdown {
            armed: true,
            remaining: delta,
            since: now,
        };

        let target = match other.pending() {
            // the other countdown fires first and already owns the timer
            Some(other_remaining) if other_remaining <= delta && physical_armed => {
                return TimerAction::Keep
            }
            Some(other_remaining) if other_remaining <= delta => other_remaining,
            _ => delta,
        };

        self.physical_armed = true;
        if physical_armed {
            TimerAction::Rearm(target)
        } else {
            TimerAction::Arm(target)
        }
    }

    /// Disarm countdown `kind`
    pub fn cancel(&mut self, kind: TimerKind, now: Tick) -> TimerAction {
        self.advance(now);
        let physical_armed = self.physical_armed;
        let (this, other) = self.slot(kind);
        let was_armed = this.armed;
        let cancelled_remaining = this.remaining;
        this.armed = false;

        if !was_armed {
            return TimerAction::Keep;
        }
        match other.pending() {
            Some(other_remaining) if other_remaining > cancelled_remaining || !physical_armed => {
                self.physical_armed = true;
                if physical_armed {
                    TimerAction::Rearm(other_remaining)
                } else {
                    TimerAction::Arm(other_remaining)
                }
            }
            Some(_) => TimerAction::Keep,
            None => {
                self.physical_armed = false;
                if physical_armed {
                    TimerAction::Cancel
                } else {
                    TimerAction::Keep
                }
            }
        }
    }

    /// The physical timer fired; disarm and report the countdowns at zero
    ///
    /// The caller runs the expiry handlers and then calls [`reschedule`],
    /// which aims the physical timer at whatever is still armed.
    ///
    /// [`reschedule`]: TimerCoordinator::reschedule
    pub fn fire(&mut self, now: Tick) -> Expired {
        self.advance(now);
        self.physical_armed = false;

        let mut expired = Expired::default();
        if self.frame.armed && self.frame.remaining == 0 {
            self.frame.armed = false;
            expired.frame = true;
        }
        if self.ack_retry.armed && self.ack_retry.remaining == 0 {
            self.ack_retry.armed = false;
            expired.ack_retry = true;
        }
        expired
    }

    /// Re-arm the physical timer for lingering countdowns after a fire
    pub fn reschedule(&mut self, now: Tick) -> TimerAction {
        if self.physical_armed {
            return TimerAction::Keep;
        }
        self.advance(now);
        let next = match (self.frame.pending(), self.ack_retry.pending()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        match next {
            Some(delta) => {
                self.physical_armed = true;
                TimerAction::Arm(delta)
            }
            None => TimerAction::Keep,
        }
    }

    /// Ticks left on countdown `kind`, `None` when disarmed
    pub fn remaining(&self, kind: TimerKind, now: Tick) -> Option<Tick> {
        let countdown = match kind {
            TimerKind::Frame => &self.frame,
            TimerKind::AckRetry => &self.ack_retry,
        };
        countdown
            .pending()
            .map(|r| r.saturating_sub(now.saturating_sub(countdown.since)))
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::Frame => self.frame.armed,
            TimerKind::AckRetry => self.ack_retry.armed,
        }
    }

    /// True while a physical tick is requested
    pub fn physical_armed(&self) -> bool {
        self.physical_armed
    }
}
