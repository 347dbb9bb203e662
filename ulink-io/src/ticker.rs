//! Thread-backed tick scheduler
//!
//! A [`Ticker`] owns a thread that sleeps until the pending deadline and
//! then runs the tick callback. [`TickerHandle`] is the `Scheduler` side
//! handed to an engine or transfer endpoint. The callback runs without the
//! ticker lock held, so it may request the next tick itself.

use crate::time::MonotonicClock;
use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use ulink_protocol::{Scheduler, Tick};

#[derive(Debug, Default)]
struct State {
    deadline: Option<Instant>,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    wakeup: Condvar,
}

/// Scheduler half of a [`Ticker`]
#[derive(Debug, Clone)]
pub struct TickerHandle {
    shared: Arc<Shared>,
    clock: MonotonicClock,
}

impl TickerHandle {
    /// True while a tick is pending
    pub fn is_pending(&self) -> bool {
        self.shared.state.lock().deadline.is_some()
    }
}

impl Scheduler for TickerHandle {
    fn now(&self) -> Tick {
        self.clock.now()
    }

    fn request_tick(&mut self, delta: Tick) {
        let mut state = self.shared.state.lock();
        state.deadline = Some(self.clock.deadline(delta));
        self.shared.wakeup.notify_one();
    }

    fn cancel_tick(&mut self) {
        let mut state = self.shared.state.lock();
        if state.deadline.take().is_some() {
            self.shared.wakeup.notify_one();
        }
    }
}

/// Timer thread delivering ticks to a callback
///
/// Dropping the ticker stops the thread.
pub struct Ticker {
    handle: TickerHandle,
    thread: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Spawn the timer thread
    ///
    /// Ticks are counted on `clock`, which should be shared with every other
    /// ticker of the same process so their `now` values agree.
    pub fn spawn<F>(name: &str, clock: MonotonicClock, mut on_tick: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let shared = Arc::new(Shared::default());
        let worker = shared.clone();

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                {
                    let mut state = worker.state.lock();
                    loop {
                        if state.shutdown {
                            return;
                        }
                        let deadline = state.deadline;
                        match deadline {
                            None => worker.wakeup.wait(&mut state),
                            Some(at) if at <= Instant::now() => {
                                state.deadline = None;
                                break;
                            }
                            Some(at) => {
                                worker.wakeup.wait_until(&mut state, at);
                            }
                        }
                    }
                }
                on_tick();
            })?;

        Ok(Ticker {
            handle: TickerHandle { shared, clock },
            thread: Some(thread),
        })
    }

    /// A scheduler handle for this ticker
    pub fn handle(&self) -> TickerHandle {
        self.handle.clone()
    }

    /// Stop the thread and wait for it
    pub fn shutdown(&mut self) {
        {
            let mut state = self.handle.shared.state.lock();
            state.shutdown = true;
            self.handle.shared.wakeup.notify_one();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("Ticker thread panicked");
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn test_tick_fires_once() {
        let count = Arc::new(AtomicU32::new(0));
        let seen = count.clone();
        let ticker = Ticker::spawn("test-ticker", MonotonicClock::new(), move || {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let mut handle = ticker.handle();
        handle.request_tick(5);
        assert!(handle.is_pending());
        thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!handle.is_pending());
    }

    #[test]
    fn test_cancel_prevents_tick() {
        let count = Arc::new(AtomicU32::new(0));
        let seen = count.clone();
        let ticker = Ticker::spawn("test-ticker", MonotonicClock::new(), move || {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let mut handle = ticker.handle();
        handle.request_tick(50);
        handle.cancel_tick();
        thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_can_rearm() {
        let count = Arc::new(AtomicU32::new(0));
        let slot: Arc<Mutex<Option<TickerHandle>>> = Arc::new(Mutex::new(None));

        let seen = count.clone();
        let rearm = slot.clone();
        let ticker = Ticker::spawn("test-ticker", MonotonicClock::new(), move || {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                if let Some(handle) = rearm.lock().as_mut() {
                    handle.request_tick(1);
                }
            }
        })
        .unwrap();

        let mut handle = ticker.handle();
        *slot.lock() = Some(handle.clone());
        handle.request_tick(1);
        thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
