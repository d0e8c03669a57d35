use crossbeam_channel::{tick, Receiver};
use std::{
    cell::Cell,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// Source of the current time.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
        }
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

/// Paces a loop. One call to `wait` is one loop period.
pub trait Ticker {
    fn wait(&mut self);
}

/// Ticker backed by a crossbeam `tick` channel.
pub struct SleepTicker {
    ticks: Receiver<Instant>,
}

impl SleepTicker {
    pub fn new(interval: Duration) -> Self {
        Self {
            ticks: tick(interval),
        }
    }
}

impl Ticker for SleepTicker {
    fn wait(&mut self) {
        let _ = self.ticks.recv();
    }
}

/// Ticker that never sleeps; it counts waits and can advance a ManualClock.
#[derive(Debug, Default)]
pub struct ManualTicker {
    pub waits: usize,
    step: Option<(ManualClock, Duration)>,
}

impl ManualTicker {
    pub fn new() -> Self {
        Default::default()
    }

    /// Advance `clock` by `step` on every wait.
    pub fn driving(clock: ManualClock, step: Duration) -> Self {
        Self {
            waits: 0,
            step: Some((clock, step)),
        }
    }
}

impl Ticker for ManualTicker {
    fn wait(&mut self) {
        self.waits += 1;
        if let Some((clock, step)) = &self.step {
            clock.advance(*step);
        }
    }
}

/// Shared stop flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Default::default()
    }

    pub(crate) fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_ticker_drives_clock() {
        let clock = ManualClock::new();
        let start = clock.now();
        let mut ticker = ManualTicker::driving(clock.clone(), Duration::from_millis(10));
        for _ in 0..3 {
            ticker.wait();
        }
        assert_eq!(ticker.waits, 3);
        assert_eq!(clock.now() - start, Duration::from_millis(30));
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }
}
