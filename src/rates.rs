use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Update and refresh rates in events per second.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct Rates {
    pub update: f32,
    pub refresh: f32,
}

/// Counts events over a *sliding 1 s window*.
#[derive(Debug)]
pub struct RateCounter {
    window: Duration,
    events: VecDeque<Instant>,
}

impl Default for RateCounter {
    fn default() -> Self {
        Self::with_window(Duration::from_secs(1))
    }
}

impl RateCounter {
    /// Create a new RateCounter with a 1 s sliding window.
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_window(window: Duration) -> Self {
        RateCounter {
            window,
            events: VecDeque::new(),
        }
    }

    /// Record one event at `now`.
    pub fn record(&mut self, now: Instant) {
        self.events.push_back(now);
        self.evict(now);
    }

    /// Events per second over the window ending at `now`.
    pub fn rate(&mut self, now: Instant) -> f32 {
        self.evict(now);
        let secs = self.window.as_secs_f32().max(1e-6);
        self.events.len() as f32 / secs
    }

    // Evict any entries older than `window`
    fn evict(&mut self, now: Instant) {
        while let Some(&ts) = self.events.front() {
            if now.saturating_duration_since(ts) >= self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_reports_zero() {
        let mut counter = RateCounter::new();
        assert_eq!(counter.rate(Instant::now()), 0.0);
    }

    #[test]
    fn events_expire_after_one_second() {
        let t0 = Instant::now();
        let mut counter = RateCounter::new();
        for ms in [0, 100, 200, 300] {
            counter.record(t0 + Duration::from_millis(ms));
        }
        assert_eq!(counter.rate(t0 + Duration::from_millis(900)), 4.0);
        assert_eq!(counter.rate(t0 + Duration::from_millis(1150)), 2.0);
        assert_eq!(counter.rate(t0 + Duration::from_secs(5)), 0.0);
    }
}
