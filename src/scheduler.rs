use crate::{CancelToken, Clock, LiveDisplay, Ticker};
use log::{info, warn};
use std::{
    rc::Rc,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerExit {
    Cancelled,
    AllClosed,
}

/// Optional instrumentation run once per tick after the wait.
pub trait SchedulerHook {
    fn after_tick(&mut self, displays: &mut [Box<dyn LiveDisplay>]);
}

/// Cooperative refresh loop over a set of displays.
pub struct RefreshScheduler<T: Ticker> {
    displays: Vec<Box<dyn LiveDisplay>>,
    hooks: Vec<Box<dyn SchedulerHook>>,
    ticker: T,
    cancel: CancelToken,
}

impl<T: Ticker> RefreshScheduler<T> {
    pub fn new(ticker: T, cancel: CancelToken) -> Self {
        Self {
            displays: Vec::new(),
            hooks: Vec::new(),
            ticker,
            cancel,
        }
    }

    pub fn register(&mut self, display: Box<dyn LiveDisplay>) {
        info!("registered display {:?}", display.caption());
        self.displays.push(display);
    }

    pub fn add_hook(&mut self, hook: Box<dyn SchedulerHook>) {
        self.hooks.push(hook);
    }

    pub fn displays(&self) -> &[Box<dyn LiveDisplay>] {
        &self.displays
    }

    pub fn ticker(&self) -> &T {
        &self.ticker
    }

    /// One loop iteration: refresh, wait, hooks, reap closed displays.
    /// Returns the number of displays still registered.
    pub fn tick(&mut self) -> usize {
        for display in self.displays.iter_mut() {
            if let Err(e) = display.refresh() {
                warn!("{}: refresh failed: {e}", display.caption());
            }
        }

        self.ticker.wait();

        for hook in self.hooks.iter_mut() {
            hook.after_tick(&mut self.displays);
        }

        self.displays.retain_mut(|display| {
            let closed = display.is_closed();
            if closed {
                info!("display {:?} closed", display.caption());
            }
            !closed
        });
        self.displays.len()
    }

    /// Run until cancelled or every display is closed.
    pub fn run(&mut self) -> SchedulerExit {
        loop {
            if self.cancel.is_cancelled() {
                return SchedulerExit::Cancelled;
            }
            if self.displays.is_empty() || self.tick() == 0 {
                return SchedulerExit::AllClosed;
            }
        }
    }

    /// Drop every display, in registration order.
    pub fn close_all(&mut self) {
        for display in self.displays.drain(..) {
            info!("closing display {:?}", display.caption());
            drop(display);
        }
    }
}

/// Logs every display's rates once per period.
pub struct RateReporter {
    period: Duration,
    last: Instant,
    clock: Rc<dyn Clock>,
}

impl RateReporter {
    pub fn new(period: Duration, clock: Rc<dyn Clock>) -> Self {
        Self {
            period,
            last: clock.now(),
            clock,
        }
    }
}

impl SchedulerHook for RateReporter {
    fn after_tick(&mut self, displays: &mut [Box<dyn LiveDisplay>]) {
        let now = self.clock.now();
        if now.saturating_duration_since(self.last) < self.period {
            return;
        }
        self.last = now;
        for display in displays.iter_mut() {
            let rates = display.rates();
            info!(
                "{}: update: {:.1}, refresh: {:.1}",
                display.caption(),
                rates.update,
                rates.refresh
            );
        }
    }
}

/// Toggles the test image on every display once per period.
pub struct TestImageAlternator {
    period: Duration,
    last: Instant,
    clock: Rc<dyn Clock>,
}

impl TestImageAlternator {
    pub fn new(period: Duration, clock: Rc<dyn Clock>) -> Self {
        Self {
            period,
            last: clock.now(),
            clock,
        }
    }
}

impl SchedulerHook for TestImageAlternator {
    fn after_tick(&mut self, displays: &mut [Box<dyn LiveDisplay>]) {
        let now = self.clock.now();
        if now.saturating_duration_since(self.last) < self.period {
            return;
        }
        self.last = now;
        for display in displays.iter_mut() {
            let mode = display.test_image().toggled();
            info!("{}: setting test image to {mode:?}", display.caption());
            if let Err(e) = display.set_test_image(mode) {
                warn!("{}: cannot set test image: {e}", display.caption());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        DisplayError, DisplaySink, HeadlessBackend, ManualClock, ManualTicker, Norm, Rates,
        TestImage,
    };
    use std::cell::Cell;

    /// Display whose refresh always fails and which closes after `life` ticks.
    struct Flaky {
        refreshes: Rc<Cell<usize>>,
        life: usize,
    }

    impl LiveDisplay for Flaky {
        fn caption(&self) -> &str {
            "flaky"
        }
        fn refresh(&mut self) -> Result<(), DisplayError> {
            self.refreshes.set(self.refreshes.get() + 1);
            Err(DisplayError::Renderer("transient".to_string()))
        }
        fn is_closed(&mut self) -> bool {
            self.refreshes.get() >= self.life
        }
        fn rates(&mut self) -> Rates {
            Rates::default()
        }
        fn set_test_image(&mut self, _: TestImage) -> Result<(), DisplayError> {
            Ok(())
        }
        fn test_image(&self) -> TestImage {
            TestImage::Off
        }
        fn norm(&mut self) -> Norm {
            Norm::default()
        }
        fn set_norm(&mut self, _: Norm) -> Result<(), DisplayError> {
            Ok(())
        }
    }

    fn headless(backend: &mut HeadlessBackend, caption: &str) -> Box<dyn LiveDisplay> {
        let mut sink = DisplaySink::create_window(backend, caption).unwrap();
        sink.set_buffer(&[1, 2, 3, 4], 2, 2, 1).unwrap();
        Box::new(sink)
    }

    #[test]
    fn closing_one_display_keeps_the_other_running() {
        let mut backend = HeadlessBackend::new();
        let mut scheduler = RefreshScheduler::new(ManualTicker::new(), CancelToken::new());
        scheduler.register(headless(&mut backend, "first"));
        scheduler.register(headless(&mut backend, "second"));
        let (first, second) = (backend.probes[0].clone(), backend.probes[1].clone());

        assert_eq!(scheduler.tick(), 2);
        first.close();
        assert_eq!(scheduler.tick(), 1);
        assert_eq!(scheduler.displays()[0].caption(), "second");
        assert_eq!(scheduler.tick(), 1);

        second.close();
        assert_eq!(scheduler.run(), SchedulerExit::AllClosed);
        assert!(scheduler.displays().is_empty());
        assert_eq!(second.presents(), 1);
    }

    #[test]
    fn failing_display_does_not_stop_others() {
        let mut backend = HeadlessBackend::new();
        let refreshes = Rc::new(Cell::new(0));
        let mut scheduler = RefreshScheduler::new(ManualTicker::new(), CancelToken::new());
        scheduler.register(Box::new(Flaky {
            refreshes: Rc::clone(&refreshes),
            life: 3,
        }));
        scheduler.register(headless(&mut backend, "steady"));

        for _ in 0..3 {
            scheduler.tick();
        }
        assert_eq!(refreshes.get(), 3);
        assert_eq!(scheduler.displays().len(), 1);
        assert_eq!(backend.probes[0].presents(), 1);
    }

    #[test]
    fn cancel_stops_the_loop() {
        let mut backend = HeadlessBackend::new();
        let cancel = CancelToken::new();
        let mut scheduler = RefreshScheduler::new(ManualTicker::new(), cancel.clone());
        scheduler.register(headless(&mut backend, "only"));
        cancel.cancel();
        assert_eq!(scheduler.run(), SchedulerExit::Cancelled);
        assert_eq!(scheduler.ticker().waits, 0);
        assert_eq!(scheduler.displays().len(), 1);
    }

    #[test]
    fn empty_scheduler_ends_immediately() {
        let mut scheduler = RefreshScheduler::new(ManualTicker::new(), CancelToken::new());
        assert_eq!(scheduler.run(), SchedulerExit::AllClosed);
    }

    #[test]
    fn alternator_toggles_once_per_period() {
        let clock = ManualClock::new();
        let mut backend = HeadlessBackend::new();
        let mut scheduler = RefreshScheduler::new(
            ManualTicker::driving(clock.clone(), Duration::from_millis(500)),
            CancelToken::new(),
        );
        scheduler.register(headless(&mut backend, "alt"));
        scheduler.add_hook(Box::new(TestImageAlternator::new(
            Duration::from_secs(1),
            Rc::new(clock.clone()),
        )));

        scheduler.tick();
        assert_eq!(scheduler.displays()[0].test_image(), TestImage::Off);
        scheduler.tick();
        assert_eq!(scheduler.displays()[0].test_image(), TestImage::Pattern);
        scheduler.tick();
        scheduler.tick();
        assert_eq!(scheduler.displays()[0].test_image(), TestImage::Off);
    }
}
