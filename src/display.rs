use crate::{
    Backend, BridgeState, Clock, DisplayError, DisplaySink, Norm, Rates, SharedArrayBridge,
    SharedArrayHandle, SystemClock, TestImage,
};
use log::debug;
use std::{
    rc::Rc,
    time::{Duration, Instant},
};

/// Common face of every viewer variant driven by the RefreshScheduler.
pub trait LiveDisplay {
    fn caption(&self) -> &str;
    fn refresh(&mut self) -> Result<(), DisplayError>;
    fn is_closed(&mut self) -> bool;
    fn rates(&mut self) -> Rates;
    fn set_test_image(&mut self, mode: TestImage) -> Result<(), DisplayError>;
    fn test_image(&self) -> TestImage;
    fn norm(&mut self) -> Norm;
    fn set_norm(&mut self, norm: Norm) -> Result<(), DisplayError>;
}

/// A plain sink is the basic buffer display: callers push frames with
/// `set_buffer` and poll `refresh`.
impl LiveDisplay for DisplaySink {
    fn caption(&self) -> &str {
        DisplaySink::caption(self)
    }

    fn refresh(&mut self) -> Result<(), DisplayError> {
        DisplaySink::refresh(self)
    }

    fn is_closed(&mut self) -> bool {
        DisplaySink::is_closed(self)
    }

    fn rates(&mut self) -> Rates {
        DisplaySink::rates(self)
    }

    fn set_test_image(&mut self, mode: TestImage) -> Result<(), DisplayError> {
        DisplaySink::set_test_image(self, mode);
        Ok(())
    }

    fn test_image(&self) -> TestImage {
        DisplaySink::test_image(self)
    }

    fn norm(&mut self) -> Norm {
        DisplaySink::norm(self)
    }

    fn set_norm(&mut self, norm: Norm) -> Result<(), DisplayError> {
        DisplaySink::set_norm(self, norm);
        Ok(())
    }
}

/// Shared-array display polled from the caller's loop.
pub struct LocalSpsDisplay {
    // declared first so the window goes before the bridge
    sink: DisplaySink,
    bridge: SharedArrayBridge,
    reattach: Option<Duration>,
    last_attach: Option<Instant>,
    clock: Rc<dyn Clock>,
}

impl LocalSpsDisplay {
    pub fn create_window(backend: &mut dyn Backend, caption: &str) -> Result<Self, DisplayError> {
        Ok(Self {
            sink: DisplaySink::create_window(backend, caption)?,
            bridge: SharedArrayBridge::new(),
            reattach: None,
            last_attach: None,
            clock: Rc::new(SystemClock),
        })
    }

    /// Retry attaching at most once per `interval` while idle or disconnected.
    pub fn with_reattach(mut self, interval: Option<Duration>) -> Self {
        self.reattach = interval;
        self
    }

    pub fn with_clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.sink = self.sink.with_clock(Rc::clone(&clock));
        self.clock = clock;
        self
    }

    /// Follow `namespace`/`name`. `ArrayNotFound` leaves the display idle
    /// with the handle recorded for later attach attempts.
    pub fn set_spec_array(&mut self, namespace: &str, name: &str) -> Result<(), DisplayError> {
        self.last_attach = Some(self.clock.now());
        self.bridge.set_spec_array(namespace, name)
    }

    pub fn spec_array(&self) -> Option<&SharedArrayHandle> {
        self.bridge.spec_array()
    }

    pub fn bridge_state(&self) -> BridgeState {
        self.bridge.state()
    }

    pub fn sink(&mut self) -> &mut DisplaySink {
        &mut self.sink
    }

    fn maybe_reattach(&mut self) {
        let Some(interval) = self.reattach else {
            return;
        };
        if self.bridge.state() == BridgeState::Connected || self.bridge.spec_array().is_none() {
            return;
        }
        let now = self.clock.now();
        if self
            .last_attach
            .is_some_and(|t| now.saturating_duration_since(t) < interval)
        {
            return;
        }
        self.last_attach = Some(now);
        if let Err(e) = self.bridge.attach() {
            debug!("{}: attach retry failed: {e}", self.sink.caption());
        }
    }
}

impl LiveDisplay for LocalSpsDisplay {
    fn caption(&self) -> &str {
        self.sink.caption()
    }

    fn refresh(&mut self) -> Result<(), DisplayError> {
        self.maybe_reattach();
        self.bridge.poll(&mut self.sink)?;
        self.sink.refresh()
    }

    fn is_closed(&mut self) -> bool {
        self.sink.is_closed()
    }

    fn rates(&mut self) -> Rates {
        self.sink.rates()
    }

    fn set_test_image(&mut self, mode: TestImage) -> Result<(), DisplayError> {
        self.sink.set_test_image(mode);
        Ok(())
    }

    fn test_image(&self) -> TestImage {
        self.sink.test_image()
    }

    fn norm(&mut self) -> Norm {
        self.sink.norm()
    }

    fn set_norm(&mut self, norm: Norm) -> Result<(), DisplayError> {
        self.sink.set_norm(norm);
        Ok(())
    }
}
