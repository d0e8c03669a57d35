use crate::{
    Backend, Clock, Colormap, DisplayError, FrameBuffer, Norm, Paint, RateCounter, Rates, Surface,
    SystemClock, TestImage,
};
use log::debug;
use std::{
    rc::Rc,
    time::{Duration, Instant},
};

/// How often auto-range normalisation is recomputed on a steady stream.
const NORMALIZE_PERIOD: Duration = Duration::from_secs(1);

/// Renders a FrameBuffer into one window and tracks update/refresh rates.
pub struct DisplaySink {
    surface: Box<dyn Surface>,
    buffer: FrameBuffer,
    rendered: Option<u64>,
    rendered_dims: Option<(usize, usize, usize)>,
    updates: RateCounter,
    refreshes: RateCounter,
    clock: Rc<dyn Clock>,
    norm: Norm,
    colormap: Colormap,
    force_normalize: bool,
    last_normalize: Option<Instant>,
}

impl DisplaySink {
    pub fn create_window(backend: &mut dyn Backend, caption: &str) -> Result<Self, DisplayError> {
        let surface = backend.create_window(caption)?;
        debug!("created window {caption:?}");
        Ok(Self::with_surface(surface))
    }

    pub fn with_surface(surface: Box<dyn Surface>) -> Self {
        Self {
            surface,
            buffer: FrameBuffer::new(),
            rendered: None,
            rendered_dims: None,
            updates: RateCounter::new(),
            refreshes: RateCounter::new(),
            clock: Rc::new(SystemClock),
            norm: Norm::default(),
            colormap: Colormap::default(),
            force_normalize: true,
            last_normalize: None,
        }
    }

    pub fn with_clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn caption(&self) -> &str {
        self.surface.caption()
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn set_buffer(
        &mut self,
        bytes: &[u8],
        width: usize,
        height: usize,
        depth: usize,
    ) -> Result<(), DisplayError> {
        self.buffer.set_buffer(bytes, width, height, depth)?;
        self.updates.record(self.clock.now());
        Ok(())
    }

    pub fn set_test_image(&mut self, mode: TestImage) {
        if self.buffer.set_test_image(mode) {
            self.force_normalize = true;
        }
        self.updates.record(self.clock.now());
    }

    pub fn test_image(&self) -> TestImage {
        self.buffer.test_image()
    }

    /// Re-render if the frame changed since the last refresh.
    pub fn refresh(&mut self) -> Result<(), DisplayError> {
        let generation = self.buffer.generation();
        if self.rendered == Some(generation) {
            return Ok(());
        }
        let Some(frame) = self.buffer.active() else {
            return Ok(());
        };

        let now = self.clock.now();
        let dims = Some((frame.width, frame.height, frame.depth.bytes()));
        let stale = self
            .last_normalize
            .map_or(true, |t| now.saturating_duration_since(t) >= NORMALIZE_PERIOD);
        if self.force_normalize || dims != self.rendered_dims || stale {
            self.norm.fit(&frame);
            self.last_normalize = Some(now);
            self.force_normalize = false;
        }

        let paint = Paint {
            frame,
            norm: self.norm,
            colormap: self.colormap,
            rates: Rates {
                update: self.updates.rate(now),
                refresh: self.refreshes.rate(now),
            },
        };
        self.surface.present(&paint)?;
        self.rendered = Some(generation);
        self.rendered_dims = dims;
        self.refreshes.record(now);
        Ok(())
    }

    pub fn is_closed(&mut self) -> bool {
        self.surface.is_closed()
    }

    pub fn close_window(&mut self) {
        self.surface.close();
    }

    pub fn rates(&mut self) -> Rates {
        let now = self.clock.now();
        Rates {
            update: self.updates.rate(now),
            refresh: self.refreshes.rate(now),
        }
    }

    pub fn norm(&self) -> Norm {
        self.norm
    }

    pub fn set_norm(&mut self, norm: Norm) {
        self.norm = norm;
        self.force_normalize = true;
        // force a redraw with the new window
        self.rendered = None;
    }

    pub fn set_colormap(&mut self, colormap: Colormap) {
        self.colormap = colormap;
        self.rendered = None;
    }
}

impl Drop for DisplaySink {
    fn drop(&mut self) {
        self.surface.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Depth, HeadlessBackend, ManualClock};

    fn sink_with_clock() -> (DisplaySink, crate::HeadlessProbe, ManualClock) {
        let mut backend = HeadlessBackend::new();
        let clock = ManualClock::new();
        let sink = DisplaySink::create_window(&mut backend, "test")
            .unwrap()
            .with_clock(Rc::new(clock.clone()));
        (sink, backend.last_probe().unwrap(), clock)
    }

    #[test]
    fn refresh_renders_exact_payload() {
        let (mut sink, probe, _) = sink_with_clock();
        for (w, h, d) in [(1, 1, 1), (3, 2, 2), (2, 5, 4)] {
            let payload: Vec<u8> = (0..w * h * d).map(|b| (b * 7) as u8).collect();
            sink.set_buffer(&payload, w, h, d).unwrap();
            sink.refresh().unwrap();
            let shown = probe.last_frame().unwrap();
            assert_eq!((shown.width, shown.height, shown.depth.bytes()), (w, h, d));
            assert_eq!(shown.data, payload);
        }
    }

    #[test]
    fn refresh_without_change_is_noop() {
        let (mut sink, probe, _) = sink_with_clock();
        sink.refresh().unwrap();
        assert_eq!(probe.presents(), 0);

        sink.set_buffer(&[1, 2, 3, 4], 2, 2, 1).unwrap();
        sink.refresh().unwrap();
        sink.refresh().unwrap();
        assert_eq!(probe.presents(), 1);
    }

    #[test]
    fn rejected_buffer_leaves_display_alone() {
        let (mut sink, probe, _) = sink_with_clock();
        sink.set_buffer(&[9; 4], 2, 2, 1).unwrap();
        sink.refresh().unwrap();

        assert!(sink.set_buffer(&[0; 3], 2, 2, 1).is_err());
        sink.refresh().unwrap();
        assert_eq!(probe.presents(), 1);
        assert_eq!(probe.last_frame().unwrap().data, vec![9; 4]);
    }

    #[test]
    fn rates_count_one_update_and_one_refresh() {
        let (mut sink, _probe, clock) = sink_with_clock();
        assert_eq!(sink.rates(), Rates::default());

        sink.set_buffer(&[0; 4], 2, 2, 1).unwrap();
        sink.refresh().unwrap();
        clock.advance(Duration::from_millis(500));
        assert_eq!(
            sink.rates(),
            Rates {
                update: 1.0,
                refresh: 1.0
            }
        );

        clock.advance(Duration::from_secs(1));
        assert_eq!(sink.rates(), Rates::default());
    }

    #[test]
    fn test_image_on_zero_frame() {
        let (mut sink, probe, _) = sink_with_clock();
        sink.set_buffer(&[0; 16], 4, 4, 1).unwrap();
        sink.set_test_image(TestImage::Pattern);
        sink.refresh().unwrap();

        let shown = probe.last_frame().unwrap();
        assert_eq!((shown.width, shown.height, shown.depth), (4, 4, Depth::U8));
        assert_ne!(shown.data, vec![0; 16]);
    }

    #[test]
    fn auto_range_follows_frames_and_manual_norm_sticks() {
        let (mut sink, probe, clock) = sink_with_clock();
        sink.set_buffer(&[10, 20, 30, 40], 2, 2, 1).unwrap();
        sink.refresh().unwrap();
        assert_eq!((sink.norm().min, sink.norm().max), (10, 40));

        // within the normalisation period the window is not recomputed
        sink.set_buffer(&[0, 20, 30, 90], 2, 2, 1).unwrap();
        sink.refresh().unwrap();
        assert_eq!((sink.norm().min, sink.norm().max), (10, 40));

        clock.advance(NORMALIZE_PERIOD);
        sink.set_buffer(&[0, 20, 30, 90], 2, 2, 1).unwrap();
        sink.refresh().unwrap();
        assert_eq!((sink.norm().min, sink.norm().max), (0, 90));

        let manual = Norm {
            min: 5,
            max: 6,
            auto_range: false,
        };
        sink.set_norm(manual);
        sink.refresh().unwrap();
        assert_eq!(sink.norm(), manual);
        assert_eq!(probe.last_frame().unwrap().norm, manual);
    }

    #[test]
    fn closing_the_window_is_observed() {
        let (mut sink, probe, _) = sink_with_clock();
        assert!(!sink.is_closed());
        probe.close();
        assert!(sink.is_closed());
    }

    #[test]
    fn unavailable_backend_fails_window_creation() {
        let mut backend = HeadlessBackend::unavailable();
        let err = DisplaySink::create_window(&mut backend, "x").err().unwrap();
        assert!(matches!(err, DisplayError::WindowCreation(_)));
    }
}
