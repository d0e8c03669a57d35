use crate::{Colormap, Depth, DisplayError, FrameView, Norm, Rates};
use serde::Deserialize;
use std::{cell::RefCell, rc::Rc};

/// What a surface needs to draw one frame.
#[derive(Clone, Copy, Debug)]
pub struct Paint<'a> {
    pub frame: FrameView<'a>,
    pub norm: Norm,
    pub colormap: Colormap,
    pub rates: Rates,
}

/// A window a DisplaySink renders into.
pub trait Surface {
    fn caption(&self) -> &str;
    fn present(&mut self, paint: &Paint<'_>) -> Result<(), DisplayError>;
    /// Polls pending window events; true once the window is gone.
    fn is_closed(&mut self) -> bool;
    fn close(&mut self);
}

/// Allocates surfaces.
pub trait Backend {
    fn create_window(&mut self, caption: &str) -> Result<Box<dyn Surface>, DisplayError>;
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq, Debug, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    Terminal,
    Headless,
}

impl SurfaceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SurfaceKind::Terminal => "terminal",
            SurfaceKind::Headless => "headless",
        }
    }
}

/// Copy of a frame as it was handed to a surface.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PresentedFrame {
    pub width: usize,
    pub height: usize,
    pub depth: Depth,
    pub data: Vec<u8>,
    pub norm: Norm,
}

#[derive(Debug, Default)]
struct HeadlessState {
    last: Option<PresentedFrame>,
    presents: usize,
    closed: bool,
}

/// Observer side of a headless surface.
#[derive(Debug, Clone)]
pub struct HeadlessProbe {
    state: Rc<RefCell<HeadlessState>>,
}

impl HeadlessProbe {
    pub fn last_frame(&self) -> Option<PresentedFrame> {
        self.state.borrow().last.clone()
    }

    pub fn presents(&self) -> usize {
        self.state.borrow().presents
    }

    /// Act as if the user closed the window.
    pub fn close(&self) {
        self.state.borrow_mut().closed = true;
    }
}

/// In-memory surface; keeps the last presented frame.
#[derive(Debug)]
pub struct HeadlessSurface {
    caption: String,
    state: Rc<RefCell<HeadlessState>>,
}

impl HeadlessSurface {
    pub fn new(caption: &str) -> (Self, HeadlessProbe) {
        let state = Rc::new(RefCell::new(HeadlessState::default()));
        let probe = HeadlessProbe {
            state: Rc::clone(&state),
        };
        (
            Self {
                caption: caption.to_string(),
                state,
            },
            probe,
        )
    }
}

impl Surface for HeadlessSurface {
    fn caption(&self) -> &str {
        &self.caption
    }

    fn present(&mut self, paint: &Paint<'_>) -> Result<(), DisplayError> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Ok(());
        }
        let frame = &paint.frame;
        log::trace!(
            "{}: presenting {}x{}x{} frame",
            self.caption,
            frame.width,
            frame.height,
            frame.depth.bytes()
        );
        state.last = Some(PresentedFrame {
            width: frame.width,
            height: frame.height,
            depth: frame.depth,
            data: frame.data.to_vec(),
            norm: paint.norm,
        });
        state.presents += 1;
        Ok(())
    }

    fn is_closed(&mut self) -> bool {
        self.state.borrow().closed
    }

    fn close(&mut self) {
        self.state.borrow_mut().closed = true;
    }
}

/// Backend handing out headless surfaces and remembering their probes.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    pub probes: Vec<HeadlessProbe>,
    unavailable: bool,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Default::default()
    }

    /// A backend whose window creation always fails.
    pub fn unavailable() -> Self {
        Self {
            probes: Vec::new(),
            unavailable: true,
        }
    }

    pub fn last_probe(&self) -> Option<HeadlessProbe> {
        self.probes.last().cloned()
    }
}

impl Backend for HeadlessBackend {
    fn create_window(&mut self, caption: &str) -> Result<Box<dyn Surface>, DisplayError> {
        if self.unavailable {
            return Err(DisplayError::WindowCreation(
                "no display available".to_string(),
            ));
        }
        let (surface, probe) = HeadlessSurface::new(caption);
        self.probes.push(probe);
        Ok(Box::new(surface))
    }
}
