pub mod acquisition;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod display;
pub mod error;
pub mod forked;
pub mod frame;
pub mod process;
pub mod rates;
pub mod render;
pub mod scheduler;
pub mod shm;
pub mod signals;
pub mod simulator;
pub mod sink;
pub mod surface;
pub mod tui;

pub use acquisition::{AcqMonitor, AcqSettings, AcqState, AcqStatus, Acquisition};
pub use bridge::{BridgeState, SharedArrayBridge};
pub use clock::{CancelToken, Clock, ManualClock, ManualTicker, SleepTicker, SystemClock, Ticker};
pub use config::Conf;
pub use display::{LiveDisplay, LocalSpsDisplay};
pub use error::DisplayError;
pub use forked::{run_renderer, ForkedSpsDisplay, RenderSpec, RendererOptions};
pub use frame::{Depth, FrameBuffer, FrameView, TestImage};
pub use process::ManagedChild;
pub use rates::{RateCounter, Rates};
pub use render::{Colormap, Norm};
pub use scheduler::{
    RateReporter, RefreshScheduler, SchedulerExit, SchedulerHook, TestImageAlternator,
};
pub use shm::{ArrayInfo, ReadOutcome, SharedArrayHandle, SharedArrayReader, SharedArrayWriter};
pub use simulator::{FrameBuilder, GaussPeak};
pub use sink::DisplaySink;
pub use surface::{
    Backend, HeadlessBackend, HeadlessProbe, HeadlessSurface, Paint, PresentedFrame, Surface,
    SurfaceKind,
};
pub use tui::{TerminalBackend, TerminalHost, TerminalSurface};
