use crate::{CancelToken, FrameBuilder, SharedArrayHandle, SharedArrayWriter};
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::tick;
use log::{error, info};
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AcqStatus {
    Ready,
    Running,
    Fault,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AcqState {
    pub status: AcqStatus,
    /// Index of the last frame published, if any.
    pub last_image_ready: Option<u64>,
}

/// Read-only view of an acquisition's state, shareable across threads.
#[derive(Clone, Debug)]
pub struct AcqMonitor(Arc<Mutex<AcqState>>);

impl AcqMonitor {
    pub fn state(&self) -> AcqState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AcqSettings {
    pub exp_time: Duration,
    /// 0 runs until stopped.
    pub nb_frames: u64,
}

/// Drives a FrameBuilder into a shared array from a background thread.
pub struct Acquisition {
    handle: SharedArrayHandle,
    settings: AcqSettings,
    builder: Option<FrameBuilder>,
    writer: Option<SharedArrayWriter>,
    state: Arc<Mutex<AcqState>>,
    stop: CancelToken,
    thread: Option<JoinHandle<Result<(SharedArrayWriter, FrameBuilder)>>>,
}

impl Acquisition {
    pub fn new(handle: SharedArrayHandle, builder: FrameBuilder, settings: AcqSettings) -> Self {
        Self {
            handle,
            settings,
            builder: Some(builder),
            writer: None,
            state: Arc::new(Mutex::new(AcqState {
                status: AcqStatus::Ready,
                last_image_ready: None,
            })),
            stop: CancelToken::new(),
            thread: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, AcqState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handle(&self) -> &SharedArrayHandle {
        &self.handle
    }

    pub fn state(&self) -> AcqState {
        *self.lock()
    }

    pub fn status(&self) -> AcqStatus {
        self.lock().status
    }

    pub fn monitor(&self) -> AcqMonitor {
        AcqMonitor(Arc::clone(&self.state))
    }

    /// Create (or recreate) the shared array sized for the builder's frames.
    pub fn prepare(&mut self) -> Result<()> {
        if self.thread.is_some() {
            return Err(anyhow!("acquisition on {} is running", self.handle));
        }
        let builder = self
            .builder
            .as_mut()
            .context("frame builder lost after a failed run")?;
        let (width, height, depth) = builder.dimensions();
        builder.reset();
        self.writer = None;
        let writer = SharedArrayWriter::create(self.handle.clone(), width, height, depth)
            .with_context(|| format!("cannot create shared array {}", self.handle))?;
        info!(
            "prepared {} ({width}x{height}, {} bytes/pixel)",
            self.handle,
            depth.bytes()
        );
        self.writer = Some(writer);
        *self.lock() = AcqState {
            status: AcqStatus::Ready,
            last_image_ready: None,
        };
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        if self.thread.is_some() {
            return Err(anyhow!("acquisition on {} already started", self.handle));
        }
        let writer = self.writer.take().context("start before prepare")?;
        let builder = self.builder.take().context("frame builder lost")?;
        self.stop = CancelToken::new();
        self.lock().status = AcqStatus::Running;

        let settings = self.settings;
        let state = Arc::clone(&self.state);
        let stop = self.stop.clone();
        info!(
            "starting acquisition: exp_time {:?}, {} frames",
            settings.exp_time, settings.nb_frames
        );
        self.thread = Some(thread::spawn(move || {
            let result = acquisition_thread(writer, builder, settings, &state, &stop);
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            state.status = match &result {
                Ok(_) => AcqStatus::Ready,
                Err(e) => {
                    error!("acquisition failed: {e:#}");
                    AcqStatus::Fault
                }
            };
            result
        }));
        Ok(())
    }

    /// Ask the thread to stop after the current frame.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Join the acquisition thread. The shared array stays published.
    pub fn wait(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        let joined = thread.join().map_err(|_| {
            self.lock().status = AcqStatus::Fault;
            anyhow!("acquisition thread panicked")
        })?;
        let (writer, builder) = joined?;
        info!(
            "acquisition on {} done after {} frames",
            self.handle,
            writer.info().frames
        );
        self.writer = Some(writer);
        self.builder = Some(builder);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        self.stop();
        if let Err(e) = self.wait() {
            error!("{e:#}");
        }
    }
}

fn acquisition_thread(
    mut writer: SharedArrayWriter,
    mut builder: FrameBuilder,
    settings: AcqSettings,
    state: &Mutex<AcqState>,
    stop: &CancelToken,
) -> Result<(SharedArrayWriter, FrameBuilder)> {
    let ticker = tick(settings.exp_time);
    let mut frame_nr = 0;
    while settings.nb_frames == 0 || frame_nr < settings.nb_frames {
        let _ = ticker.recv();
        if stop.is_cancelled() {
            info!("acquisition stopped at frame {frame_nr}");
            break;
        }
        let frame = builder.next_frame();
        writer
            .write_frame(&frame)
            .with_context(|| format!("cannot publish frame {frame_nr}"))?;
        state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_image_ready = Some(frame_nr);
        frame_nr += 1;
    }
    Ok((writer, builder))
}
