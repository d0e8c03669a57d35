use crate::{DisplayError, DisplaySink, ReadOutcome, SharedArrayHandle, SharedArrayReader};
use log::{info, warn};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BridgeState {
    /// No array attached (never attached, or last attach failed).
    Idle,
    Connected,
    /// The producer released the array; the last frame stays on screen.
    Disconnected,
}

/// Feeds frames from a named shared array into a DisplaySink.
pub struct SharedArrayBridge {
    handle: Option<SharedArrayHandle>,
    reader: Option<SharedArrayReader>,
    state: BridgeState,
    last_seq: Option<u64>,
    scratch: Vec<u8>,
}

impl Default for SharedArrayBridge {
    fn default() -> Self {
        Self {
            handle: None,
            reader: None,
            state: BridgeState::Idle,
            last_seq: None,
            scratch: Vec::new(),
        }
    }
}

impl SharedArrayBridge {
    pub fn new() -> Self {
        Default::default()
    }

    /// Record the array to follow and try to attach to it.
    pub fn set_spec_array(&mut self, namespace: &str, name: &str) -> Result<(), DisplayError> {
        let handle = SharedArrayHandle::new(namespace, name)?;
        self.detach();
        self.handle = Some(handle);
        self.attach()
    }

    pub fn spec_array(&self) -> Option<&SharedArrayHandle> {
        self.handle.as_ref()
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// (Re)attach to the recorded array.
    pub fn attach(&mut self) -> Result<(), DisplayError> {
        let handle = self.handle.clone().ok_or_else(|| {
            DisplayError::InvalidArrayName("no shared array configured".to_string())
        })?;
        let reader = SharedArrayReader::open(handle.clone())?;
        let array = reader.info();
        info!(
            "attached to {handle}: {}x{}x{}",
            array.width,
            array.height,
            array.depth.bytes()
        );
        self.reader = Some(reader);
        self.state = BridgeState::Connected;
        self.last_seq = None;
        Ok(())
    }

    /// Copy a new frame into `sink` if one is available. Returns true when
    /// the sink received a frame. A vanished producer is not an error.
    pub fn poll(&mut self, sink: &mut DisplaySink) -> Result<bool, DisplayError> {
        let Some(reader) = &self.reader else {
            return Ok(false);
        };
        match reader.read_frame(self.last_seq, &mut self.scratch) {
            ReadOutcome::Frame(seq) => {
                let array = reader.info();
                self.last_seq = Some(seq);
                sink.set_buffer(&self.scratch, array.width, array.height, array.depth.bytes())?;
                Ok(true)
            }
            ReadOutcome::Unchanged | ReadOutcome::Busy => {
                if !reader.is_linked() {
                    self.disconnect();
                }
                Ok(false)
            }
            ReadOutcome::Gone => {
                self.disconnect();
                Ok(false)
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some(reader) = self.reader.take() {
            warn!("{} disconnected; keeping last frame", reader.handle());
        }
        self.state = BridgeState::Disconnected;
    }

    fn detach(&mut self) {
        self.reader = None;
        self.state = BridgeState::Idle;
        self.last_seq = None;
    }
}
