use crate::signals;
use log::{debug, info, warn};
use std::{
    io,
    process::{Child, Command},
    thread,
    time::{Duration, Instant},
};

const POLL: Duration = Duration::from_millis(10);

/// A spawned child with an explicit, ordered teardown.
#[derive(Debug)]
pub struct ManagedChild {
    name: String,
    child: Child,
    exited: bool,
}

impl ManagedChild {
    pub fn spawn(name: &str, command: &mut Command) -> io::Result<Self> {
        let child = command.spawn()?;
        info!("started {name} (pid {})", child.id());
        Ok(Self {
            name: name.to_string(),
            child,
            exited: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    /// True once the child is gone. With SIGCHLD ignored the kernel reaps
    /// the child itself and `try_wait` reports ECHILD.
    pub fn has_exited(&mut self) -> bool {
        if self.exited {
            return true;
        }
        self.exited = match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!("{} exited: {status}", self.name);
                true
            }
            Ok(None) => false,
            Err(e) if e.raw_os_error() == Some(libc::ECHILD) => true,
            Err(e) => {
                warn!("{}: wait failed: {e}", self.name);
                true
            }
        };
        self.exited
    }

    /// Wait up to `timeout` for the child to exit on its own.
    pub fn wait_timeout(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.has_exited() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL);
        }
        true
    }

    /// SIGINT, then kill if the child outlives `grace`.
    pub fn terminate(&mut self, grace: Duration) {
        if self.has_exited() {
            return;
        }
        if let Err(e) = signals::interrupt(self.id()) {
            warn!("{}: cannot interrupt: {e}", self.name);
        }
        self.finish(grace);
    }

    /// Wait for a child already told to stop; kill it after `grace`.
    pub fn finish(&mut self, grace: Duration) {
        if self.wait_timeout(grace) {
            info!("{} stopped", self.name);
            return;
        }
        warn!("{} did not stop within {grace:?}; killing", self.name);
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.exited = true;
    }
}

impl Drop for ManagedChild {
    fn drop(&mut self) {
        self.terminate(Duration::from_secs(2));
    }
}
