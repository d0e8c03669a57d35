use crate::CancelToken;
use signal_hook::{
    consts::signal::{SIGINT, SIGTERM},
    flag,
};
use std::{
    io,
    sync::{atomic::AtomicBool, Arc, OnceLock},
};

static INTERRUPT: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Route SIGINT and SIGTERM to a process-wide CancelToken.
pub fn install_interrupt_handler() -> io::Result<CancelToken> {
    if let Some(flag) = INTERRUPT.get() {
        return Ok(CancelToken::from_flag(Arc::clone(flag)));
    }
    let interrupted = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        flag::register(signal, Arc::clone(&interrupted))?;
    }
    let flag = INTERRUPT.get_or_init(|| interrupted);
    Ok(CancelToken::from_flag(Arc::clone(flag)))
}

/// Let the kernel reap exited children. Waiting on such a child afterwards
/// fails with ECHILD, which child handles treat as "already exited".
pub fn ignore_child_exit() -> io::Result<()> {
    // SAFETY: SIG_IGN installs no handler code.
    if unsafe { libc::signal(libc::SIGCHLD, libc::SIG_IGN) } == libc::SIG_ERR {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Ask process `pid` to shut down.
pub fn interrupt(pid: u32) -> io::Result<()> {
    // SAFETY: kill has no memory-safety preconditions.
    if unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
