//! Cancellation signalling and child signal plumbing.

use crate::proc::Pid;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancellation signal shared between the coordinating thread and whatever
/// raises it (typically the front-end's SIGINT handler). Cooperative: checked
/// between stages and on every wait poll.
#[derive(Clone)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        CancelSignal(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Clear the signal, e.g. when the front-end starts a fresh command line.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Send a signal to a process, ignoring failure (the target may already be
/// gone, which is not an error for our callers).
pub fn send_signal(pid: Pid, sig: libc::c_int) -> bool {
    unsafe { libc::kill(pid.as_pid_t(), sig) == 0 }
}

/// Reset the handling for job control and interrupt signals back to the
/// default. Called in the forked child before exec, and nowhere else.
pub fn signal_reset_handlers() {
    for sig in [
        libc::SIGINT,
        libc::SIGQUIT,
        libc::SIGTSTP,
        libc::SIGTTIN,
        libc::SIGTTOU,
        libc::SIGPIPE,
        libc::SIGCHLD,
    ] {
        unsafe { libc::signal(sig, libc::SIG_DFL) };
    }
}

#[cfg(test)]
mod tests {
    use super::CancelSignal;

    #[test]
    fn test_cancel_signal() {
        let sig = CancelSignal::new();
        let clone = sig.clone();
        assert!(!sig.is_cancelled());
        clone.cancel();
        assert!(sig.is_cancelled());
        sig.reset();
        assert!(!clone.is_cancelled());
    }
}
