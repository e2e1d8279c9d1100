//! The wait/cancellation coordinator.
//!
//! Waiting for a foreground stage means watching three things at once: the
//! stage completing, the cancellation signal, and console input suggesting
//! the user wants the job backgrounded or has switched focus. The poll delay
//! shrinks while a candidate is suspected and relaxes toward a long lap when
//! nothing is pending.

use crate::flog::FLOG;
use crate::input::{ConsoleProbe, InputClassifier, InputVerdict};
use crate::proc::{Pid, ProcStatus};
use crate::signal::CancelSignal;
use std::time::Duration;

/// The outcome of waiting for a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The stage finished with the given status.
    Exited(ProcStatus),
    /// The cancellation signal fired.
    Cancelled,
    /// The user asked for the job to be backgrounded.
    Backgrounded,
    /// The console repeatedly lost focus.
    LostFocus,
}

/// Something the coordinator can wait on: an external process, or a monitor
/// pump standing in for one.
pub trait StageWait {
    /// Poll for completion without blocking. Returns the status once.
    fn try_wait(&mut self) -> Option<ProcStatus>;

    /// The pid to signal for interruption, if there is a live process.
    fn pid(&self) -> Option<Pid>;
}

/// Waits on a directly spawned child via waitpid.
pub struct PidWaiter {
    pid: Pid,
    reaped: Option<ProcStatus>,
}

impl PidWaiter {
    pub fn new(pid: Pid) -> Self {
        PidWaiter { pid, reaped: None }
    }
}

impl StageWait for PidWaiter {
    fn try_wait(&mut self) -> Option<ProcStatus> {
        if let Some(status) = self.reaped {
            return Some(status);
        }
        let mut status = 0;
        let ret = unsafe { libc::waitpid(self.pid.as_pid_t(), &mut status, libc::WNOHANG) };
        if ret == self.pid.as_pid_t() {
            let status = ProcStatus::from_waitpid(status);
            self.reaped = Some(status);
            return Some(status);
        }
        None
    }

    fn pid(&self) -> Option<Pid> {
        if self.reaped.is_some() {
            None
        } else {
            Some(self.pid)
        }
    }
}

/// Scoped state for one wait call.
pub struct WaitContext<'a> {
    pub cancel: &'a CancelSignal,
    pub probe: &'a dyn ConsoleProbe,
    pub classifier: InputClassifier,
    /// Send a graceful interrupt on cancellation rather than terminating
    /// outright.
    pub graceful_interrupt: bool,
    poll_delay: Duration,
}

/// Poll delay while a backgrounding or focus-loss candidate is suspected.
const SUSPECT_POLL_DELAY: Duration = Duration::from_millis(5);
/// Starting poll delay.
const DEFAULT_POLL_DELAY: Duration = Duration::from_millis(20);
/// The longest lap between polls once nothing has been pending for a while;
/// this is the fallback for an effectively unbounded wait.
const IDLE_POLL_DELAY: Duration = Duration::from_millis(256);

impl<'a> WaitContext<'a> {
    pub fn new(cancel: &'a CancelSignal, probe: &'a dyn ConsoleProbe) -> Self {
        WaitContext {
            cancel,
            probe,
            classifier: InputClassifier::new(),
            graceful_interrupt: true,
            poll_delay: DEFAULT_POLL_DELAY,
        }
    }
}

/// Wait for a stage while watching for cancellation and console input.
///
/// On cancellation the stage receives a SIGINT (graceful) or SIGKILL; the
/// caller owns escalation after a grace period and the final reaping.
pub fn wait_for_stage(target: &mut dyn StageWait, ctx: &mut WaitContext) -> WaitOutcome {
    loop {
        if ctx.cancel.is_cancelled() {
            if let Some(pid) = target.pid() {
                let sig = if ctx.graceful_interrupt {
                    libc::SIGINT
                } else {
                    libc::SIGKILL
                };
                crate::signal::send_signal(pid, sig);
            }
            FLOG!(waitcoord, "Wait cancelled");
            return WaitOutcome::Cancelled;
        }

        if let Some(status) = target.try_wait() {
            return WaitOutcome::Exited(status);
        }

        if ctx.probe.input_pending() {
            let events = ctx.probe.peek();
            match ctx.classifier.observe(&events) {
                Some(InputVerdict::Background) => {
                    FLOG!(waitcoord, "Backgrounding requested from console");
                    return WaitOutcome::Backgrounded;
                }
                Some(InputVerdict::FocusLost) => {
                    FLOG!(waitcoord, "Console focus lost");
                    return WaitOutcome::LostFocus;
                }
                None => {}
            }
        } else {
            // Pending input went away: the program consumed it.
            ctx.classifier.observe(&[]);
        }

        if ctx.classifier.suspicious() {
            ctx.poll_delay = SUSPECT_POLL_DELAY;
        } else {
            // Relax toward the idle lap.
            ctx.poll_delay = (ctx.poll_delay * 2).min(IDLE_POLL_DELAY);
        }
        std::thread::sleep(ctx.poll_delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{ConsoleEvent, NullProbe, ScriptedProbe};

    /// A StageWait that completes after a fixed number of polls.
    struct CountdownWait {
        polls_left: u32,
        status: ProcStatus,
    }

    impl StageWait for CountdownWait {
        fn try_wait(&mut self) -> Option<ProcStatus> {
            if self.polls_left == 0 {
                Some(self.status)
            } else {
                self.polls_left -= 1;
                None
            }
        }
        fn pid(&self) -> Option<Pid> {
            None
        }
    }

    #[test]
    fn test_wait_exits() {
        let cancel = CancelSignal::new();
        let probe = NullProbe;
        let mut ctx = WaitContext::new(&cancel, &probe);
        let mut target = CountdownWait {
            polls_left: 2,
            status: ProcStatus::from_exit_code(7),
        };
        let outcome = wait_for_stage(&mut target, &mut ctx);
        assert_eq!(outcome, WaitOutcome::Exited(ProcStatus::from_exit_code(7)));
    }

    #[test]
    fn test_wait_cancelled() {
        let cancel = CancelSignal::new();
        cancel.cancel();
        let probe = NullProbe;
        let mut ctx = WaitContext::new(&cancel, &probe);
        let mut target = CountdownWait {
            polls_left: 100,
            status: ProcStatus::from_exit_code(0),
        };
        assert_eq!(wait_for_stage(&mut target, &mut ctx), WaitOutcome::Cancelled);
    }

    #[test]
    fn test_wait_backgrounded_on_repeated_chord() {
        let cancel = CancelSignal::new();
        let probe = ScriptedProbe::new(vec![
            vec![ConsoleEvent::BackgroundChord],
            vec![ConsoleEvent::BackgroundChord],
            vec![ConsoleEvent::BackgroundChord],
        ]);
        let mut ctx = WaitContext::new(&cancel, &probe);
        let mut target = CountdownWait {
            polls_left: 100,
            status: ProcStatus::from_exit_code(0),
        };
        assert_eq!(
            wait_for_stage(&mut target, &mut ctx),
            WaitOutcome::Backgrounded
        );
    }

    #[test]
    fn test_chord_reset_by_unrelated_input_yields_exit() {
        let cancel = CancelSignal::new();
        let probe = ScriptedProbe::new(vec![
            vec![ConsoleEvent::BackgroundChord],
            vec![ConsoleEvent::BackgroundChord],
            vec![ConsoleEvent::Other],
            vec![ConsoleEvent::BackgroundChord],
        ]);
        let mut ctx = WaitContext::new(&cancel, &probe);
        let mut target = CountdownWait {
            polls_left: 6,
            status: ProcStatus::from_exit_code(0),
        };
        // Two chords then unrelated input: no Backgrounded outcome.
        assert_eq!(
            wait_for_stage(&mut target, &mut ctx),
            WaitOutcome::Exited(ProcStatus::from_exit_code(0))
        );
    }

    #[test]
    fn test_focus_loss_outcome() {
        let cancel = CancelSignal::new();
        let probe = ScriptedProbe::new(vec![
            vec![ConsoleEvent::FocusLost],
            vec![ConsoleEvent::FocusLost],
            vec![ConsoleEvent::FocusLost],
        ]);
        let mut ctx = WaitContext::new(&cancel, &probe);
        let mut target = CountdownWait {
            polls_left: 100,
            status: ProcStatus::from_exit_code(0),
        };
        assert_eq!(wait_for_stage(&mut target, &mut ctx), WaitOutcome::LostFocus);
    }
}
