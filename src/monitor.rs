//! The environment-capture monitor.
//!
//! A child interpreter whose job is to mutate shell-visible state (variables,
//! aliases, working directory) cannot reach across the process boundary on
//! its own. Instead the shell launches it under a child-state observation
//! channel, pumps lifecycle notifications until the original child exits,
//! extracts the child's final environment block and working directory, and
//! applies them to the parent. Any failure along the way applies nothing;
//! the pipeline never fails because of it.
//!
//! The observation channel is pluggable: on Linux it is a ptrace-based
//! observer; a scripted observer serves tests, and platforms without an
//! equivalent channel degrade to a no-op.

use crate::env::ShellEnv;
use crate::flog::{FLOG, FLOGF};
use crate::proc::{Pid, ProcStatus};
use crate::threads;
use crate::waitcoord::StageWait;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// A lifecycle notification from the observation channel. The channel
/// reports *all* descendants of the monitored child, not only the direct
/// one.
#[derive(Clone, Debug)]
pub enum DebugEvent {
    ProcessCreated { pid: Pid },
    ProcessExited { pid: Pid, status: ProcStatus },
    /// The child replaced its image or loaded a module; informational.
    ModuleLoaded { pid: Pid },
    /// The child stopped with a signal or fault to be passed through.
    Exception { pid: Pid },
}

/// The final state read out of an exited child.
#[derive(Clone, Debug, Default)]
pub struct CapturedState {
    pub vars: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

/// The pluggable child-state observation channel.
///
/// Every event returned from [`wait_event`](Self::wait_event) must be
/// acknowledged via [`acknowledge`](Self::acknowledge) or the child stays
/// frozen. [`extract_state`](Self::extract_state) is only valid between an
/// exit notification and its acknowledgement, while the dying process's
/// address space is still mapped.
pub trait ChildObserver: Send {
    /// Block for the next notification. `Ok(None)` means the channel is
    /// drained: no tracked children remain.
    fn wait_event(&mut self) -> io::Result<Option<DebugEvent>>;

    /// Acknowledge the most recently delivered notification, letting the
    /// stopped child continue.
    fn acknowledge(&mut self) -> io::Result<()>;

    /// Read the final environment and working directory of a child that has
    /// just reported its exit.
    fn extract_state(&mut self, pid: Pid) -> io::Result<CapturedState>;

    /// Stop observing any remaining descendants; they keep running.
    fn detach_remaining(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An observer for platforms with no observation channel: reports nothing,
/// so the monitor completes without applying anything.
pub struct NullObserver;

impl ChildObserver for NullObserver {
    fn wait_event(&mut self) -> io::Result<Option<DebugEvent>> {
        Ok(None)
    }
    fn acknowledge(&mut self) -> io::Result<()> {
        Ok(())
    }
    fn extract_state(&mut self, _pid: Pid) -> io::Result<CapturedState> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}

/// An observer driven from a canned event script, for tests and examples.
pub struct ScriptedObserver {
    events: std::collections::VecDeque<DebugEvent>,
    captured: io::Result<CapturedState>,
    /// How many notifications have been acknowledged.
    pub acked: usize,
    /// How many times extraction ran.
    pub extract_calls: usize,
}

impl ScriptedObserver {
    pub fn new(events: Vec<DebugEvent>, captured: io::Result<CapturedState>) -> Self {
        ScriptedObserver {
            events: events.into(),
            captured,
            acked: 0,
            extract_calls: 0,
        }
    }
}

impl ChildObserver for ScriptedObserver {
    fn wait_event(&mut self) -> io::Result<Option<DebugEvent>> {
        Ok(self.events.pop_front())
    }
    fn acknowledge(&mut self) -> io::Result<()> {
        self.acked += 1;
        Ok(())
    }
    fn extract_state(&mut self, _pid: Pid) -> io::Result<CapturedState> {
        self.extract_calls += 1;
        match &self.captured {
            Ok(state) => Ok(state.clone()),
            Err(err) => Err(io::Error::new(err.kind(), "scripted extraction failure")),
        }
    }
}

/// Bookkeeping for one descendant of the monitored child. Exit notifications
/// are matched per-process, so every created process gets a record.
struct DebuggedChild {
    #[allow(dead_code)]
    pid: Pid,
    is_original: bool,
}

/// Monitor states, in the order they are traversed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MonitorState {
    Launching,
    DebugEventLoop,
    TargetExited,
    Extracting,
    Done,
}

/// What the monitor hands back: the original child's exit status and, if
/// extraction succeeded, its final state.
pub struct MonitorResult {
    pub status: ProcStatus,
    pub captured: Option<CapturedState>,
}

/// Pumps an observation channel until the monitored child exits, extracting
/// its final state on the way out.
pub struct EnvCaptureMonitor {
    observer: Box<dyn ChildObserver>,
    original: Pid,
    children: HashMap<i32, DebuggedChild>,
    state: MonitorState,
    captured: Option<CapturedState>,
}

impl EnvCaptureMonitor {
    pub fn new(observer: Box<dyn ChildObserver>, original: Pid) -> Self {
        EnvCaptureMonitor {
            observer,
            original,
            children: HashMap::new(),
            state: MonitorState::Launching,
            captured: None,
        }
    }

    /// Pump notifications to completion. Consumes the monitor.
    pub fn run(mut self) -> MonitorResult {
        self.state = MonitorState::DebugEventLoop;
        let mut exit_status: Option<ProcStatus> = None;

        loop {
            let event = match self.observer.wait_event() {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(err) => {
                    FLOGF!(monitor, "Observation channel failed: {}", err);
                    self.captured = None;
                    break;
                }
            };

            let ack_result = match event {
                DebugEvent::ProcessCreated { pid } => {
                    self.children.insert(
                        pid.get(),
                        DebuggedChild {
                            pid,
                            is_original: pid == self.original,
                        },
                    );
                    FLOGF!(monitor, "Tracking child {}", pid);
                    self.observer.acknowledge()
                }
                DebugEvent::ModuleLoaded { .. } | DebugEvent::Exception { .. } => {
                    self.observer.acknowledge()
                }
                DebugEvent::ProcessExited { pid, status } => {
                    let was_original = self
                        .children
                        .remove(&pid.get())
                        .map(|c| c.is_original)
                        .unwrap_or(pid == self.original);
                    if was_original && exit_status.is_none() {
                        self.state = MonitorState::TargetExited;
                        self.state = MonitorState::Extracting;
                        // Extraction must run before this exit is
                        // acknowledged, while the address space is mapped.
                        match self.observer.extract_state(pid) {
                            Ok(state) => self.captured = Some(state),
                            Err(err) => {
                                FLOGF!(monitor, "Extraction failed: {}", err);
                                self.captured = None;
                            }
                        }
                        exit_status = Some(status);
                    }
                    let ack = self.observer.acknowledge();
                    if ack.is_ok() && was_original {
                        let _ = self.observer.detach_remaining();
                        self.state = MonitorState::Done;
                        break;
                    }
                    ack
                }
            };

            if let Err(err) = ack_result {
                FLOGF!(monitor, "Failed to acknowledge notification: {}", err);
                self.captured = None;
                break;
            }
        }

        self.state = MonitorState::Done;
        MonitorResult {
            status: exit_status.unwrap_or_else(|| ProcStatus::from_exit_code(1)),
            captured: self.captured,
        }
    }
}

/// Apply a captured child state to the shell: environment and working
/// directory wholesale, alias definitions diff-merged.
pub fn apply_captured(env: &mut ShellEnv, captured: &CapturedState) {
    env.replace_all(captured.vars.iter().cloned(), captured.cwd.clone());
    FLOG!(monitor, "Applied captured environment");
}

struct MonitorShared {
    done: AtomicBool,
    result: Mutex<Option<MonitorResult>>,
}

/// A handle to a monitor running on its own event-pump thread. Completion is
/// communicated through a polled field; the thread is joined before the plan
/// is torn down.
pub struct MonitorHandle {
    thread: Option<JoinHandle<()>>,
    shared: Arc<MonitorShared>,
    original: Pid,
}

/// Start a monitor thread for an already-launched child.
pub fn spawn_monitor(observer: Box<dyn ChildObserver>, original: Pid) -> io::Result<MonitorHandle> {
    let shared = Arc::new(MonitorShared {
        done: AtomicBool::new(false),
        result: Mutex::new(None),
    });
    let thread_shared = Arc::clone(&shared);
    let thread = threads::spawn("env-monitor", move || {
        let result = EnvCaptureMonitor::new(observer, original).run();
        *thread_shared.result.lock().unwrap() = Some(result);
        thread_shared.done.store(true, Ordering::Release);
    })?;
    Ok(MonitorHandle {
        thread: Some(thread),
        shared,
        original,
    })
}

impl MonitorHandle {
    pub fn is_done(&self) -> bool {
        self.shared.done.load(Ordering::Acquire)
    }

    /// Join the pump thread and take the result.
    pub fn join(mut self) -> MonitorResult {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.shared
            .result
            .lock()
            .unwrap()
            .take()
            .unwrap_or(MonitorResult {
                status: ProcStatus::from_exit_code(1),
                captured: None,
            })
    }
}

impl StageWait for MonitorHandle {
    fn try_wait(&mut self) -> Option<ProcStatus> {
        if !self.is_done() {
            return None;
        }
        self.shared
            .result
            .lock()
            .unwrap()
            .as_ref()
            .map(|r| r.status)
    }

    fn pid(&self) -> Option<Pid> {
        if self.is_done() {
            None
        } else {
            Some(self.original)
        }
    }
}

#[cfg(target_os = "linux")]
pub use ptrace_observer::PtraceObserver;

#[cfg(target_os = "linux")]
mod ptrace_observer {
    use super::{CapturedState, ChildObserver, DebugEvent};
    use crate::flog::FLOGF;
    use crate::proc::{Pid, ProcStatus};
    use libc::{EINTR, WIFEXITED, WIFSIGNALED, WIFSTOPPED, WSTOPSIG, __WALL};
    use nix::sys::ptrace;
    use nix::sys::signal::Signal;
    use once_cell::sync::Lazy;
    use std::collections::{HashSet, VecDeque};
    use std::fs::File;
    use std::io;
    use std::os::unix::fs::FileExt;
    use std::path::PathBuf;
    use std::time::Duration;

    /// One memory protection unit; the smallest read window we shrink to.
    static PAGE_SIZE: Lazy<u64> = Lazy::new(|| {
        let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if ret > 0 {
            ret as u64
        } else {
            4096
        }
    });

    /// How long to sleep between polls of the tracked pid set.
    const EVENT_POLL_DELAY: Duration = Duration::from_millis(2);

    /// What acknowledging the last event must do.
    enum AckAction {
        Nothing,
        Cont { pid: Pid, sig: Option<Signal> },
        /// Let an exit-stopped child die for real, then reap the zombie.
        ContAndReap { pid: Pid },
    }

    /// A child-state observer built on the tracing facility: the monitored
    /// child requests tracing before exec, and fork/clone descendants are
    /// traced automatically. Exit notifications arrive while the dying
    /// process's address space is still mapped, which is when extraction
    /// reads /proc.
    pub struct PtraceObserver {
        tracked: Vec<Pid>,
        /// Translated notifications not yet delivered, each carrying the
        /// action its acknowledgement must perform.
        queue: VecDeque<(DebugEvent, AckAction)>,
        pending_ack: AckAction,
        reported_exit: HashSet<i32>,
    }

    impl PtraceObserver {
        /// Adopt a child that was spawned with tracing requested. Waits for
        /// its initial exec stop and arms descendant tracing.
        pub fn new(original: Pid) -> io::Result<Self> {
            let mut status = 0;
            loop {
                let ret =
                    unsafe { libc::waitpid(original.as_pid_t(), &mut status, __WALL) };
                if ret < 0 {
                    if errno::errno().0 == EINTR {
                        continue;
                    }
                    return Err(io::Error::last_os_error());
                }
                break;
            }

            let mut this = PtraceObserver {
                tracked: Vec::new(),
                queue: VecDeque::new(),
                pending_ack: AckAction::Nothing,
                reported_exit: HashSet::new(),
            };

            if !WIFSTOPPED(status) {
                // The child died before reaching exec (e.g. exec itself
                // failed). Report creation and exit; there is nothing to
                // extract.
                this.queue.push_back((
                    DebugEvent::ProcessCreated { pid: original },
                    AckAction::Nothing,
                ));
                this.queue.push_back((
                    DebugEvent::ProcessExited {
                        pid: original,
                        status: ProcStatus::from_waitpid(status),
                    },
                    AckAction::Nothing,
                ));
                return Ok(this);
            }

            ptrace::setoptions(
                nix::unistd::Pid::from_raw(original.as_pid_t()),
                ptrace::Options::PTRACE_O_TRACEFORK
                    | ptrace::Options::PTRACE_O_TRACEVFORK
                    | ptrace::Options::PTRACE_O_TRACECLONE
                    | ptrace::Options::PTRACE_O_TRACEEXEC
                    | ptrace::Options::PTRACE_O_TRACEEXIT
                    | ptrace::Options::PTRACE_O_EXITKILL,
            )
            .map_err(io::Error::from)?;

            this.tracked.push(original);
            this.queue.push_back((
                DebugEvent::ProcessCreated { pid: original },
                AckAction::Cont {
                    pid: original,
                    sig: None,
                },
            ));
            Ok(this)
        }

        fn nix_pid(pid: Pid) -> nix::unistd::Pid {
            nix::unistd::Pid::from_raw(pid.as_pid_t())
        }

        fn cont(pid: Pid, sig: Option<Signal>) -> io::Result<()> {
            ptrace::cont(Self::nix_pid(pid), sig).map_err(io::Error::from)
        }

        /// Turn a waitpid status into queued events, or continue the child
        /// directly for stops the monitor does not care about.
        fn translate_status(&mut self, pid: Pid, status: i32) -> io::Result<()> {
            if WIFSTOPPED(status) {
                let stopsig = WSTOPSIG(status);
                let event = (status >> 16) & 0xffff;
                match event {
                    libc::PTRACE_EVENT_FORK
                    | libc::PTRACE_EVENT_VFORK
                    | libc::PTRACE_EVENT_CLONE => {
                        let new_pid = ptrace::getevent(Self::nix_pid(pid))
                            .map_err(io::Error::from)? as i32;
                        let new_pid = Pid::new(new_pid);
                        self.tracked.push(new_pid);
                        self.queue.push_back((
                            DebugEvent::ProcessCreated { pid: new_pid },
                            AckAction::Cont { pid, sig: None },
                        ));
                    }
                    libc::PTRACE_EVENT_EXEC => {
                        self.queue.push_back((
                            DebugEvent::ModuleLoaded { pid },
                            AckAction::Cont { pid, sig: None },
                        ));
                    }
                    libc::PTRACE_EVENT_EXIT => {
                        let raw = ptrace::getevent(Self::nix_pid(pid))
                            .map_err(io::Error::from)? as i32;
                        self.reported_exit.insert(pid.get());
                        self.queue.push_back((
                            DebugEvent::ProcessExited {
                                pid,
                                status: ProcStatus::from_waitpid(raw),
                            },
                            AckAction::ContAndReap { pid },
                        ));
                    }
                    _ => {
                        if stopsig == libc::SIGTRAP || stopsig == libc::SIGSTOP {
                            // Startup breakpoints and attach stops; advance
                            // past them without involving the monitor.
                            Self::cont(pid, None)?;
                        } else {
                            let sig = Signal::try_from(stopsig).ok();
                            self.queue.push_back((
                                DebugEvent::Exception { pid },
                                AckAction::Cont { pid, sig },
                            ));
                        }
                    }
                }
            } else if WIFEXITED(status) || WIFSIGNALED(status) {
                self.tracked.retain(|p| *p != pid);
                if !self.reported_exit.contains(&pid.get()) {
                    self.queue.push_back((
                        DebugEvent::ProcessExited {
                            pid,
                            status: ProcStatus::from_waitpid(status),
                        },
                        AckAction::Nothing,
                    ));
                }
            }
            Ok(())
        }
    }

    impl ChildObserver for PtraceObserver {
        fn wait_event(&mut self) -> io::Result<Option<DebugEvent>> {
            loop {
                if let Some((event, ack)) = self.queue.pop_front() {
                    self.pending_ack = ack;
                    return Ok(Some(event));
                }
                if self.tracked.is_empty() {
                    return Ok(None);
                }
                let mut progressed = false;
                for pid in self.tracked.clone() {
                    let mut status = 0;
                    let ret = unsafe {
                        libc::waitpid(pid.as_pid_t(), &mut status, libc::WNOHANG | __WALL)
                    };
                    if ret == 0 {
                        continue;
                    }
                    if ret < 0 {
                        // Gone without a trace (detached or reaped); stop
                        // tracking it.
                        self.tracked.retain(|p| *p != pid);
                        progressed = true;
                        continue;
                    }
                    progressed = true;
                    self.translate_status(pid, status)?;
                }
                if !progressed {
                    std::thread::sleep(EVENT_POLL_DELAY);
                }
            }
        }

        fn acknowledge(&mut self) -> io::Result<()> {
            match std::mem::replace(&mut self.pending_ack, AckAction::Nothing) {
                AckAction::Nothing => Ok(()),
                AckAction::Cont { pid, sig } => Self::cont(pid, sig),
                AckAction::ContAndReap { pid } => {
                    Self::cont(pid, None)?;
                    let mut status = 0;
                    loop {
                        let ret =
                            unsafe { libc::waitpid(pid.as_pid_t(), &mut status, __WALL) };
                        if ret < 0 && errno::errno().0 == EINTR {
                            continue;
                        }
                        break;
                    }
                    self.tracked.retain(|p| *p != pid);
                    Ok(())
                }
            }
        }

        fn extract_state(&mut self, pid: Pid) -> io::Result<CapturedState> {
            let stat = std::fs::read_to_string(format!("/proc/{pid}/stat"))?;
            // The comm field may contain spaces; fields are stable only after
            // the closing paren. env_start and env_end are fields 50 and 51
            // (1-indexed) per proc(5); the slice after the paren starts at
            // field 3.
            let (_, rest) = stat
                .rsplit_once(')')
                .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidData))?;
            let fields: Vec<&str> = rest.split_whitespace().collect();
            let parse = |idx: usize| -> io::Result<u64> {
                fields
                    .get(idx)
                    .and_then(|f| f.parse::<u64>().ok())
                    .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidData))
            };
            let env_start = parse(50 - 3)?;
            let env_end = parse(51 - 3)?;
            if env_start == 0 || env_end <= env_start {
                return Err(io::Error::from(io::ErrorKind::InvalidData));
            }

            let mem = File::open(format!("/proc/{pid}/mem"))?;
            let bytes = read_with_shrinking_window(&mem, env_start, env_end)?;
            let vars = parse_env_block(&bytes);
            let cwd: Option<PathBuf> = std::fs::read_link(format!("/proc/{pid}/cwd")).ok();
            FLOGF!(monitor, "Extracted {} variables from pid {}", vars.len(), pid);
            Ok(CapturedState { vars, cwd })
        }

        fn detach_remaining(&mut self) -> io::Result<()> {
            for pid in std::mem::take(&mut self.tracked) {
                let _ = ptrace::detach(Self::nix_pid(pid), None);
            }
            self.queue.clear();
            Ok(())
        }
    }

    /// Read [start, end) from the child's memory, retrying with a shrinking
    /// window to tolerate unmapped pages: on a failed read the window halves
    /// down to one protection unit, and a failed page-sized read skips that
    /// page.
    fn read_with_shrinking_window(mem: &File, start: u64, end: u64) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut pos = start;
        let mut window = end - start;
        while pos < end {
            window = window.min(end - pos).max(1);
            let mut buf = vec![0u8; window as usize];
            match mem.read_at(&mut buf, pos) {
                Ok(0) => break,
                Ok(n) => {
                    out.extend_from_slice(&buf[..n]);
                    pos += n as u64;
                    window = end - pos;
                }
                Err(_) if window > *PAGE_SIZE => {
                    window = (window / 2).max(*PAGE_SIZE);
                }
                Err(_) => {
                    pos += *PAGE_SIZE;
                    window = *PAGE_SIZE;
                }
            }
        }
        if out.is_empty() {
            Err(io::Error::from(io::ErrorKind::InvalidData))
        } else {
            Ok(out)
        }
    }

    /// Split a NUL-separated environment block into name/value pairs.
    fn parse_env_block(bytes: &[u8]) -> Vec<(String, String)> {
        bytes
            .split(|b| *b == 0)
            .filter(|entry| !entry.is_empty())
            .filter_map(|entry| {
                let s = String::from_utf8_lossy(entry);
                let (name, value) = s.split_once('=')?;
                Some((name.to_string(), value.to_string()))
            })
            .collect()
    }

    #[cfg(test)]
    mod tests {
        use super::parse_env_block;

        #[test]
        fn test_parse_env_block() {
            let block = b"PATH=/bin\0HOME=/root\0\0junk-no-equals\0A=b=c\0";
            let vars = parse_env_block(block);
            assert_eq!(
                vars,
                vec![
                    ("PATH".to_string(), "/bin".to_string()),
                    ("HOME".to_string(), "/root".to_string()),
                    ("A".to_string(), "b=c".to_string()),
                ]
            );
        }
    }
}
