//! Driving a pipeline: walking the stage chain, wiring pipes, dispatching
//! builtins in-process or spawning external programs, applying chaining
//! rules, and aggregating the final status.
//!
//! One coordinating thread runs here. Builtins execute synchronously on it,
//! never concurrently with each other, because redirection for them mutates
//! process-wide stream state. External programs run on their own OS-scheduled
//! process; we only wait.

use crate::builtins::shared::{builtin_run, BuiltinContext, BuiltinRegistry, STATUS_CMD_ERROR};
use crate::common::{cstring, truncate_at_nul, write_loop};
use crate::env::ShellEnv;
use crate::fds::{dup_high_cloexec, make_autoclose_pipes, make_fd_blocking};
use crate::flog::{FLOG, FLOGF};
use crate::input::{ConsoleProbe, NullProbe};
use crate::io::{
    BufferFill, BufferPool, FdOutputStream, IoChain, IoMode, IoPipe, IoStreams, OutputStream,
    ProcOutputBuffer,
};
use crate::jobs::JobTable;
use crate::monitor::{self, ChildObserver, MonitorHandle};
use crate::null_terminated_array::OwningNullTerminatedArray;
use crate::proc::{ChainRule, CommandKind, Pid, Pipeline, ProcStatus, Stage, StageFlags};
use crate::redirection::{dup2_list_resolve_chain, SavedStreams};
use crate::signal::{send_signal, CancelSignal};
use crate::spawn::spawn_external;
use crate::threads;
use crate::waitcoord::{wait_for_stage, PidWaiter, StageWait, WaitContext, WaitOutcome};
use libc::{SIGINT, SIGKILL, STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::unistd::AccessFlags;
use std::ffi::CString;
use std::io;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Read limit for command substitution captures.
pub const SUBSTITUTION_READ_LIMIT: usize = 100 * 1024 * 1024;

/// How long a terminated stage gets between the interrupt and the kill.
const TERMINATION_GRACE: Duration = Duration::from_millis(500);

/// How much a focus-loss verdict lowers a foreground stage's priority.
const FOCUS_LOSS_NICE_DELTA: i32 = 10;

static NULL_PROBE: NullProbe = NullProbe;

/// Decides whether argv[0] names a path-searchable external program or
/// should attempt the builtin path. The interactive front-end usually
/// supplies this; [`PathResolver`] is the standalone default.
pub trait CommandResolver {
    fn resolve(&self, argv0: &str, env: &ShellEnv, builtins: &BuiltinRegistry) -> CommandKind;
}

/// Resolution against the builtin registry first, then a $PATH walk.
pub struct PathResolver;

impl CommandResolver for PathResolver {
    fn resolve(&self, argv0: &str, env: &ShellEnv, builtins: &BuiltinRegistry) -> CommandKind {
        if builtins.exists(argv0) {
            return CommandKind::Builtin;
        }
        if argv0.contains('/') {
            return CommandKind::External(env.apply_working_directory(argv0));
        }
        if let Some(path_var) = env.get("PATH") {
            for dir in path_var.split(':').filter(|d| !d.is_empty()) {
                let candidate = Path::new(dir).join(argv0);
                if nix::unistd::access(&candidate, AccessFlags::X_OK).is_ok() {
                    return CommandKind::External(candidate);
                }
            }
        }
        // Not found: keep the bare name and let exec report the conventional
        // 127 through the child.
        CommandKind::External(PathBuf::from(argv0))
    }
}

/// Builds observers for monitored child interpreters. None on platforms
/// without an observation channel; those stages run unmonitored.
pub type ObserverFactory = Box<dyn Fn(Pid) -> io::Result<Box<dyn ChildObserver>>>;

#[cfg(target_os = "linux")]
fn default_observer_factory() -> Option<ObserverFactory> {
    Some(Box::new(|pid| {
        Ok(Box::new(monitor::PtraceObserver::new(pid)?) as Box<dyn ChildObserver>)
    }))
}

#[cfg(not(target_os = "linux"))]
fn default_observer_factory() -> Option<ObserverFactory> {
    None
}

/// The result of launching one stage of a group.
enum StageRun {
    /// A builtin (or forwarding shim) that already completed.
    Completed(ProcStatus),
    /// An external process to wait for.
    External {
        pid: Pid,
        argv0: String,
        quiet: bool,
        /// Capture buffers, present when the stage runs backgroundable.
        out: Option<ProcOutputBuffer>,
        err: Option<ProcOutputBuffer>,
        /// The environment-capture monitor pump, if this stage runs under one.
        monitor: Option<MonitorHandle>,
        /// Set once the process has been reaped (by us or by the monitor).
        reaped: bool,
    },
}

/// How a group wait ended.
enum GroupOutcome {
    Finished(ProcStatus),
    Cancelled,
    Backgrounded,
    Detached,
}

/// What waiting on a single run concluded; separated from the wait loop so
/// the group-wide reactions (terminate, detach) run without the run borrow.
enum RunOutcome {
    Advance(ProcStatus),
    Cancelled,
    Backgrounded,
    LostFocus(Pid),
}

#[derive(Default)]
struct PartialPipes {
    /// Read end of the pipe from the previous stage.
    read: Option<OwnedFd>,
    /// Write end of the pipe to the next stage.
    write: Option<OwnedFd>,
}

/// The top-level driver. Owns the registries the design scopes per shell
/// instance: builtin table, buffer pool, job table, environment.
pub struct Executor {
    pub env: ShellEnv,
    pub builtins: BuiltinRegistry,
    pub pool: BufferPool,
    pub jobs: JobTable,
    pub cancel: CancelSignal,
    probe: Box<dyn ConsoleProbe>,
    resolver: Box<dyn CommandResolver>,
    observer_factory: Option<ObserverFactory>,
    /// Run foreground externals with captured-and-mirrored output so a
    /// Backgrounded verdict only has to detach the mirror.
    capture_foreground: bool,
    grace: Duration,
}

impl Executor {
    pub fn new() -> Self {
        Executor {
            env: ShellEnv::from_process(),
            builtins: BuiltinRegistry::new(),
            pool: BufferPool::new(),
            jobs: JobTable::new(),
            cancel: CancelSignal::new(),
            probe: Box::new(NullProbe),
            resolver: Box::new(PathResolver),
            observer_factory: default_observer_factory(),
            capture_foreground: false,
            grace: TERMINATION_GRACE,
        }
    }

    /// Like [`new`](Self::new) but starting from a given environment, so
    /// shell instances in one process stay independent.
    pub fn with_env(env: ShellEnv) -> Self {
        let mut this = Self::new();
        this.env = env;
        this
    }

    pub fn set_probe(&mut self, probe: Box<dyn ConsoleProbe>) {
        self.probe = probe;
    }

    pub fn set_resolver(&mut self, resolver: Box<dyn CommandResolver>) {
        self.resolver = resolver;
    }

    pub fn set_observer_factory(&mut self, factory: Option<ObserverFactory>) {
        self.observer_factory = factory;
    }

    pub fn set_capture_foreground(&mut self, capture: bool) {
        self.capture_foreground = capture;
    }

    pub fn set_termination_grace(&mut self, grace: Duration) {
        self.grace = grace;
    }

    /// Execute a pipeline, streaming output, and return its status: the last
    /// executed stage's status. Stages skipped by chaining rules do not
    /// affect it.
    pub fn run(&mut self, pipeline: &Pipeline) -> i32 {
        self.run_plan(pipeline, None)
    }

    /// Execute a pipeline with the stdout of non-piped stages captured, for
    /// command substitution evaluation. The caller strips trailing line
    /// terminators and collapses embedded ones to spaces.
    pub fn run_captured(&mut self, pipeline: &Pipeline) -> io::Result<(i32, ProcOutputBuffer)> {
        let fill = BufferFill::create(&self.pool, SUBSTITUTION_READ_LIMIT, STDOUT_FILENO)?;
        let status = self.run_plan(pipeline, Some(&fill));
        let buffer = BufferFill::finish(fill);
        Ok((status, buffer))
    }

    fn run_plan(&mut self, pipeline: &Pipeline, capture: Option<&Arc<BufferFill>>) -> i32 {
        let mut last_status: i32 = 0;
        let mut cursor: Option<&Stage> = Some(&pipeline.first);

        while let Some(stage) = cursor {
            if self.cancel.is_cancelled() {
                FLOG!(exec_job_status, "Plan cancelled between stages");
                return 128 + SIGINT;
            }

            // Stages linked by the concurrent rule form one pipe group.
            let mut group: Vec<&Stage> = vec![stage];
            let mut tail = stage;
            while tail.chain == ChainRule::Concurrent {
                match tail.next.as_deref() {
                    Some(next) => {
                        group.push(next);
                        tail = next;
                    }
                    None => break,
                }
            }

            match self.exec_group(&group, capture) {
                GroupOutcome::Finished(status) => {
                    last_status = status.status_value();
                    FLOGF!(
                        exec_job_status,
                        "Group ending with '{}' finished with status {}",
                        tail.argv0(),
                        last_status
                    );
                }
                GroupOutcome::Cancelled => return 128 + SIGINT,
                GroupOutcome::Backgrounded | GroupOutcome::Detached => {
                    // The job table owns it now; a detached launch reports
                    // success and the rest of the chain does not run.
                    return 0;
                }
            }

            cursor = Self::next_after(tail, last_status);
        }
        last_status
    }

    /// Choose the stage to run after `tail`, whose group finished with
    /// `last_status`. An unsatisfied on-success/on-failure link skips its
    /// target stage and every stage concurrently linked to it, then
    /// re-evaluates at the skipped run's tail, so nested skipped
    /// alternatives resolve to the next always-anchored stage.
    fn next_after(tail: &Stage, last_status: i32) -> Option<&Stage> {
        let mut rule = tail.chain;
        let mut next = tail.next.as_deref();
        loop {
            let stage = next?;
            let satisfied = match rule {
                ChainRule::Never => return None,
                ChainRule::Always | ChainRule::Concurrent => true,
                ChainRule::OnSuccess => last_status == 0,
                ChainRule::OnFailure => last_status != 0,
            };
            if satisfied {
                return Some(stage);
            }
            // Skip this stage and its concurrent continuation; skipped
            // stages print nothing and leave the status untouched.
            let mut skip = stage;
            while skip.chain == ChainRule::Concurrent {
                match skip.next.as_deref() {
                    Some(next_in_group) => skip = next_in_group,
                    None => return None,
                }
            }
            FLOGF!(exec_job_status, "Skipping stage '{}'", stage.argv0());
            rule = skip.chain;
            next = skip.next.as_deref();
        }
    }

    /// Launch every stage of one pipe group, then wait for them in order.
    fn exec_group(&mut self, stages: &[&Stage], capture: Option<&Arc<BufferFill>>) -> GroupOutcome {
        let detached = stages.last().unwrap().flags.contains(StageFlags::DETACH);
        let mut runs: Vec<StageRun> = Vec::with_capacity(stages.len());
        let mut pipe_next_read: Option<OwnedFd> = None;
        let mut aborted = false;

        for (i, stage) in stages.iter().enumerate() {
            let is_last = i + 1 == stages.len();
            // The pipes applied to this stage: the read end fed by the
            // previous stage, plus the write end feeding the next one.
            let mut proc_pipes = PartialPipes::default();
            std::mem::swap(&mut proc_pipes.read, &mut pipe_next_read);
            if !is_last {
                match make_autoclose_pipes() {
                    Ok(pipes) => {
                        pipe_next_read = Some(pipes.read);
                        proc_pipes.write = Some(pipes.write);
                    }
                    Err(err) => {
                        FLOGF!(exec, "Pipe creation failed: {}", err);
                        aborted = true;
                        break;
                    }
                }
            }

            let command = match &stage.command {
                CommandKind::Unresolved => {
                    self.resolver
                        .resolve(stage.argv0(), &self.env, &self.builtins)
                }
                resolved => resolved.clone(),
            };

            let launched = match command {
                CommandKind::Builtin => self.exec_builtin_stage(stage, proc_pipes, capture),
                CommandKind::External(path) => {
                    self.exec_external_stage(stage, &path, proc_pipes, capture, detached)
                }
                CommandKind::Unresolved => unreachable!("resolver must decide"),
            };
            match launched {
                Ok(run) => runs.push(run),
                Err(err) => {
                    // A resource-acquisition or launch failure aborts the
                    // rest of the group; whatever already launched is still
                    // waited for below.
                    FLOGF!(exec, "Failed to launch '{}': {}", stage.argv0(), err);
                    aborted = true;
                    break;
                }
            }
        }
        drop(pipe_next_read);

        if detached && !aborted {
            self.detach_runs(&mut runs);
            return GroupOutcome::Detached;
        }

        let outcome = self.wait_group(&mut runs);
        if aborted {
            if let GroupOutcome::Finished(_) = outcome {
                return GroupOutcome::Finished(ProcStatus::from_exit_code(STATUS_CMD_ERROR));
            }
        }
        outcome
    }

    /// A builtin whose stdout feeds the next stage degrades pipe concurrency
    /// to buffer-then-forward: output is captured, the handler runs to
    /// completion, then a pump forwards the buffer into the pipe.
    fn exec_builtin_stage(
        &mut self,
        stage: &Stage,
        proc_pipes: PartialPipes,
        capture: Option<&Arc<BufferFill>>,
    ) -> io::Result<StageRun> {
        let mut chain = IoChain::new();
        let mut forward: Option<(Arc<BufferFill>, OwnedFd)> = None;

        // The write pipe must come before other redirections so 2>&1 lands
        // on the pipe.
        if let Some(write_fd) = proc_pipes.write {
            let fill = BufferFill::create(&self.pool, 0, STDOUT_FILENO)?;
            chain.push(fill.clone());
            forward = Some((fill, write_fd));
        } else if let Some(fill) = capture {
            chain.push(fill.clone());
        }
        chain.append_from_specs(&stage.redirections, self.env.cwd())?;
        if let Some(read_fd) = proc_pipes.read {
            chain.push(Arc::new(IoPipe::new(STDIN_FILENO, true, read_fd)));
        }

        let out_io = chain.io_for_fd(STDOUT_FILENO);
        let err_io = chain.io_for_fd(STDERR_FILENO);
        let stdin_closed = chain
            .io_for_fd(STDIN_FILENO)
            .is_some_and(|io| io.io_mode() == IoMode::Close);

        // Redirect first, so capture pipes exist before the call and no
        // output is lost; then run synchronously; then revert.
        let saved = SavedStreams::apply(&chain)?;

        let mut out = OutputStream::Fd(FdOutputStream::new(STDOUT_FILENO));
        let mut err = OutputStream::Fd(FdOutputStream::new(STDERR_FILENO));
        let status;
        {
            let mut streams = IoStreams::new(&mut out, &mut err, &chain);
            streams.stdin_fd = if stdin_closed { -1 } else { STDIN_FILENO };
            streams.out_is_redirected = out_io.is_some();
            streams.err_is_redirected = err_io.is_some();
            streams.out_is_piped = forward.is_some();

            let mut argv: Vec<&str> = stage.argv.iter().map(|s| truncate_at_nul(s)).collect();
            let mut ctx = BuiltinContext {
                env: &mut self.env,
                jobs: &self.jobs,
            };
            status = builtin_run(&self.builtins, &mut ctx, &mut argv, &mut streams);
        }
        saved.restore();

        if let Some((fill, write_fd)) = forward {
            // Wait for the capture to finalize, then forward it into the
            // next stage's stdin on its own pump.
            chain.remove(&*fill);
            drop(chain);
            let buffer = BufferFill::finish(fill);
            threads::spawn("builtin-forward", move || {
                let contents = buffer.contents();
                let _ = write_loop(&write_fd, &contents);
                // Dropping write_fd here delivers end-of-stream.
            })?;
        }

        Ok(StageRun::Completed(status))
    }

    fn exec_external_stage(
        &mut self,
        stage: &Stage,
        cmd_path: &Path,
        proc_pipes: PartialPipes,
        capture: Option<&Arc<BufferFill>>,
        detached: bool,
    ) -> io::Result<StageRun> {
        let mut chain = IoChain::new();
        let mut out_buf: Option<ProcOutputBuffer> = None;
        let mut err_buf: Option<ProcOutputBuffer> = None;

        if let Some(write_fd) = proc_pipes.write {
            chain.push(Arc::new(IoPipe::new(STDOUT_FILENO, false, write_fd)));
        } else if let Some(fill) = capture {
            chain.push(fill.clone());
        } else if detached || self.capture_foreground {
            // Backgroundable: output goes to capture buffers, two per stage.
            // A foreground stage keeps a mirror to the inherited streams, so
            // promoting it only detaches the mirror; a detached stage
            // buffers silently.
            let out_fill = BufferFill::create(&self.pool, 0, STDOUT_FILENO)?;
            let err_fill = BufferFill::create(&self.pool, 0, STDERR_FILENO)?;
            if !detached {
                out_fill.buffer().set_mirror(dup_high_cloexec(STDOUT_FILENO)?);
                err_fill.buffer().set_mirror(dup_high_cloexec(STDERR_FILENO)?);
            }
            out_buf = Some(out_fill.buffer().clone());
            err_buf = Some(err_fill.buffer().clone());
            chain.push(out_fill);
            chain.push(err_fill);
        }
        chain.append_from_specs(&stage.redirections, self.env.cwd())?;
        if let Some(read_fd) = proc_pipes.read {
            chain.push(Arc::new(IoPipe::new(STDIN_FILENO, true, read_fd)));
        }

        let dup2s = dup2_list_resolve_chain(&chain);
        let narrow_argv: Vec<CString> = stage.argv.iter().map(|s| cstring(s)).collect();
        let argv = OwningNullTerminatedArray::new(narrow_argv);
        let envp = self.env.export_array();
        let actual_cmd = cstring(&cmd_path.to_string_lossy());

        let traced =
            stage.flags.contains(StageFlags::MONITOR_ENV) && self.observer_factory.is_some();

        // Hand off stdin in blocking mode; children do not expect O_NONBLOCK.
        let _ = make_fd_blocking(STDIN_FILENO);

        let pid =
            spawn_external(&actual_cmd, &argv, &envp, &dup2s, traced).map_err(io::Error::from)?;

        // Close our copies of the pipe and capture write ends now; the child
        // owns its dups, and the pumps need end-of-stream when it exits.
        drop(chain);

        let monitor = if traced {
            let factory = self.observer_factory.as_ref().unwrap();
            match factory(pid).and_then(|observer| monitor::spawn_monitor(observer, pid)) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    // The child is stopped waiting for a tracer that failed
                    // to arrive; nothing to do but put it down.
                    FLOGF!(monitor, "Failed to start monitor: {}", err);
                    send_signal(pid, SIGKILL);
                    None
                }
            }
        } else {
            None
        };

        Ok(StageRun::External {
            pid,
            argv0: stage.argv0().to_string(),
            quiet: stage.flags.contains(StageFlags::QUIET),
            out: out_buf,
            err: err_buf,
            monitor,
            reaped: false,
        })
    }

    /// Wait for a group's stages in order. The last stage's wait watches the
    /// console for backgrounding and focus-loss candidates.
    fn wait_group(&mut self, runs: &mut Vec<StageRun>) -> GroupOutcome {
        let mut last_status = ProcStatus::from_exit_code(0);
        let mut idx = 0;
        while idx < runs.len() {
            let is_last = idx + 1 == runs.len();
            let outcome = self.wait_one_run(&mut runs[idx], is_last);
            match outcome {
                RunOutcome::Advance(status) => {
                    last_status = status;
                    idx += 1;
                }
                RunOutcome::Cancelled => {
                    self.terminate_runs(runs);
                    return GroupOutcome::Cancelled;
                }
                RunOutcome::Backgrounded => {
                    self.detach_runs(runs);
                    return GroupOutcome::Backgrounded;
                }
                RunOutcome::LostFocus(pid) => {
                    // The user switched away: drop the stage's priority and
                    // keep waiting.
                    let _ = crate::jobs::renice(pid, FOCUS_LOSS_NICE_DELTA);
                    FLOGF!(waitcoord, "Lowered priority of pid {}", pid);
                }
            }
        }
        GroupOutcome::Finished(last_status)
    }

    fn wait_one_run(&mut self, run: &mut StageRun, is_last: bool) -> RunOutcome {
        match run {
            StageRun::Completed(status) => RunOutcome::Advance(*status),
            StageRun::External {
                pid,
                monitor,
                reaped,
                ..
            } => {
                let pid = *pid;
                let outcome;
                {
                    let mut ctx = WaitContext::new(&self.cancel, self.probe.as_ref());
                    if !is_last {
                        // Only the foreground tail listens to the console.
                        ctx.probe = &NULL_PROBE;
                    }
                    outcome = match monitor.as_mut() {
                        Some(handle) => wait_for_stage(handle, &mut ctx),
                        None => {
                            let mut waiter = PidWaiter::new(pid);
                            let outcome = wait_for_stage(&mut waiter, &mut ctx);
                            if matches!(outcome, WaitOutcome::Exited(_)) {
                                *reaped = true;
                            }
                            outcome
                        }
                    };
                }
                match outcome {
                    WaitOutcome::Exited(status) => {
                        *reaped = true;
                        if let Some(handle) = monitor.take() {
                            let result = handle.join();
                            if let Some(captured) = result.captured {
                                monitor::apply_captured(&mut self.env, &captured);
                            }
                        }
                        RunOutcome::Advance(status)
                    }
                    WaitOutcome::Cancelled => RunOutcome::Cancelled,
                    WaitOutcome::Backgrounded => RunOutcome::Backgrounded,
                    WaitOutcome::LostFocus => RunOutcome::LostFocus(pid),
                }
            }
        }
    }

    /// Move every still-live external run into the job table, detaching
    /// mirrors so buffered output accumulates silently.
    fn detach_runs(&mut self, runs: &mut [StageRun]) {
        for run in runs.iter_mut() {
            let StageRun::External {
                pid,
                argv0,
                quiet,
                out,
                err,
                monitor,
                reaped,
            } = run
            else {
                continue;
            };
            if *reaped {
                continue;
            }
            if let Some(handle) = monitor.take() {
                // A monitored child stays owned by its observer, which also
                // reaps it; it cannot be handed to the job reaper as well.
                // The pump keeps running detached and its result is
                // discarded.
                FLOGF!(monitor, "Dropping monitor for backgrounded pid {}", pid);
                drop(handle);
                *reaped = true;
                continue;
            }
            let out_buf = out.take().unwrap_or_else(|| self.pool.create(0));
            let err_buf = err.take().unwrap_or_else(|| self.pool.create(0));
            drop(out_buf.take_mirror());
            drop(err_buf.take_mirror());
            match self.jobs.add(*pid, argv0.clone(), out_buf, err_buf, *quiet) {
                Ok(job) => {
                    *reaped = true;
                    FLOGF!(jobs, "Stage '{}' became job {}", argv0, job.id);
                }
                Err(err) => {
                    FLOGF!(jobs, "Failed to register job for '{}': {}", argv0, err);
                }
            }
        }
    }

    /// Ask every live process in the group to terminate: a graceful
    /// interrupt, a grace period, then a forced kill. Monitor threads are
    /// joined before returning so the plan can be torn down.
    fn terminate_runs(&mut self, runs: &mut [StageRun]) {
        for run in runs.iter() {
            if let StageRun::External {
                pid, reaped: false, ..
            } = run
            {
                send_signal(*pid, SIGINT);
            }
        }

        let deadline = Instant::now() + self.grace;
        for run in runs.iter_mut() {
            let StageRun::External {
                pid,
                monitor,
                reaped,
                ..
            } = run
            else {
                continue;
            };
            if *reaped {
                continue;
            }
            if let Some(handle) = monitor.take() {
                // The observer owns the reaping; the interrupt above ends
                // the child and joining ends the pump. Escalate to a kill if
                // the child shrugged off the interrupt. Captured state is
                // discarded on cancellation.
                while !handle.is_done() && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(5));
                }
                if !handle.is_done() {
                    send_signal(*pid, SIGKILL);
                }
                let _ = handle.join();
                *reaped = true;
                continue;
            }
            let mut waiter = PidWaiter::new(*pid);
            loop {
                if waiter.try_wait().is_some() {
                    *reaped = true;
                    break;
                }
                if Instant::now() >= deadline {
                    FLOGF!(exec_job_status, "Killing pid {} after grace period", pid);
                    send_signal(*pid, SIGKILL);
                    let mut status = 0;
                    unsafe { libc::waitpid(pid.as_pid_t(), &mut status, 0) };
                    *reaped = true;
                    break;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }
    }
}
