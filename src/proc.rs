//! The pipeline data model: stages, chaining rules, flags, and the exit
//! status wrapper. These are built by the front-end's parser and consumed by
//! the executor; nothing here launches anything.

use crate::redirection::RedirectionSpecList;
use bitflags::bitflags;
use libc::{WEXITSTATUS, WIFEXITED, WIFSIGNALED, WIFSTOPPED, WTERMSIG};
use std::num::NonZeroI32;
use std::path::PathBuf;

/// A type-safe process id.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct Pid(NonZeroI32);

impl Pid {
    #[inline(always)]
    pub fn new(pid: i32) -> Self {
        Self(NonZeroI32::new(pid).filter(|p| p.get() > 0).expect("PID must be greater than zero"))
    }
    #[inline(always)]
    pub fn get(&self) -> i32 {
        self.0.get()
    }
    #[inline(always)]
    pub fn as_pid_t(&self) -> libc::pid_t {
        self.get()
    }
}

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.get(), f)
    }
}

/// A ProcStatus wraps an i32 wait status and encapsulates the exited vs
/// signaled vs stopped logic, or is empty when there is no status to report
/// (a stage skipped by its chaining rule).
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProcStatus(Option<i32>);

impl ProcStatus {
    fn status(&self) -> i32 {
        self.0.unwrap_or(0)
    }

    /// True if there is no actual status to report.
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Encode a return value and signal into a status value like waitpid()
    /// produces.
    const fn w_exitcode(ret: i32, sig: i32) -> i32 {
        (ret << 8) | sig
    }

    /// Construct from a status returned from a waitpid call.
    pub fn from_waitpid(status: i32) -> ProcStatus {
        ProcStatus(Some(status))
    }

    /// Construct directly from an exit code.
    pub fn from_exit_code(ret: i32) -> ProcStatus {
        assert!(
            (0..256).contains(&ret),
            "exit code must be in the waitpid-encodable range"
        );
        ProcStatus(Some(Self::w_exitcode(ret, 0)))
    }

    /// Construct directly from a terminating signal.
    pub fn from_signal(signal: i32) -> ProcStatus {
        ProcStatus(Some(Self::w_exitcode(0, signal)))
    }

    /// Construct an empty status.
    pub fn empty() -> ProcStatus {
        ProcStatus(None)
    }

    /// Return if we are stopped (as in SIGSTOP).
    pub fn stopped(&self) -> bool {
        WIFSTOPPED(self.status())
    }

    /// Return if we exited normally, not via a signal.
    pub fn normal_exited(&self) -> bool {
        WIFEXITED(self.status())
    }

    /// Return if we exited because of a signal.
    pub fn signal_exited(&self) -> bool {
        WIFSIGNALED(self.status())
    }

    /// Return the signal, given that we signal exited.
    pub fn signal_code(&self) -> libc::c_int {
        assert!(self.signal_exited(), "Process is not signal exited");
        WTERMSIG(self.status())
    }

    /// Return the exit code, given that we normal exited.
    pub fn exit_code(&self) -> u8 {
        assert!(self.normal_exited(), "Process is not normal exited");
        u8::try_from(WEXITSTATUS(self.status())).unwrap()
    }

    pub fn is_success(&self) -> bool {
        self.normal_exited() && self.exit_code() == 0
    }

    /// The value reported to the front-end: exit code, or 128 + signal.
    pub fn status_value(&self) -> i32 {
        if self.signal_exited() {
            128 + self.signal_code()
        } else if self.normal_exited() {
            i32::from(self.exit_code())
        } else {
            panic!("Process is not exited")
        }
    }
}

/// The condition under which a stage's successor runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainRule {
    /// The successor always runs.
    Always,
    /// The successor runs iff this stage's status is zero.
    OnSuccess,
    /// The successor runs iff this stage's status is nonzero.
    OnFailure,
    /// The successor runs at the same time, reading this stage's output.
    Concurrent,
    /// There is no successor to run.
    Never,
}

bitflags! {
    /// Per-stage execution flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct StageFlags: u8 {
        /// Wait for the stage synchronously.
        const WAIT = 1 << 0;
        /// Suppress the completion notification for a background job.
        const QUIET = 1 << 1;
        /// Detach: start as a background job.
        const DETACH = 1 << 2;
        /// Run under the environment-capture monitor, propagating the
        /// child's final environment and working directory to the shell.
        const MONITOR_ENV = 1 << 3;
    }
}

impl Default for StageFlags {
    fn default() -> Self {
        StageFlags::WAIT
    }
}

/// Whether a stage names an external program or an in-process builtin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandKind {
    /// Not yet resolved; the executor consults its command resolver.
    Unresolved,
    /// An external program at a resolved path.
    External(PathBuf),
    /// An in-process builtin, named by argv[0].
    Builtin,
}

/// One command in a pipeline: argument vector, resolved command, per-stream
/// redirections, flags, and the link to the next stage with its chaining
/// condition. Stages form a singly linked chain.
pub struct Stage {
    pub argv: Vec<String>,
    pub command: CommandKind,
    pub redirections: RedirectionSpecList,
    pub flags: StageFlags,
    /// The rule linking to `next`.
    pub chain: ChainRule,
    pub next: Option<Box<Stage>>,
}

impl Stage {
    pub fn new(argv: Vec<String>) -> Self {
        assert!(!argv.is_empty(), "A stage needs at least argv[0]");
        Stage {
            argv,
            command: CommandKind::Unresolved,
            redirections: Vec::new(),
            flags: StageFlags::default(),
            chain: ChainRule::Never,
            next: None,
        }
    }

    pub fn with_flags(mut self, flags: StageFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn argv0(&self) -> &str {
        &self.argv[0]
    }
}

/// A resolved pipeline: the head of a stage chain plus the original command
/// text for display.
pub struct Pipeline {
    pub first: Stage,
    pub command_text: String,
}

impl Pipeline {
    pub fn new(first: Stage) -> Self {
        let command_text = first.argv.join(" ");
        Pipeline {
            first,
            command_text,
        }
    }

    /// Append a stage at the end of the chain, linked by `rule`.
    pub fn push(&mut self, rule: ChainRule, stage: Stage) -> &mut Self {
        let mut cursor = &mut self.first;
        while cursor.next.is_some() {
            cursor = cursor.next.as_mut().unwrap();
        }
        cursor.chain = rule;
        cursor.next = Some(Box::new(stage));
        self
    }

    /// Iterate the stages front to back.
    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        let mut cursor = Some(&self.first);
        std::iter::from_fn(move || {
            let stage = cursor?;
            cursor = stage.next.as_deref();
            Some(stage)
        })
    }

    pub fn len(&self) -> usize {
        self.stages().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proc_status_round_trips() {
        let ok = ProcStatus::from_exit_code(0);
        assert!(ok.normal_exited());
        assert!(ok.is_success());
        assert_eq!(ok.status_value(), 0);

        let failed = ProcStatus::from_exit_code(3);
        assert!(!failed.is_success());
        assert_eq!(failed.status_value(), 3);

        let killed = ProcStatus::from_signal(libc::SIGTERM);
        assert!(killed.signal_exited());
        assert_eq!(killed.status_value(), 128 + libc::SIGTERM);

        assert!(ProcStatus::empty().is_empty());
    }

    #[test]
    fn test_pipeline_chain() {
        let mut pipeline = Pipeline::new(Stage::new(vec!["a".into()]));
        pipeline.push(ChainRule::OnSuccess, Stage::new(vec!["b".into()]));
        pipeline.push(ChainRule::Always, Stage::new(vec!["c".into()]));

        let names: Vec<&str> = pipeline.stages().map(|s| s.argv0()).collect();
        assert_eq!(names, ["a", "b", "c"]);

        let rules: Vec<ChainRule> = pipeline.stages().map(|s| s.chain).collect();
        assert_eq!(
            rules,
            [ChainRule::OnSuccess, ChainRule::Always, ChainRule::Never]
        );
    }
}
