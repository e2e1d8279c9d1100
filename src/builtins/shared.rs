//! Builtin dispatch: the status-code conventions, the registry, and the
//! invocation path shared by every builtin.

use super::prelude::*;
use crate::common::{get_by_sorted_name, Named};
use crate::env::ShellEnv;
use crate::flog::FLOGF;
use crate::jobs::JobTable;
use crate::proc::ProcStatus;

/// The status code used for normal exit in a command.
pub const STATUS_CMD_OK: c_int = 0;

/// The status code used for failure exit in a command (but not if the args
/// were invalid).
pub const STATUS_CMD_ERROR: c_int = 1;

/// The status code used for invalid arguments given to a command: an
/// unrecognized flag, missing or too many arguments, an invalid integer.
pub const STATUS_INVALID_ARGS: c_int = 2;

/// The status code used when a command was not found.
pub const STATUS_CMD_UNKNOWN: c_int = 127;

/// The status code used when an external command can not be run.
pub const STATUS_NOT_EXECUTABLE: c_int = 126;

/// The status code used when a capture consumed too much data.
pub const STATUS_READ_TOO_MUCH: c_int = 122;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Success;

pub const SUCCESS: Success = Success;

pub type ErrorCode = c_int;

pub type BuiltinResult = Result<Success, ErrorCode>;

pub trait BuiltinResultExt {
    fn from_dynamic(code: c_int) -> Self;
    fn builtin_status_code(&self) -> c_int;
}

impl BuiltinResultExt for BuiltinResult {
    fn from_dynamic(code: c_int) -> Self {
        if code == 0 {
            Ok(SUCCESS)
        } else {
            Err(code)
        }
    }
    fn builtin_status_code(&self) -> c_int {
        match self {
            Ok(_) => 0,
            Err(err) => *err,
        }
    }
}

/// The shell state a builtin may touch: variables and the job table. Scoped
/// to the executor, not global.
pub struct BuiltinContext<'a> {
    pub env: &'a mut ShellEnv,
    pub jobs: &'a JobTable,
}

/// A statically known builtin implementation.
pub type BuiltinCmd = fn(&mut BuiltinContext, &mut IoStreams, &mut [&str]) -> BuiltinResult;

/// A dynamically registered builtin implementation.
pub type BuiltinCallback =
    Box<dyn Fn(&mut BuiltinContext, &mut IoStreams, &mut [&str]) -> BuiltinResult>;

/// Data structure to describe a builtin.
struct BuiltinData {
    name: &'static str,
    func: BuiltinCmd,
}

// The static builtin table, the "exported symbol" half of resolution.
// NOTE: Must be kept in sorted order!
const BUILTIN_DATAS: &[BuiltinData] = &[
    BuiltinData {
        name: "cd",
        func: super::cd::cd,
    },
    BuiltinData {
        name: "echo",
        func: super::echo::echo,
    },
    BuiltinData {
        name: "false",
        func: builtin_false,
    },
    BuiltinData {
        name: "jobs",
        func: super::jobs::jobs,
    },
    BuiltinData {
        name: "pwd",
        func: super::pwd::pwd,
    },
    BuiltinData {
        name: "set",
        func: super::set::set,
    },
    BuiltinData {
        name: "true",
        func: builtin_true,
    },
];

impl Named for BuiltinData {
    fn name(&self) -> &'static str {
        self.name
    }
}

fn builtin_true(
    _ctx: &mut BuiltinContext,
    _streams: &mut IoStreams,
    _argv: &mut [&str],
) -> BuiltinResult {
    Ok(SUCCESS)
}

fn builtin_false(
    _ctx: &mut BuiltinContext,
    _streams: &mut IoStreams,
    _argv: &mut [&str],
) -> BuiltinResult {
    Err(STATUS_CMD_ERROR)
}

/// A resolved handler: a registered callback or a static table entry.
pub enum BuiltinHandler<'a> {
    Registered(&'a BuiltinCallback),
    Static(BuiltinCmd),
}

/// The builtin registry for one shell instance. Dynamically registered
/// callbacks resolve before the static table, most recent first, so a
/// front-end can shadow any builtin.
pub struct BuiltinRegistry {
    registered: Vec<(String, BuiltinCallback)>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        BuiltinRegistry {
            registered: Vec::new(),
        }
    }

    /// Register a callback under `name`, shadowing earlier registrations and
    /// the static table.
    pub fn register(&mut self, name: impl Into<String>, callback: BuiltinCallback) {
        self.registered.push((name.into(), callback));
    }

    /// Remove the most recent registration for `name`. Returns whether one
    /// was removed.
    pub fn unregister(&mut self, name: &str) -> bool {
        if let Some(idx) = self.registered.iter().rposition(|(n, _)| n == name) {
            self.registered.remove(idx);
            true
        } else {
            false
        }
    }

    /// Resolve a command name to a handler: registered callbacks first (most
    /// recent wins), then the static table.
    pub fn resolve(&self, name: &str) -> Option<BuiltinHandler<'_>> {
        if let Some((_, callback)) = self.registered.iter().rev().find(|(n, _)| n == name) {
            return Some(BuiltinHandler::Registered(callback));
        }
        get_by_sorted_name(name, BUILTIN_DATAS).map(|data| BuiltinHandler::Static(data.func))
    }

    /// Is there a builtin with the given name?
    pub fn exists(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// All builtin names, static table plus registrations.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = BUILTIN_DATAS
            .iter()
            .map(|data| data.name.to_string())
            .collect();
        for (name, _) in &self.registered {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

/// Execute a builtin command synchronously on the calling thread. Flushes the
/// streams and folds their write errors into the status.
pub fn builtin_run(
    registry: &BuiltinRegistry,
    ctx: &mut BuiltinContext,
    argv: &mut [&str],
    streams: &mut IoStreams,
) -> ProcStatus {
    if argv.is_empty() {
        return ProcStatus::from_exit_code(STATUS_INVALID_ARGS);
    }

    let Some(handler) = registry.resolve(argv[0]) else {
        FLOGF!(error, "Unknown builtin '{}'", argv[0]);
        return ProcStatus::from_exit_code(STATUS_CMD_ERROR);
    };

    let builtin_ret = match handler {
        BuiltinHandler::Registered(callback) => callback(ctx, streams, argv),
        BuiltinHandler::Static(func) => func(ctx, streams, argv),
    };

    // If the builtin itself produced an error, use that; otherwise any error
    // from writing to out and then err, in that order.
    let out_ret = streams.out.flush_and_check_error();
    let err_ret = streams.err.flush_and_check_error();
    let mut code = builtin_ret.builtin_status_code();
    if code == 0 {
        code = out_ret;
    }
    if code == 0 {
        code = err_ret;
    }

    // The code lands in an 8-bit wait status: saturate rather than wrap to 0.
    if code > 255 {
        code = 255;
    }
    if code < 0 {
        FLOGF!(warning, "builtin {} returned invalid exit code {}", argv[0], code);
        code = ((256 + code) % 256).abs();
        if code == 0 {
            code = 255;
        }
    }

    ProcStatus::from_exit_code(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{IoChain, OutputStream, StringOutputStream};

    #[test]
    fn test_builtin_table_is_sorted() {
        let names: Vec<&str> = BUILTIN_DATAS.iter().map(|b| b.name).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted, "builtin table must stay sorted");
    }

    #[test]
    fn test_registered_shadows_static() {
        let mut registry = BuiltinRegistry::new();
        assert!(matches!(
            registry.resolve("true"),
            Some(BuiltinHandler::Static(_))
        ));
        registry.register(
            "true",
            Box::new(|_ctx, _streams, _argv| Err(STATUS_CMD_ERROR)),
        );
        assert!(matches!(
            registry.resolve("true"),
            Some(BuiltinHandler::Registered(_))
        ));
        assert!(registry.unregister("true"));
        assert!(matches!(
            registry.resolve("true"),
            Some(BuiltinHandler::Static(_))
        ));
        assert!(!registry.unregister("true"));
    }

    #[test]
    fn test_builtin_run_true_false() {
        let registry = BuiltinRegistry::new();
        let mut env = crate::env::ShellEnv::empty_at("/");
        let jobs = crate::jobs::JobTable::new();
        let mut ctx = BuiltinContext {
            env: &mut env,
            jobs: &jobs,
        };
        let chain = IoChain::new();
        let mut out = OutputStream::String(StringOutputStream::new());
        let mut err = OutputStream::String(StringOutputStream::new());
        let mut streams = IoStreams::new(&mut out, &mut err, &chain);

        let status = builtin_run(&registry, &mut ctx, &mut ["true"], &mut streams);
        assert!(status.is_success());
        let status = builtin_run(&registry, &mut ctx, &mut ["false"], &mut streams);
        assert_eq!(status.status_value(), STATUS_CMD_ERROR);
        let status = builtin_run(&registry, &mut ctx, &mut ["no-such"], &mut streams);
        assert_eq!(status.status_value(), STATUS_CMD_ERROR);
    }
}
