//! Launching external programs: fork, child-side redirection setup, execve.
//!
//! Everything that runs in the forked child must be async-signal safe: no
//! locking, no allocation. Error reporting down there goes through raw
//! writes of static strings.

use crate::builtins::shared::{STATUS_CMD_UNKNOWN, STATUS_NOT_EXECUTABLE};
use crate::common::exit_without_destructors;
use crate::fds::set_cloexec;
use crate::flog::{FLOG, FLOGF};
use crate::null_terminated_array::OwningNullTerminatedArray;
use crate::proc::Pid;
use crate::redirection::Dup2List;
use crate::signal::signal_reset_handlers;
use libc::{c_char, EACCES, ENOENT, ENOEXEC, ENOTDIR, EXIT_FAILURE, pid_t};
use std::ffi::CStr;
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// The number of times to try fork() before giving up.
const FORK_LAPS: usize = 5;

/// How long to sleep between fork() attempts.
const FORK_SLEEP_TIME: Duration = Duration::from_micros(1000);

/// Number of fork() calls made, for logging.
static FORK_COUNT: AtomicUsize = AtomicUsize::new(0);

#[cfg(not(target_os = "android"))]
static PATH_BSHELL: &[u8] = b"/bin/sh\0";

#[cfg(target_os = "android")]
static PATH_BSHELL: &[u8] = b"/system/bin/sh\0";

/// Async-signal-safe write of a byte string to stderr.
fn safe_write_stderr(s: &[u8]) {
    unsafe {
        libc::write(libc::STDERR_FILENO, s.as_ptr().cast(), s.len());
    }
}

/// Given an error from exec, return a conventional process exit code.
pub fn exit_code_from_exec_error(err: libc::c_int) -> libc::c_int {
    assert!(err != 0, "Zero is success, not an error");
    match err {
        ENOENT | ENOTDIR => {
            // Command not found (we do not open redirections via exec, so a
            // missing path here is always the command itself).
            STATUS_CMD_UNKNOWN
        }
        EACCES | ENOEXEC => {
            // The file is not executable for various reasons.
            STATUS_NOT_EXECUTABLE
        }
        _ => EXIT_FAILURE,
    }
}

/// A 'looks like text' check: true if either there is no NUL byte, or a line
/// containing a lowercase letter appears before the first NUL byte. The ASCII
/// magic of binary files is usually uppercase, so this lets classic shebang-
/// less scripts through while keeping binaries away from /bin/sh.
fn is_shell_script_payload(p: &[u8]) -> bool {
    if !p.contains(&b'\0') {
        return true;
    }
    let mut haslower = false;
    for c in p {
        if c.is_ascii_lowercase() || *c == b'$' || *c == b'`' {
            haslower = true;
        }
        if haslower && *c == b'\n' {
            return true;
        }
    }
    false
}

/// Check the beginning of a file to decide whether it is safe to hand to the
/// system shell after execve() returned ENOEXEC. Called post-fork: must not
/// allocate.
fn is_shell_script(path: &CStr) -> bool {
    let e = errno::errno();
    let mut res = false;
    if let Ok(fd) = nix::fcntl::open(
        path,
        nix::fcntl::OFlag::O_RDONLY | nix::fcntl::OFlag::O_NOCTTY,
        nix::sys::stat::Mode::empty(),
    ) {
        let mut file = std::fs::File::from(fd);
        let mut buf = [b'\0'; 256];
        if let Ok(got) = file.read(&mut buf) {
            if is_shell_script_payload(&buf[..got]) {
                res = true;
            }
        }
    }
    errno::set_errno(e);
    res
}

/// Called in the forked child after setup: replace the image via execve.
/// Never returns. On ENOEXEC for something that looks like a script, retries
/// once through the system shell, the alternate launch path for files the
/// kernel refuses directly.
pub fn safe_launch_process(
    actual_cmd: &CStr,
    argv: &OwningNullTerminatedArray,
    envv: &OwningNullTerminatedArray,
) -> ! {
    unsafe { libc::execve(actual_cmd.as_ptr(), argv.get(), envv.get()) };
    let err = errno::errno();

    if err.0 == ENOEXEC && is_shell_script(actual_cmd) {
        // Build a new argv prefixed with the shell. No allocation allowed, so
        // only a bounded argument count is supported.
        const MAXARGS: usize = 128;
        let nargs = argv.len();
        if nargs <= MAXARGS {
            let argv_ptrs =
                unsafe { std::slice::from_raw_parts(argv.get() as *const *const c_char, nargs) };
            let mut argv2 = [std::ptr::null::<c_char>(); 1 + MAXARGS + 1];
            let bshell = PATH_BSHELL.as_ptr() as *const c_char;
            argv2[0] = bshell;
            argv2[1..nargs + 1].copy_from_slice(argv_ptrs);
            // The shell should see the full path, not what we'd pass as argv0.
            argv2[1] = actual_cmd.as_ptr();
            unsafe {
                libc::execve(bshell, argv2.as_ptr(), envv.get());
            }
        }
    }

    errno::set_errno(err);
    safe_report_exec_error(err.0, actual_cmd);
    exit_without_destructors(exit_code_from_exec_error(err.0));
}

/// Async-signal-safe exec failure report on stderr.
fn safe_report_exec_error(err: i32, actual_cmd: &CStr) {
    safe_write_stderr(b"remora: failed to execute '");
    safe_write_stderr(actual_cmd.to_bytes());
    match err {
        ENOENT | ENOTDIR => {
            safe_write_stderr(b"': no such file or directory\n");
        }
        EACCES => {
            safe_write_stderr(b"': permission denied\n");
        }
        ENOEXEC => {
            safe_write_stderr(b"': the file could not be run by the operating system\n");
        }
        libc::EISDIR => {
            safe_write_stderr(b"': the file is a directory\n");
        }
        libc::E2BIG => {
            safe_write_stderr(b"': argument list too long\n");
        }
        _ => {
            safe_write_stderr(b"': exec failed\n");
        }
    }
}

/// Apply redirections and signal handling in the forked child. Returns 0 on
/// success; on failure the child exits.
pub fn child_setup_process(dup2s: &Dup2List) -> i32 {
    for act in &dup2s.actions {
        let err = if act.target < 0 {
            unsafe { libc::close(act.src) }
        } else if act.target != act.src {
            unsafe { libc::dup2(act.src, act.target) }
        } else {
            // A self-dup like 6< file.txt: the opened (cloexec) file wants to
            // survive exec on its own fd, so just clear the flag.
            set_cloexec(act.src, false)
        };
        if err < 0 {
            safe_write_stderr(b"remora: failed to set up file descriptors in child\n");
            exit_without_destructors(1);
        }
    }
    // Set job control and interrupt signals back to the default.
    signal_reset_handlers();
    0
}

/// Wrapper around fork(). EAGAIN is retried a few times with a slight delay;
/// any other failure is returned.
pub fn execute_fork() -> nix::Result<pid_t> {
    let mut err = nix::Error::EAGAIN;
    for i in 0..FORK_LAPS {
        let pid = unsafe { libc::fork() };
        if pid >= 0 {
            return Ok(pid);
        }
        err = nix::Error::last();
        if err != nix::Error::EAGAIN {
            break;
        }
        if i != FORK_LAPS - 1 {
            std::thread::sleep(FORK_SLEEP_TIME);
        }
    }
    FLOG!(error, "fork failed:", err);
    Err(err)
}

/// Fork and exec an external command. The dup2 list is applied in the child;
/// when `traced` is set the child requests tracing before exec so a
/// child-state observer receives its lifecycle notifications.
pub fn spawn_external(
    actual_cmd: &CStr,
    argv: &OwningNullTerminatedArray,
    envp: &OwningNullTerminatedArray,
    dup2s: &Dup2List,
    traced: bool,
) -> nix::Result<Pid> {
    let fork_res = execute_fork()?;
    if fork_res == 0 {
        // Child.
        if traced {
            #[cfg(target_os = "linux")]
            let _ = nix::sys::ptrace::traceme();
        }
        child_setup_process(dup2s);
        safe_launch_process(actual_cmd, argv, envp);
    }

    let count = FORK_COUNT.fetch_add(1, Ordering::Relaxed) + 1;
    FLOGF!(exec_fork, "Fork #{}, pid {}", count, fork_res);
    Ok(Pid::new(fork_res))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_from_exec_error() {
        assert_eq!(exit_code_from_exec_error(ENOENT), STATUS_CMD_UNKNOWN);
        assert_eq!(exit_code_from_exec_error(EACCES), STATUS_NOT_EXECUTABLE);
        assert_eq!(exit_code_from_exec_error(libc::ENOMEM), EXIT_FAILURE);
    }

    #[test]
    fn test_shell_script_payload() {
        assert!(is_shell_script_payload(b"echo hello\n"));
        assert!(!is_shell_script_payload(b"\x7fELF\0\0\0"));
        // A lowercase line before the first NUL is accepted.
        assert!(is_shell_script_payload(b"run me\n\0binary tail"));
    }
}
