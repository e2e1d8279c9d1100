//! File descriptor helpers: close-on-exec pipes kept out of the user fd
//! range, cloexec and blocking-mode toggling, EINTR-safe open and close.

use crate::flog::FLOG;
use libc::{c_int, EINTR, FD_CLOEXEC, F_GETFD, F_GETFL, F_SETFD, F_SETFL, O_NONBLOCK};
use nix::fcntl::{FcntlArg, OFlag};
use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

pub const PIPE_ERROR: &str = "An error occurred while setting up pipe";

/// The first "high fd", considered outside the range of valid user-specified
/// redirections (like >&5).
pub const FIRST_HIGH_FD: RawFd = 10;

/// A pair of connected pipe ends.
pub struct AutoClosePipes {
    /// Read end of the pipe.
    pub read: OwnedFd,

    /// Write end of the pipe.
    pub write: OwnedFd,
}

/// Construct a pair of connected pipes, set to close-on-exec and moved out of
/// the user fd range. Returns an error on fd exhaustion.
pub fn make_autoclose_pipes() -> nix::Result<AutoClosePipes> {
    let pipes = match nix::unistd::pipe2(OFlag::O_CLOEXEC) {
        Ok(pipes) => pipes,
        Err(err) => {
            FLOG!(warning, PIPE_ERROR);
            return Err(err);
        }
    };

    let readp = heightenize_fd(pipes.0)?;
    let writep = heightenize_fd(pipes.1)?;

    Ok(AutoClosePipes {
        read: readp,
        write: writep,
    })
}

/// If the given fd is in the "user range", move it to a new close-on-exec fd
/// in the high range. The input is assumed to already have CLOEXEC set.
fn heightenize_fd(fd: OwnedFd) -> nix::Result<OwnedFd> {
    if fd.as_raw_fd() >= FIRST_HIGH_FD {
        return Ok(fd);
    }
    let newfd = nix::fcntl::fcntl(&fd, FcntlArg::F_DUPFD_CLOEXEC(FIRST_HIGH_FD))?;
    Ok(unsafe { OwnedFd::from_raw_fd(newfd) })
}

/// Duplicate `fd` to a close-on-exec fd in the high range. Used to save a
/// standard stream before redirecting over it.
pub fn dup_high_cloexec(fd: RawFd) -> io::Result<OwnedFd> {
    let newfd = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, FIRST_HIGH_FD) };
    if newfd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(newfd) })
}

/// Sets or clears CLOEXEC on a given fd.
pub fn set_cloexec(fd: RawFd, should_set: bool) -> c_int {
    // Fetch the existing flags first so we don't clobber anything else.
    let flags = unsafe { libc::fcntl(fd, F_GETFD, 0) };
    if flags < 0 {
        return -1;
    }
    let mut new_flags = flags;
    if should_set {
        new_flags |= FD_CLOEXEC;
    } else {
        new_flags &= !FD_CLOEXEC;
    }
    if flags == new_flags {
        0
    } else {
        unsafe { libc::fcntl(fd, F_SETFD, new_flags) }
    }
}

/// Open a path, setting close-on-exec atomically and retrying on EINTR.
pub fn open_cloexec(path: &Path, flags: OFlag, mode: nix::sys::stat::Mode) -> nix::Result<File> {
    let narrow = CString::new(path.as_os_str().as_bytes()).map_err(|_| nix::Error::EINVAL)?;
    loop {
        match nix::fcntl::open(narrow.as_c_str(), flags | OFlag::O_CLOEXEC, mode) {
            Ok(fd) => return Ok(File::from(fd)),
            Err(nix::Error::EINTR) => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Open /dev/null for the given direction, close-on-exec.
pub fn open_null(for_writing: bool) -> nix::Result<File> {
    let flags = if for_writing {
        OFlag::O_WRONLY
    } else {
        OFlag::O_RDONLY
    };
    open_cloexec(Path::new("/dev/null"), flags, nix::sys::stat::Mode::empty())
}

/// Close a file descriptor, retrying on EINTR.
pub fn exec_close(fd: RawFd) {
    assert!(fd >= 0, "Invalid fd");
    while unsafe { libc::close(fd) } == -1 {
        if errno::errno().0 != EINTR {
            break;
        }
    }
}

/// Mark an fd as nonblocking.
pub fn make_fd_nonblocking(fd: RawFd) -> Result<(), io::Error> {
    let flags = unsafe { libc::fcntl(fd, F_GETFL, 0) };
    let nonblocking = (flags & O_NONBLOCK) == O_NONBLOCK;
    if !nonblocking {
        match unsafe { libc::fcntl(fd, F_SETFL, flags | O_NONBLOCK) } {
            -1 => return Err(io::Error::last_os_error()),
            _ => return Ok(()),
        };
    }
    Ok(())
}

/// Mark an fd as blocking.
pub fn make_fd_blocking(fd: RawFd) -> Result<(), io::Error> {
    let flags = unsafe { libc::fcntl(fd, F_GETFL, 0) };
    let nonblocking = (flags & O_NONBLOCK) == O_NONBLOCK;
    if nonblocking {
        match unsafe { libc::fcntl(fd, F_SETFL, flags & !O_NONBLOCK) } {
            -1 => return Err(io::Error::last_os_error()),
            _ => return Ok(()),
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{make_autoclose_pipes, FIRST_HIGH_FD};
    use libc::{FD_CLOEXEC, F_GETFD};
    use std::os::fd::AsRawFd;

    #[test]
    fn test_pipes() {
        // Each pipe end must have CLOEXEC set and sit in the high range.
        // Pipe creation may fail under fd exhaustion; don't fail in that case.
        let mut pipes = vec![];
        for _i in 0..10 {
            if let Ok(pipe) = make_autoclose_pipes() {
                pipes.push(pipe);
            }
        }
        for pipe in pipes {
            for fd in [&pipe.read, &pipe.write] {
                let fd = fd.as_raw_fd();
                assert!(fd >= FIRST_HIGH_FD);
                let flags = unsafe { libc::fcntl(fd, F_GETFD, 0) };
                assert!(flags >= 0);
                assert_ne!(flags & FD_CLOEXEC, 0);
            }
        }
    }
}
