//! Specifying and applying redirections.
//!
//! A redirection spec is purely descriptive; resolving it opens files and
//! produces an [`IoChain`](crate::io::IoChain). For external stages the chain
//! lowers to a dup2 list applied in the forked child. For builtins, which run
//! in-process, [`SavedStreams`] temporarily installs the chain over the
//! calling process's standard streams and restores them afterward.

use crate::fds::dup_high_cloexec;
use crate::fds::set_cloexec;
use crate::flog::FLOG;
use crate::io::IoChain;
use nix::fcntl::OFlag;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RedirectionMode {
    /// Normal redirection: > file.txt
    Overwrite,
    /// Appending redirection: >> file.txt
    Append,
    /// Input redirection: < file.txt
    Input,
    /// Discard or supply nothing: redirect to the null device.
    Null,
    /// Fd redirection: 2>&1
    Fd,
}

impl RedirectionMode {
    /// The open flags for this redirection mode, where a file is opened.
    /// For `Null` the direction depends on the redirected fd, so the caller
    /// passes whether this is an output stream.
    pub fn oflags(self, is_output: bool) -> Option<OFlag> {
        match self {
            RedirectionMode::Append => Some(OFlag::O_CREAT | OFlag::O_APPEND | OFlag::O_WRONLY),
            RedirectionMode::Overwrite => Some(OFlag::O_CREAT | OFlag::O_WRONLY | OFlag::O_TRUNC),
            RedirectionMode::Input => Some(OFlag::O_RDONLY),
            RedirectionMode::Null => Some(if is_output {
                OFlag::O_WRONLY
            } else {
                OFlag::O_RDONLY
            }),
            RedirectionMode::Fd => None,
        }
    }
}

/// The target of a redirection, already resolved by the front-end's parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RedirectionTarget {
    /// A file path, possibly relative to the shell's working directory.
    Path(PathBuf),
    /// Another fd, as in 2>&1.
    Fd(RawFd),
    /// Close the fd, as in 2>&-.
    Close,
    /// The null device.
    Null,
}

/// One redirection requested for a stage. The fds here are textual, not yet
/// open files: in "3>&1", `fd` is 3 and the target is fd 1.
#[derive(Clone, Debug)]
pub struct RedirectionSpec {
    /// The redirected fd.
    pub fd: RawFd,
    /// The redirection mode.
    pub mode: RedirectionMode,
    /// The target of the redirection.
    pub target: RedirectionTarget,
}

impl RedirectionSpec {
    pub fn new(fd: RawFd, mode: RedirectionMode, target: RedirectionTarget) -> Self {
        Self { fd, mode, target }
    }

    /// Return if this is a close-type redirection.
    pub fn is_close(&self) -> bool {
        self.target == RedirectionTarget::Close
    }
}

pub type RedirectionSpecList = Vec<RedirectionSpec>;

/// The action dup2(src, target). A negative target means close(src).
/// None of the fds here are owned.
#[derive(Clone, Copy)]
pub struct Dup2Action {
    pub src: i32,
    pub target: i32,
}

/// A sequence of basic fd redirections, ready to apply in a child.
#[derive(Default)]
pub struct Dup2List {
    pub actions: Vec<Dup2Action>,
}

/// Produce a Dup2List from an io chain. The chain must stay alive while the
/// list is used; the list borrows its open fds.
pub fn dup2_list_resolve_chain(io_chain: &IoChain) -> Dup2List {
    let mut result = Dup2List { actions: vec![] };
    for io in &io_chain.0 {
        if io.source_fd() < 0 {
            result.add_close(io.fd())
        } else {
            result.add_dup2(io.source_fd(), io.fd())
        }
    }
    result
}

impl Dup2List {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn get_actions(&self) -> &[Dup2Action] {
        &self.actions
    }

    /// Return the fd ultimately dup'd to a target fd, or -1 if the target is
    /// closed. With a chain 5->3 and 3->1, the answer for target 1 is 5. If
    /// the target is not referenced, returns target itself.
    pub fn fd_for_target_fd(&self, target: RawFd) -> RawFd {
        if target < 0 {
            return target;
        }
        // Walk the action list backwards looking for src -> target dups.
        let mut cursor = target;
        for action in self.actions.iter().rev() {
            if action.target == cursor {
                cursor = action.src;
            } else if action.src == cursor && action.target < 0 {
                cursor = -1;
                break;
            }
        }
        cursor
    }

    /// Append a dup2 action. Src and target may be equal; that records that
    /// the CLOEXEC bit must be cleared on the fd.
    pub fn add_dup2(&mut self, src: RawFd, target: RawFd) {
        assert!(src >= 0 && target >= 0, "Invalid fd in add_dup2");
        self.actions.push(Dup2Action { src, target });
    }

    /// Append a close action.
    pub fn add_close(&mut self, fd: RawFd) {
        assert!(fd >= 0, "Invalid fd in add_close");
        self.actions.push(Dup2Action {
            src: fd,
            target: -1,
        })
    }
}

/// The saved state of the process's standard streams, produced by
/// [`SavedStreams::apply`]. Restoring happens exactly once: either through
/// an explicit [`restore`](SavedStreams::restore) or, failing that, when the
/// value is dropped, so every exit path puts the streams back.
pub struct SavedStreams {
    /// Affected fd paired with a high cloexec duplicate of its previous
    /// occupant, or None if the fd was closed before apply.
    saved: Vec<(RawFd, Option<OwnedFd>)>,
    restored: bool,
}

impl SavedStreams {
    /// Install `chain` over the calling process's fds. Every affected fd is
    /// first duplicated out of the way. If any single stream fails, all
    /// streams already redirected are rolled back and the specific error is
    /// returned.
    pub fn apply(chain: &IoChain) -> io::Result<SavedStreams> {
        let dup2s = dup2_list_resolve_chain(chain);
        let mut this = SavedStreams {
            saved: Vec::new(),
            restored: false,
        };

        for act in dup2s.get_actions() {
            let affected = if act.target >= 0 { act.target } else { act.src };
            if this.saved.iter().any(|(fd, _)| *fd == affected) {
                continue;
            }
            match dup_high_cloexec(affected) {
                Ok(saved) => this.saved.push((affected, Some(saved))),
                Err(err) if err.raw_os_error() == Some(libc::EBADF) => {
                    this.saved.push((affected, None))
                }
                Err(err) => {
                    // Nothing applied yet; drop just releases the saved dups.
                    this.restored = true;
                    return Err(err);
                }
            }
        }

        for act in dup2s.get_actions() {
            let err = if act.target < 0 {
                unsafe { libc::close(act.src) }
            } else if act.target != act.src {
                unsafe { libc::dup2(act.src, act.target) }
            } else {
                // A self-dup like 6< file.txt landing on fd 6: record by
                // clearing the CLOEXEC bit.
                set_cloexec(act.src, false)
            };
            if err < 0 {
                let err = io::Error::last_os_error();
                FLOG!(redirect, "Failed to apply redirection, rolling back");
                this.do_restore();
                return Err(err);
            }
        }
        Ok(this)
    }

    /// Put the standard streams back. Consumes the saved state.
    pub fn restore(mut self) {
        self.do_restore();
    }

    fn do_restore(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        for (fd, saved) in self.saved.iter().rev() {
            match saved {
                Some(prev) => {
                    // dup2 clears CLOEXEC on the target, matching the state
                    // the fd had before apply.
                    unsafe { libc::dup2(prev.as_raw_fd(), *fd) };
                }
                None => {
                    unsafe { libc::close(*fd) };
                }
            }
        }
        self.saved.clear();
    }
}

impl Drop for SavedStreams {
    fn drop(&mut self) {
        self.do_restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{IoChain, IoFile};
    use std::fs;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::sync::Arc;

    fn fd_identity(fd: RawFd) -> (u64, u64) {
        use std::os::unix::fs::MetadataExt;
        let file = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
        let file = fs::File::from(file.try_clone_to_owned().unwrap());
        let md = file.metadata().unwrap();
        (md.dev(), md.ino())
    }

    #[test]
    #[serial_test::serial]
    fn test_apply_restore_round_trip() {
        let tmp = tempdir();
        let path = tmp.join("redirected.txt");
        let before = fd_identity(libc::STDOUT_FILENO);

        let file = fs::File::create(&path).unwrap();
        let mut chain = IoChain::new();
        chain.push(Arc::new(IoFile::new(libc::STDOUT_FILENO, file)));

        {
            let saved = SavedStreams::apply(&chain).unwrap();
            // While applied, stdout refers to our temp file.
            let during = fd_identity(libc::STDOUT_FILENO);
            assert_ne!(before, during);
            let mut out = unsafe {
                fs::File::from(
                    std::os::fd::BorrowedFd::borrow_raw(libc::STDOUT_FILENO)
                        .try_clone_to_owned()
                        .unwrap(),
                )
            };
            writeln!(out, "into the file").unwrap();
            saved.restore();
        }

        let after = fd_identity(libc::STDOUT_FILENO);
        assert_eq!(before, after);
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "into the file\n");
        let _ = fs::remove_dir_all(tmp);
    }

    #[test]
    #[serial_test::serial]
    fn test_restore_runs_on_drop() {
        let tmp = tempdir();
        let before = fd_identity(libc::STDOUT_FILENO);
        let file = fs::File::create(tmp.join("dropped.txt")).unwrap();
        let mut chain = IoChain::new();
        chain.push(Arc::new(IoFile::new(libc::STDOUT_FILENO, file)));
        {
            let _saved = SavedStreams::apply(&chain).unwrap();
            // Dropped without an explicit restore.
        }
        assert_eq!(before, fd_identity(libc::STDOUT_FILENO));
        let _ = fs::remove_dir_all(tmp);
    }

    fn tempdir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("remora-redir-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_fd_for_target_fd() {
        let mut dup2s = Dup2List::new();
        dup2s.add_dup2(5, 3);
        dup2s.add_dup2(3, 1);
        assert_eq!(dup2s.fd_for_target_fd(1), 5);
        assert_eq!(dup2s.fd_for_target_fd(2), 2);
        dup2s.add_close(2);
        assert_eq!(dup2s.fd_for_target_fd(2), -1);
    }
}
