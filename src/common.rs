//! Small helpers shared across the crate.

use std::ffi::CString;
use std::ops::{Deref, DerefMut};
use std::os::fd::{AsRawFd, BorrowedFd};

pub const fn assert_send<T: Send>() {}
pub const fn assert_sync<T: Sync>() {}

/// Exit the process immediately, running no destructors. This is the only
/// safe way to leave a forked child which must not unwind through parent
/// state, and is also used when the process is beyond saving (fd exhaustion
/// at startup, etc).
pub fn exit_without_destructors(code: libc::c_int) -> ! {
    unsafe { libc::_exit(code) }
}

/// Write a whole buffer to `fd`, retrying on EINTR and EAGAIN.
pub fn write_loop<Fd: AsRawFd>(fd: &Fd, buf: &[u8]) -> std::io::Result<usize> {
    let fd = fd.as_raw_fd();
    let mut total = 0;
    while total < buf.len() {
        match nix::unistd::write(unsafe { BorrowedFd::borrow_raw(fd) }, &buf[total..]) {
            Ok(written) => {
                total += written;
            }
            Err(err) => {
                if matches!(err, nix::Error::EAGAIN | nix::Error::EINTR) {
                    continue;
                }
                return Err(std::io::Error::from(err));
            }
        }
    }
    Ok(total)
}

/// Return the prefix of `s` up to (not including) the first NUL byte.
pub fn truncate_at_nul(s: &str) -> &str {
    match s.find('\0') {
        Some(idx) => &s[..idx],
        None => s,
    }
}

/// Convert a string to a CString, truncating at the first NUL rather than
/// failing. Arguments handed to exec may not contain interior NULs anyway.
pub fn cstring(s: &str) -> CString {
    CString::new(truncate_at_nul(s)).expect("NUL was truncated")
}

/// A value with a callback that runs when the guard is dropped, unless
/// cancelled. Used to guarantee cleanup on every exit path.
pub struct ScopeGuard<T, F: FnOnce(&mut T)>(Option<(T, F)>);

impl<T, F: FnOnce(&mut T)> ScopeGuard<T, F> {
    /// Create a guard wrapping `value`. `on_drop` runs when the guard's
    /// lifetime expires or when it is committed.
    pub fn new(value: T, on_drop: F) -> Self {
        Self(Some((value, on_drop)))
    }

    /// Invoke the callback now and return the wrapped value.
    pub fn commit(mut guard: Self) -> T {
        let (mut value, on_drop) = guard.0.take().expect("Should always have Some value");
        on_drop(&mut value);
        value
    }

    /// Cancel the callback, returning the wrapped value untouched.
    pub fn cancel(mut guard: Self) -> T {
        let (value, _) = guard.0.take().expect("Should always have Some value");
        value
    }
}

impl<T, F: FnOnce(&mut T)> Deref for ScopeGuard<T, F> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0.as_ref().unwrap().0
    }
}

impl<T, F: FnOnce(&mut T)> DerefMut for ScopeGuard<T, F> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0.as_mut().unwrap().0
    }
}

impl<T, F: FnOnce(&mut T)> Drop for ScopeGuard<T, F> {
    fn drop(&mut self) {
        if let Some((mut value, on_drop)) = self.0.take() {
            on_drop(&mut value);
        }
    }
}

/// Trait for statics looked up by name in a sorted table.
pub trait Named {
    fn name(&self) -> &'static str;
}

/// Binary-search a sorted table of named values.
pub fn get_by_sorted_name<T: Named>(name: &str, vals: &'static [T]) -> Option<&'static T> {
    match vals.binary_search_by_key(&name, |val| val.name()) {
        Ok(index) => Some(&vals[index]),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_guard_runs_on_drop() {
        let mut ran = false;
        {
            let _guard = ScopeGuard::new(&mut ran, |r| **r = true);
        }
        assert!(ran);
    }

    #[test]
    fn test_scope_guard_cancel() {
        let mut ran = false;
        {
            let guard = ScopeGuard::new(&mut ran, |r| **r = true);
            ScopeGuard::cancel(guard);
        }
        assert!(!ran);
    }

    #[test]
    fn test_truncate_at_nul() {
        assert_eq!(truncate_at_nul("ab\0cd"), "ab");
        assert_eq!(truncate_at_nul("abcd"), "abcd");
    }
}
