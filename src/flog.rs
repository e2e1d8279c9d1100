//! Category-based logging. Each category carries an atomic enable flag so the
//! hot path is a single relaxed load; output goes to a process-wide log fd
//! which defaults to stderr.

use crate::common::write_loop;
use libc::c_int;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicI32, Ordering};

pub mod categories {
    use std::sync::atomic::AtomicBool;

    pub struct Category {
        pub name: &'static str,
        pub description: &'static str,
        pub enabled: AtomicBool,
    }

    macro_rules! declare_category {
        (($var:ident, $name:literal, $description:literal, $enabled:expr)) => {
            pub static $var: Category = Category {
                name: $name,
                description: $description,
                enabled: AtomicBool::new($enabled),
            };
        };
        (($var:ident, $name:literal, $description:literal)) => {
            declare_category!(($var, $name, $description, false));
        };
    }

    macro_rules! category_name {
        (($var:ident, $name:literal, $description:literal, $enabled:expr)) => {
            $var
        };
        (($var:ident, $name:literal, $description:literal)) => {
            $var
        };
    }

    macro_rules! categories {
        ($($cats:tt);* $(;)?) => {
            $(
                declare_category!($cats);
            )*

            /// All categories, for enumeration and pattern matching.
            pub fn all_categories() -> Vec<&'static Category> {
                vec![
                    $(
                        &category_name!($cats),
                    )*
                ]
            }
        };
    }

    categories!(
        (error, "error", "Serious unexpected errors (on by default)", true);

        (warning, "warning", "Warnings (on by default)", true);

        (exec, "exec", "Errors reported while launching stages (on by default)", true);

        (exec_fork, "exec-fork", "Calls to fork()");

        (exec_job_status, "exec-job-status", "Stages and chains changing status");

        (pump, "pump", "Output buffer pump threads");

        (redirect, "redirect", "Applying and restoring redirections");

        (monitor, "monitor", "The environment-capture monitor");

        (waitcoord, "waitcoord", "The wait/cancellation coordinator");

        (jobs, "jobs", "Background job bookkeeping");
    );
}

/// FLOG arguments format via Display; types that only have Debug can opt in
/// by implementing FloggableDebug.
pub trait FloggableDisplay {
    fn to_flog_str(&self) -> String;
}

impl<T: std::fmt::Display> FloggableDisplay for T {
    fn to_flog_str(&self) -> String {
        self.to_string()
    }
}

pub trait FloggableDebug: std::fmt::Debug {
    fn to_flog_str(&self) -> String {
        format!("{:?}", self)
    }
}

/// Write one formatted line to the log fd.
pub fn flog_impl(s: &str) {
    let fd = get_flog_file_fd();
    if fd < 0 {
        return;
    }
    struct Fd(RawFd);
    impl AsRawFd for Fd {
        fn as_raw_fd(&self) -> RawFd {
            self.0
        }
    }
    let _ = write_loop(&Fd(fd), s.as_bytes());
}

/// The entry point for logging.
#[macro_export]
macro_rules! FLOG {
    ($category:ident, $($elem:expr),+ $(,)*) => {
        if $crate::flog::categories::$category.enabled.load(std::sync::atomic::Ordering::Relaxed) {
            #[allow(unused_imports)]
            use $crate::flog::{FloggableDisplay, FloggableDebug};
            let mut vs = vec![format!("{}:", $crate::flog::categories::$category.name)];
            $(
                {
                    vs.push($elem.to_flog_str())
                }
            )+
            // No locking: append our own newline so the line goes out in one write.
            let mut v = vs.join(" ");
            v.push('\n');
            $crate::flog::flog_impl(&v);
        }
    };
}

#[macro_export]
macro_rules! FLOGF {
    ($category:ident, $fmt:expr, $($elem:expr),+ $(,)*) => {
        $crate::FLOG!($category, format!($fmt, $($elem),*))
    }
}

#[macro_export]
macro_rules! should_flog {
    ($category:ident) => {
        $crate::flog::categories::$category
            .enabled
            .load(std::sync::atomic::Ordering::Relaxed)
    };
}

pub use {should_flog, FLOG, FLOGF};

/// Enable or disable each category whose name matches `pattern`. A trailing
/// '*' matches any suffix; a leading '-' disables instead of enabling.
fn apply_one_pattern(pattern: &str, sense: bool) {
    let matches = |name: &str| -> bool {
        match pattern.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => name == pattern,
        }
    };
    let mut match_found = false;
    for cat in categories::all_categories() {
        if matches(cat.name) {
            cat.enabled.store(sense, Ordering::Relaxed);
            match_found = true;
        }
    }
    if !match_found {
        eprintln!("Failed to match debug category: {pattern}");
    }
}

/// Set the active log categories according to a comma-separated list of
/// patterns. Underscores are normalized to dashes.
pub fn activate_flog_categories_by_pattern(patterns: &str) {
    let patterns = patterns.replace('_', "-");
    for s in patterns.split(',') {
        if s.is_empty() {
            continue;
        }
        if let Some(rest) = s.strip_prefix('-') {
            apply_one_pattern(rest, false);
        } else {
            apply_one_pattern(s, true);
        }
    }
}

/// The log output fd. Defaults to stderr. A value < 0 disables logging.
static FLOG_FD: AtomicI32 = AtomicI32::new(libc::STDERR_FILENO);

pub fn set_flog_file_fd(fd: c_int) {
    FLOG_FD.store(fd, Ordering::Relaxed);
}

#[inline]
pub fn get_flog_file_fd() -> c_int {
    FLOG_FD.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_toggle() {
        activate_flog_categories_by_pattern("exec-*");
        assert!(should_flog!(exec_fork));
        assert!(should_flog!(exec_job_status));
        activate_flog_categories_by_pattern("-exec-*");
        assert!(!should_flog!(exec_fork));
        // The bare category is unaffected by the dashed prefix pattern.
        activate_flog_categories_by_pattern("exec");
        assert!(should_flog!(exec));
    }
}
