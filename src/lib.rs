#![allow(clippy::new_without_default)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::uninlined_format_args)]

//! remora is the process-orchestration core of an interactive shell. It takes
//! a fully parsed pipeline (argument vectors, redirection targets and chaining
//! operators already resolved by the front-end) and drives it: wiring pipes,
//! dispatching builtins in-process, spawning external programs, capturing
//! output into reusable buffers, promoting foreground work to background jobs,
//! and propagating a monitored child interpreter's environment back into the
//! parent shell.

#[macro_use]
pub mod common;

pub mod builtins;
pub mod env;
pub mod exec;
pub mod fds;
pub mod flog;
pub mod input;
pub mod io;
pub mod jobs;
pub mod monitor;
pub mod null_terminated_array;
pub mod proc;
pub mod redirection;
pub mod signal;
pub mod spawn;
pub mod threads;
pub mod waitcoord;

#[cfg(test)]
mod tests;
