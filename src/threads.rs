//! Thread spawning helpers. Every background thread in this crate (buffer
//! pumps, job reapers, monitor event pumps) goes through [`spawn`] so threads
//! carry a recognizable name and a log line.

use crate::flog::FLOG;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

static SPAWN_COUNT: AtomicU64 = AtomicU64::new(0);

/// Spawn a named background thread. The name shows up in debuggers and in
/// /proc/<pid>/task/*/comm, prefixed to group this crate's threads together.
pub fn spawn<F: FnOnce() + Send + 'static>(name: &str, f: F) -> io::Result<JoinHandle<()>> {
    let count = SPAWN_COUNT.fetch_add(1, Ordering::Relaxed) + 1;
    FLOG!(pump, "Spawning thread", name, "#", count);
    std::thread::Builder::new()
        .name(format!("remora-{name}"))
        .spawn(f)
}
