//! Background job bookkeeping: enumerate, fetch buffered output, wait,
//! terminate, reprioritize. Jobs are in-memory only; nothing persists.

use crate::flog::{FLOG, FLOGF};
use crate::io::ProcOutputBuffer;
use crate::proc::{Pid, ProcStatus};
use crate::signal::send_signal;
use crate::threads;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// A never-recycled job identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// An external stage detached from synchronous waiting, trackable and
/// terminable independently.
pub struct Job {
    pub id: JobId,
    pub pid: Pid,
    pub command: String,
    /// Captured stdout and stderr, still being filled while the job runs.
    pub out: ProcOutputBuffer,
    pub err: ProcOutputBuffer,
    /// Suppress the completion notification.
    pub quiet: bool,

    status: Mutex<Option<ProcStatus>>,
    completed: Condvar,
}

impl Job {
    /// The exit status, if the job has completed.
    pub fn status(&self) -> Option<ProcStatus> {
        *self.status.lock().unwrap()
    }

    pub fn is_completed(&self) -> bool {
        self.status().is_some()
    }

    fn set_status(&self, status: ProcStatus) {
        *self.status.lock().unwrap() = Some(status);
        self.completed.notify_all();
    }

    /// Block until the job completes, returning its status.
    pub fn wait(&self) -> ProcStatus {
        let mut guard = self.status.lock().unwrap();
        while guard.is_none() {
            guard = self.completed.wait(guard).unwrap();
        }
        guard.unwrap()
    }

    /// Block until the job completes or the timeout passes.
    fn wait_timeout(&self, timeout: Duration) -> Option<ProcStatus> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.status.lock().unwrap();
        while guard.is_none() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (next, result) = self.completed.wait_timeout(guard, remaining).unwrap();
            guard = next;
            if result.timed_out() && guard.is_none() {
                return None;
            }
        }
        *guard
    }
}

/// The set of background jobs, scoped to one executor.
pub struct JobTable {
    jobs: Mutex<Vec<Arc<Job>>>,
    next_id: AtomicU64,
}

impl JobTable {
    pub fn new() -> Self {
        JobTable {
            jobs: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a running process as a job and start its reaper thread.
    pub fn add(
        &self,
        pid: Pid,
        command: String,
        out: ProcOutputBuffer,
        err: ProcOutputBuffer,
        quiet: bool,
    ) -> io::Result<Arc<Job>> {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let job = Arc::new(Job {
            id,
            pid,
            command,
            out,
            err,
            quiet,
            status: Mutex::new(None),
            completed: Condvar::new(),
        });

        let reaper_job = Arc::clone(&job);
        threads::spawn("job-reaper", move || {
            let mut status = 0;
            loop {
                let ret = unsafe { libc::waitpid(reaper_job.pid.as_pid_t(), &mut status, 0) };
                if ret < 0 && errno::errno().0 == libc::EINTR {
                    continue;
                }
                break;
            }
            let status = ProcStatus::from_waitpid(status);
            FLOGF!(
                jobs,
                "Job {} ('{}') completed with status {}",
                reaper_job.id,
                reaper_job.command,
                status.status_value()
            );
            reaper_job.set_status(status);
        })?;

        FLOGF!(jobs, "Added job {} for pid {}", id, pid);
        self.jobs.lock().unwrap().push(Arc::clone(&job));
        Ok(job)
    }

    /// All jobs, newest last.
    pub fn list(&self) -> Vec<Arc<Job>> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn get(&self, id: JobId) -> Option<Arc<Job>> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|job| job.id == id)
            .cloned()
    }

    /// A snapshot of a job's buffered stdout.
    pub fn output(&self, id: JobId) -> Option<Vec<u8>> {
        self.get(id).map(|job| job.out.contents())
    }

    /// Block until the given job completes.
    pub fn wait(&self, id: JobId) -> Option<ProcStatus> {
        self.get(id).map(|job| job.wait())
    }

    /// Ask a job to terminate: interrupt first, escalate to a forced kill
    /// after the grace period.
    pub fn terminate(&self, id: JobId, grace: Duration) -> Option<ProcStatus> {
        let job = self.get(id)?;
        if let Some(status) = job.status() {
            return Some(status);
        }
        send_signal(job.pid, libc::SIGINT);
        if let Some(status) = job.wait_timeout(grace) {
            return Some(status);
        }
        FLOG!(jobs, "Job did not exit within grace period, killing");
        send_signal(job.pid, libc::SIGKILL);
        Some(job.wait())
    }

    /// Change a job's scheduling priority by `delta` (positive lowers it).
    pub fn reprioritize(&self, id: JobId, delta: i32) -> io::Result<()> {
        let job = self.get(id).ok_or(io::ErrorKind::NotFound)?;
        renice(job.pid, delta)
    }

    /// Drop completed jobs from the table, returning them for notification.
    pub fn reap_completed(&self) -> Vec<Arc<Job>> {
        let mut jobs = self.jobs.lock().unwrap();
        let (done, running): (Vec<_>, Vec<_>) =
            jobs.drain(..).partition(|job| job.is_completed());
        *jobs = running;
        done
    }
}

/// Adjust a process's nice value by `delta`.
pub fn renice(pid: Pid, delta: i32) -> io::Result<()> {
    errno::set_errno(errno::Errno(0));
    let current = unsafe { libc::getpriority(libc::PRIO_PROCESS, pid.get() as libc::id_t) };
    if current == -1 && errno::errno().0 != 0 {
        return Err(io::Error::last_os_error());
    }
    let ret =
        unsafe { libc::setpriority(libc::PRIO_PROCESS, pid.get() as libc::id_t, current + delta) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
