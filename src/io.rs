//! Stream wiring and output capture.
//!
//! An [`IoChain`] carries the resolved redirections for one stage. Captured
//! output lands in a [`ProcOutputBuffer`]: a lock-protected growable buffer
//! filled by a dedicated pump thread reading the stage's pipe, optionally
//! forwarding bytes to a mirror destination as they arrive. Buffers are
//! reference counted; a finished producer, a still-running pump and a final
//! consumer may all hold one simultaneously.

use crate::builtins::shared::{STATUS_CMD_ERROR, STATUS_CMD_OK, STATUS_READ_TOO_MUCH};
use crate::common::write_loop;
use crate::fds::{make_autoclose_pipes, open_cloexec, open_null};
use crate::flog::FLOG;
use crate::redirection::{RedirectionMode, RedirectionSpecList, RedirectionTarget};
use crate::threads;
use libc::{EINTR, EPIPE};
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, Weak};

/// How much a pump reads from its source per chunk.
pub const PUMP_CHUNK_SIZE: usize = 4096 * 4;

/// Base open mode for file redirections.
const OPEN_MASK: nix::sys::stat::Mode = nix::sys::stat::Mode::from_bits_truncate(0o666);

/// Describes what type of IO operation an IoData represents.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IoMode {
    File,
    Pipe,
    Fd,
    Close,
    BufferFill,
}

/// Represents an fd redirection.
pub trait IoData: Send + Sync {
    /// Type of redirect.
    fn io_mode(&self) -> IoMode;
    /// FD to redirect.
    fn fd(&self) -> RawFd;
    /// Source fd. This is dup2'd to fd, or if it is -1, then fd is closed.
    fn source_fd(&self) -> RawFd;

    /// If this is a BufferFill, return a reference to it.
    fn as_bufferfill(&self) -> Option<&BufferFill> {
        None
    }
}

pub struct IoClose {
    fd: RawFd,
}
impl IoClose {
    pub fn new(fd: RawFd) -> Self {
        IoClose { fd }
    }
}
impl IoData for IoClose {
    fn io_mode(&self) -> IoMode {
        IoMode::Close
    }
    fn fd(&self) -> RawFd {
        self.fd
    }
    fn source_fd(&self) -> RawFd {
        -1
    }
}

pub struct IoFd {
    fd: RawFd,
    source_fd: RawFd,
}
impl IoFd {
    /// fd to redirect the specified fd to. In 2>&1, source_fd is 1 and fd
    /// is 2.
    pub fn new(fd: RawFd, source_fd: RawFd) -> Self {
        IoFd { fd, source_fd }
    }
}
impl IoData for IoFd {
    fn io_mode(&self) -> IoMode {
        IoMode::Fd
    }
    fn fd(&self) -> RawFd {
        self.fd
    }
    fn source_fd(&self) -> RawFd {
        self.source_fd
    }
}

/// A redirection to or from an opened file.
pub struct IoFile {
    fd: RawFd,
    file: File,
}
impl IoFile {
    pub fn new(fd: RawFd, file: File) -> Self {
        IoFile { fd, file }
    }
}
impl IoData for IoFile {
    fn io_mode(&self) -> IoMode {
        IoMode::File
    }
    fn fd(&self) -> RawFd {
        self.fd
    }
    fn source_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// One end of a pipe.
pub struct IoPipe {
    fd: RawFd,
    /// The pipe's fd, conceptually dup2'd to `fd`.
    pipe_fd: OwnedFd,
    /// Whether this is an input pipe, for informational purposes only.
    #[allow(dead_code)]
    is_input: bool,
}
impl IoPipe {
    pub fn new(fd: RawFd, is_input: bool, pipe_fd: OwnedFd) -> Self {
        IoPipe {
            fd,
            pipe_fd,
            is_input,
        }
    }
}
impl IoData for IoPipe {
    fn io_mode(&self) -> IoMode {
        IoMode::Pipe
    }
    fn fd(&self) -> RawFd {
        self.fd
    }
    fn source_fd(&self) -> RawFd {
        self.pipe_fd.as_raw_fd()
    }
}

/// The write side of a capture: whatever is dup2'd onto `target` feeds a
/// pump filling a ProcOutputBuffer. Very similar to IoPipe.
pub struct BufferFill {
    target: RawFd,

    /// Write end of the pipe. The read end is owned by the buffer's pump.
    write_fd: OwnedFd,

    /// The receiving buffer.
    buffer: ProcOutputBuffer,
}

impl BufferFill {
    /// Create a BufferFill which, when written to, fills a buffer drawn from
    /// `pool`. Returns an error on failure, e.g. too many open fds.
    ///
    /// `target` is the fd this will be dup2'd to, typically stdout.
    pub fn create(pool: &BufferPool, limit: usize, target: RawFd) -> io::Result<Arc<BufferFill>> {
        assert!(target >= 0, "Invalid target fd");
        let pipes = make_autoclose_pipes().map_err(io::Error::from)?;
        let buffer = pool.create(limit);
        buffer.begin_fill(pipes.read)?;
        Ok(Arc::new(BufferFill {
            target,
            write_fd: pipes.write,
            buffer,
        }))
    }

    pub fn buffer(&self) -> &ProcOutputBuffer {
        &self.buffer
    }

    /// Close our write end (unless a child still holds a dup of it), wait for
    /// the pump to exit, and hand back the buffer. Callers must remove the
    /// filler from any IoChain first, or the write end stays open and the
    /// pump never sees end-of-stream.
    pub fn finish(filler: Arc<BufferFill>) -> ProcOutputBuffer {
        let buffer = filler.buffer.clone();
        drop(filler);
        buffer.wait_until_finalized();
        buffer
    }
}

impl IoData for BufferFill {
    fn io_mode(&self) -> IoMode {
        IoMode::BufferFill
    }
    fn fd(&self) -> RawFd {
        self.target
    }
    fn source_fd(&self) -> RawFd {
        self.write_fd.as_raw_fd()
    }
    fn as_bufferfill(&self) -> Option<&BufferFill> {
        Some(self)
    }
}

/// Locked interior of a ProcOutputBuffer.
struct BufferState {
    data: Vec<u8>,
    /// Limit on how much we'll buffer. Zero means no limit.
    limit: usize,
    /// True if we're discarding input because the limit was exceeded.
    discard: bool,
    /// Secondary destination bytes are forwarded to as they arrive.
    mirror: Option<OwnedFd>,
    /// How many buffered bytes the mirror has seen. Independent of the data
    /// length so forwarding resumes correctly when the mirror changes.
    mirror_sent: usize,
}

impl BufferState {
    fn append(&mut self, data: &[u8]) -> bool {
        if self.discard {
            return false;
        }
        let proposed = self.data.len() + data.len();
        if self.limit > 0 && proposed > self.limit {
            self.data.clear();
            self.discard = true;
            return false;
        }
        self.data.extend_from_slice(data);
        true
    }

    /// Push everything the mirror hasn't seen yet. A broken mirror pipe
    /// detaches the mirror; buffering continues.
    fn forward_mirror(&mut self) {
        while let Some(mirror) = &self.mirror {
            if self.mirror_sent >= self.data.len() {
                break;
            }
            match write_loop(mirror, &self.data[self.mirror_sent..]) {
                Ok(written) => self.mirror_sent += written,
                Err(_) => {
                    self.mirror = None;
                }
            }
        }
    }
}

struct PumpSlot {
    /// True from begin_fill until the pump closure has run to completion.
    live: bool,
    handle: Option<std::thread::JoinHandle<()>>,
}

struct BufferShared {
    state: Mutex<BufferState>,
    pump: Mutex<PumpSlot>,
    pump_exited: Condvar,
}

/// A reference-counted, lock-protected output buffer. Cloning shares the
/// buffer; it is freed when the last clone drops.
#[derive(Clone)]
pub struct ProcOutputBuffer(Arc<BufferShared>);

impl ProcOutputBuffer {
    fn new(limit: usize) -> Self {
        ProcOutputBuffer(Arc::new(BufferShared {
            state: Mutex::new(BufferState {
                data: Vec::new(),
                limit,
                discard: false,
                mirror: None,
                mirror_sent: 0,
            }),
            pump: Mutex::new(PumpSlot {
                live: false,
                handle: None,
            }),
            pump_exited: Condvar::new(),
        }))
    }

    /// Append bytes directly (used when a builtin writes into the buffer
    /// without going through a pipe). Returns false if the limit was hit.
    pub fn append(&self, data: &[u8]) -> bool {
        let mut st = self.0.state.lock().unwrap();
        let ok = st.append(data);
        st.forward_mirror();
        ok
    }

    /// A point-in-time snapshot of the buffered bytes. Callers that need the
    /// final contents must call [`wait_until_finalized`](Self::wait_until_finalized) first.
    pub fn contents(&self) -> Vec<u8> {
        self.0.state.lock().unwrap().data.clone()
    }

    pub fn len(&self) -> usize {
        self.0.state.lock().unwrap().data.len()
    }

    /// Return true if content was discarded because the limit was exceeded.
    pub fn discarded(&self) -> bool {
        self.0.state.lock().unwrap().discard
    }

    /// Attach a mirror destination. Already-buffered bytes are replayed to it
    /// immediately (foregrounding a backgrounded job dumps accumulated output
    /// first), then the pump keeps it current.
    pub fn set_mirror(&self, fd: OwnedFd) {
        let mut st = self.0.state.lock().unwrap();
        st.mirror = Some(fd);
        st.mirror_sent = 0;
        st.forward_mirror();
    }

    /// Detach and return the mirror, if any.
    pub fn take_mirror(&self) -> Option<OwnedFd> {
        self.0.state.lock().unwrap().mirror.take()
    }

    /// Start (or restart) a pump reading `source` into this buffer. New bytes
    /// append after existing content, so chained captures can reuse one
    /// buffer. Any previous pump is waited out first to keep ordering.
    pub fn begin_fill(&self, source: OwnedFd) -> io::Result<()> {
        self.wait_until_finalized();
        let mut slot = self.0.pump.lock().unwrap();
        debug_assert!(!slot.live, "Pump already running");
        slot.live = true;
        let shared = Arc::clone(&self.0);
        match threads::spawn("buffer-pump", move || pump_main(shared, source)) {
            Ok(handle) => {
                slot.handle = Some(handle);
                Ok(())
            }
            Err(err) => {
                slot.live = false;
                Err(err)
            }
        }
    }

    /// Block until the pump thread has exited. "Finalized" means exactly
    /// that: a pump stalled on a slow write keeps this blocked. Returns
    /// immediately if no pump is running.
    pub fn wait_until_finalized(&self) {
        let mut slot = self.0.pump.lock().unwrap();
        while slot.live {
            slot = self.0.pump_exited.wait(slot).unwrap();
        }
        let handle = slot.handle.take();
        drop(slot);
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn downgrade(&self) -> Weak<BufferShared> {
        Arc::downgrade(&self.0)
    }
}

/// The pump loop: read fixed-size chunks from the source and append them
/// under the buffer lock, keeping the mirror current. End-of-stream and read
/// errors both terminate the pump normally; a broken pipe is not an error
/// here. The mirror is drained one final time after the source closes.
fn pump_main(shared: Arc<BufferShared>, source: OwnedFd) {
    let mut chunk = [0u8; PUMP_CHUNK_SIZE];
    loop {
        let amt = loop {
            let amt = unsafe {
                libc::read(
                    source.as_raw_fd(),
                    chunk.as_mut_ptr().cast(),
                    chunk.len(),
                )
            };
            if amt < 0 && errno::errno().0 == EINTR {
                continue;
            }
            break amt;
        };
        if amt <= 0 {
            break;
        }
        let mut st = shared.state.lock().unwrap();
        st.append(&chunk[..amt as usize]);
        st.forward_mirror();
    }
    {
        let mut st = shared.state.lock().unwrap();
        st.forward_mirror();
    }
    drop(source);
    FLOG!(pump, "Pump exiting");
    let mut slot = shared.pump.lock().unwrap();
    slot.live = false;
    shared.pump_exited.notify_all();
}

/// A registry of output buffers scoped to one executor's lifetime, so
/// multiple shell instances can coexist in a process.
pub struct BufferPool {
    buffers: Mutex<Vec<Weak<BufferShared>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        BufferPool {
            buffers: Mutex::new(Vec::new()),
        }
    }

    /// Create a buffer registered with this pool. `limit` of zero means
    /// unlimited.
    pub fn create(&self, limit: usize) -> ProcOutputBuffer {
        let buffer = ProcOutputBuffer::new(limit);
        let mut buffers = self.buffers.lock().unwrap();
        buffers.retain(|weak| weak.strong_count() > 0);
        buffers.push(buffer.downgrade());
        buffer
    }

    /// Number of buffers still referenced somewhere.
    pub fn live_buffers(&self) -> usize {
        let mut buffers = self.buffers.lock().unwrap();
        buffers.retain(|weak| weak.strong_count() > 0);
        buffers.len()
    }
}

pub type IoDataRef = Arc<dyn IoData>;

#[derive(Clone, Default)]
pub struct IoChain(pub Vec<IoDataRef>);

impl IoChain {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn push(&mut self, element: IoDataRef) {
        self.0.push(element);
    }

    pub fn append(&mut self, chain: &IoChain) {
        self.0.extend_from_slice(&chain.0);
    }

    pub fn remove(&mut self, element: &dyn IoData) {
        // Compare object addresses, discarding vtable pointers.
        let e1 = element as *const dyn IoData as *const ();
        let idx = self
            .0
            .iter()
            .position(|e2| Arc::as_ref(e2) as *const dyn IoData as *const () == e1)
            .expect("Element not found");
        self.0.remove(idx);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Return the last io redirection in the chain for the specified fd.
    pub fn io_for_fd(&self, fd: RawFd) -> Option<IoDataRef> {
        self.0.iter().rev().find(|data| data.fd() == fd).cloned()
    }

    /// Resolve a list of redirection specs to IOs, appending to this chain.
    /// Any single failure rolls back what this call appended and returns the
    /// specific error; resource acquisition problems abort the whole stage.
    pub fn append_from_specs(&mut self, specs: &RedirectionSpecList, pwd: &Path) -> io::Result<()> {
        let prior_len = self.0.len();
        for spec in specs {
            let result = self.append_one_spec(spec, pwd);
            if let Err(err) = result {
                FLOG!(
                    warning,
                    "An error occurred while redirecting fd",
                    spec.fd,
                );
                self.0.truncate(prior_len);
                return Err(err);
            }
        }
        Ok(())
    }

    fn append_one_spec(&mut self, spec: &crate::redirection::RedirectionSpec, pwd: &Path) -> io::Result<()> {
        match &spec.target {
            RedirectionTarget::Close => {
                self.push(Arc::new(IoClose::new(spec.fd)));
            }
            RedirectionTarget::Fd(target_fd) => {
                self.push(Arc::new(IoFd::new(spec.fd, *target_fd)));
            }
            RedirectionTarget::Null => {
                let file = open_null(spec.fd != libc::STDIN_FILENO).map_err(io::Error::from)?;
                self.push(Arc::new(IoFile::new(spec.fd, file)));
            }
            RedirectionTarget::Path(path) => {
                let is_output = spec.mode != RedirectionMode::Input;
                let oflags = spec
                    .mode
                    .oflags(is_output)
                    .expect("Path redirection must have open flags");
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    pwd.join(path)
                };
                let file = open_cloexec(&path, oflags, OPEN_MASK).map_err(io::Error::from)?;
                self.push(Arc::new(IoFile::new(spec.fd, file)));
            }
        }
        Ok(())
    }
}

/// The output a builtin can generate, with subclasses by destination.
pub enum OutputStream {
    /// A null output stream which ignores all writes.
    Null,
    Fd(FdOutputStream),
    String(StringOutputStream),
    Buffered(BufferedOutputStream),
}

impl OutputStream {
    /// Return any internally buffered contents. Only the String variant
    /// retains data; the others flush to their receiver immediately.
    pub fn contents(&self) -> &str {
        match self {
            OutputStream::String(stream) => stream.contents(),
            OutputStream::Null | OutputStream::Fd(_) | OutputStream::Buffered(_) => "",
        }
    }

    /// Flush any unwritten data and return an error code; 0 is success.
    pub fn flush_and_check_error(&mut self) -> libc::c_int {
        match self {
            OutputStream::Fd(stream) => stream.flush_and_check_error(),
            OutputStream::Buffered(stream) => stream.flush_and_check_error(),
            OutputStream::Null | OutputStream::String(_) => STATUS_CMD_OK,
        }
    }

    pub fn append(&mut self, s: impl AsRef<str>) -> bool {
        let s = s.as_ref();
        match self {
            OutputStream::Null => true,
            OutputStream::Fd(stream) => stream.append(s),
            OutputStream::String(stream) => stream.append(s),
            OutputStream::Buffered(stream) => stream.append(s),
        }
    }

    pub fn appendln(&mut self, s: impl AsRef<str>) -> bool {
        self.append(s.as_ref()) && self.append("\n")
    }
}

/// An output stream which writes to an fd. The fd may be stdout; no
/// ownership is implied.
pub struct FdOutputStream {
    fd: RawFd,
    /// Whether we have received a write error.
    errored: bool,
}

impl FdOutputStream {
    pub fn new(fd: RawFd) -> Self {
        assert!(fd >= 0, "Invalid fd");
        FdOutputStream { fd, errored: false }
    }

    fn append(&mut self, s: &str) -> bool {
        if self.errored {
            return false;
        }
        struct Fd(RawFd);
        impl AsRawFd for Fd {
            fn as_raw_fd(&self) -> RawFd {
                self.0
            }
        }
        if let Err(err) = write_loop(&Fd(self.fd), s.as_bytes()) {
            // EPIPE is an unexceptional receiver-went-away; flag the stream
            // either way so future writes are skipped.
            if err.raw_os_error() != Some(EPIPE) {
                FLOG!(warning, "Write to fd", self.fd, "failed:", err);
            }
            self.errored = true;
        }
        !self.errored
    }

    fn flush_and_check_error(&mut self) -> libc::c_int {
        if self.errored {
            STATUS_CMD_ERROR
        } else {
            STATUS_CMD_OK
        }
    }
}

/// A simple output stream which buffers into a string.
#[derive(Default)]
pub struct StringOutputStream {
    contents: String,
}

impl StringOutputStream {
    pub fn new() -> Self {
        Default::default()
    }
    fn append(&mut self, s: &str) -> bool {
        self.contents.push_str(s);
        true
    }
    fn contents(&self) -> &str {
        &self.contents
    }
}

/// An output stream which writes into a capture buffer.
pub struct BufferedOutputStream {
    buffer: ProcOutputBuffer,
}

impl BufferedOutputStream {
    pub fn new(buffer: ProcOutputBuffer) -> Self {
        Self { buffer }
    }
    fn append(&mut self, s: &str) -> bool {
        self.buffer.append(s.as_bytes())
    }
    fn flush_and_check_error(&mut self) -> libc::c_int {
        if self.buffer.discarded() {
            return STATUS_READ_TOO_MUCH;
        }
        STATUS_CMD_OK
    }
}

/// The bag of stream information a builtin receives.
pub struct IoStreams<'a> {
    pub out: &'a mut OutputStream,
    pub err: &'a mut OutputStream,

    /// fd representing stdin. If stdin is explicitly closed this is -1.
    pub stdin_fd: RawFd,

    /// Whether stdout/stderr are redirected anywhere (file, pipe, capture).
    pub out_is_redirected: bool,
    pub err_is_redirected: bool,

    /// Whether stdout specifically feeds the next stage's pipe.
    pub out_is_piped: bool,

    /// The stage's full chain, for builtins that need to pass it on.
    pub io_chain: &'a IoChain,
}

impl<'a> IoStreams<'a> {
    pub fn new(
        out: &'a mut OutputStream,
        err: &'a mut OutputStream,
        io_chain: &'a IoChain,
    ) -> Self {
        IoStreams {
            out,
            err,
            stdin_fd: libc::STDIN_FILENO,
            out_is_redirected: false,
            err_is_redirected: false,
            out_is_piped: false,
            io_chain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fds::make_autoclose_pipes;
    use libc::STDOUT_FILENO;

    #[test]
    fn test_buffer_limit_discards() {
        let pool = BufferPool::new();
        let buffer = pool.create(8);
        assert!(buffer.append(b"12345678"));
        assert!(!buffer.append(b"9"));
        assert!(buffer.discarded());
        assert_eq!(buffer.contents(), b"");
    }

    #[test]
    fn test_contents_snapshot_idempotent() {
        let pool = BufferPool::new();
        let buffer = pool.create(0);
        buffer.append(b"hello");
        let a = buffer.contents();
        let b = buffer.contents();
        assert_eq!(a, b);
        assert_eq!(a, b"hello");
    }

    #[test]
    fn test_pump_fills_buffer() {
        let pool = BufferPool::new();
        let buffer = pool.create(0);
        let pipes = make_autoclose_pipes().unwrap();
        buffer.begin_fill(pipes.read).unwrap();
        crate::common::write_loop(&pipes.write, b"pumped bytes").unwrap();
        drop(pipes.write);
        buffer.wait_until_finalized();
        assert_eq!(buffer.contents(), b"pumped bytes");
    }

    #[test]
    fn test_mirror_replays_then_follows() {
        let pool = BufferPool::new();
        let buffer = pool.create(0);
        buffer.append(b"early ");

        let mirror_pipes = make_autoclose_pipes().unwrap();
        buffer.set_mirror(mirror_pipes.write);
        buffer.append(b"late");
        drop(buffer.take_mirror());

        let mut got = Vec::new();
        let mut chunk = [0u8; 64];
        loop {
            let amt = unsafe {
                libc::read(
                    mirror_pipes.read.as_raw_fd(),
                    chunk.as_mut_ptr().cast(),
                    chunk.len(),
                )
            };
            if amt <= 0 {
                break;
            }
            got.extend_from_slice(&chunk[..amt as usize]);
        }
        assert_eq!(got, b"early late");
    }

    #[test]
    fn test_pool_tracks_live_buffers() {
        let pool = BufferPool::new();
        let a = pool.create(0);
        let _b = pool.create(0);
        assert_eq!(pool.live_buffers(), 2);
        drop(a);
        assert_eq!(pool.live_buffers(), 1);
    }

    #[test]
    fn test_bufferfill_round_trip() {
        let pool = BufferPool::new();
        let fill = BufferFill::create(&pool, 0, STDOUT_FILENO).unwrap();
        // Write through a dup of the write end, as a child would.
        let dup = unsafe {
            std::os::fd::BorrowedFd::borrow_raw(fill.source_fd())
                .try_clone_to_owned()
                .unwrap()
        };
        crate::common::write_loop(&dup, b"captured").unwrap();
        drop(dup);
        let buffer = BufferFill::finish(fill);
        assert_eq!(buffer.contents(), b"captured");
    }
}
