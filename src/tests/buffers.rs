//! Buffer pool and pump thread properties.

use crate::common::write_loop;
use crate::fds::make_autoclose_pipes;
use crate::io::BufferPool;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn test_wait_until_finalized_outlasts_slow_writer() {
    // A writer that dribbles data with delays: wait_until_finalized must not
    // return until the pump has consumed everything and exited.
    let pool = BufferPool::new();
    let buffer = pool.create(0);
    let pipes = make_autoclose_pipes().unwrap();
    buffer.begin_fill(pipes.read).unwrap();

    let writer = std::thread::spawn(move || {
        let write_fd = pipes.write;
        for chunk in [&b"first "[..], &b"second "[..], &b"third"[..]] {
            std::thread::sleep(Duration::from_millis(40));
            write_loop(&write_fd, chunk).unwrap();
        }
        // write_fd drops here, closing the pipe.
    });

    let started = Instant::now();
    buffer.wait_until_finalized();
    // All three delayed writes must have landed before we were released.
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(buffer.contents(), b"first second third");
    writer.join().unwrap();
}

#[test]
fn test_repeated_contents_identical_without_new_bytes() {
    let pool = BufferPool::new();
    let buffer = pool.create(0);
    buffer.append(b"stable");
    let first = buffer.contents();
    for _ in 0..10 {
        assert_eq!(buffer.contents(), first);
    }
}

#[test]
fn test_release_ordering_interleavings() {
    // A buffer shared by a finished producer, a pump, and a consumer must
    // survive until the last holder releases it, in every release order.
    let pool = Arc::new(BufferPool::new());
    let orders: Vec<[usize; 3]> = vec![
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];
    for order in orders {
        let buffer = pool.create(0);
        buffer.append(b"shared bytes");

        // Three holders on three threads, released in the given order.
        let holders: Vec<_> = (0..3).map(|_| buffer.clone()).collect();
        drop(buffer);
        assert_eq!(pool.live_buffers(), 1);

        let mut slots: Vec<Option<crate::io::ProcOutputBuffer>> =
            holders.into_iter().map(Some).collect();
        for (step, &slot) in order.iter().enumerate() {
            let holder = slots[slot].take().unwrap();
            let is_final = step == 2;
            if !is_final {
                // Still alive: contents stay reachable from other holders.
                let th = std::thread::spawn(move || {
                    assert_eq!(holder.contents(), b"shared bytes");
                    drop(holder);
                });
                th.join().unwrap();
                assert_eq!(pool.live_buffers(), 1, "released too early");
            } else {
                drop(holder);
                assert_eq!(pool.live_buffers(), 0, "leaked after final release");
            }
        }
    }
}

#[test]
fn test_append_or_extend_restarts_pump() {
    // One buffer fed by two successive sources accumulates both, in order.
    let pool = BufferPool::new();
    let buffer = pool.create(0);

    let first = make_autoclose_pipes().unwrap();
    buffer.begin_fill(first.read).unwrap();
    write_loop(&first.write, b"one ").unwrap();
    drop(first.write);
    buffer.wait_until_finalized();

    let second = make_autoclose_pipes().unwrap();
    buffer.begin_fill(second.read).unwrap();
    write_loop(&second.write, b"two").unwrap();
    drop(second.write);
    buffer.wait_until_finalized();

    assert_eq!(buffer.contents(), b"one two");
}
