//! Lock-free single-producer/single-consumer sample ring.
//!
//! One ring per microphone channel. The capture thread is the sole
//! writer, the worker thread the sole reader; no lock is taken on the
//! steady-state path.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Bounded SPSC ring of 16-bit PCM samples with an overrun-drop policy.
pub struct RingChannelBuffer {
    buf: UnsafeCell<Box<[i16]>>,
    capacity: usize,
    write_idx: AtomicUsize,
    read_idx: AtomicUsize,
    overrun_count: AtomicUsize,
}

// SAFETY: writer only ever calls `push`, reader only ever calls `pop`/
// `level`. `write_idx` is written with Release and read with Acquire by
// the reader; `read_idx` is written with Release and read with Acquire
// by the writer. Neither side touches a slot the other may still be
// using, so there is no data race across the two threads.
unsafe impl Send for RingChannelBuffer {}
unsafe impl Sync for RingChannelBuffer {}

impl RingChannelBuffer {
    /// Capacity `c` should be at least 4x the expected block size to
    /// tolerate scheduling jitter (see spec.md §4.1).
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            buf: UnsafeCell::new(vec![0i16; capacity].into_boxed_slice()),
            capacity,
            write_idx: AtomicUsize::new(0),
            read_idx: AtomicUsize::new(0),
            overrun_count: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn count(&self, write: usize, read: usize) -> usize {
        write.wrapping_sub(read)
    }

    /// Current fill level.
    pub fn level(&self) -> usize {
        let write = self.write_idx.load(Ordering::Acquire);
        let read = self.read_idx.load(Ordering::Acquire);
        self.count(write, read)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn overrun_count(&self) -> usize {
        self.overrun_count.load(Ordering::Relaxed)
    }

    /// Appends as many samples as fit; returns the count accepted.
    /// Samples beyond capacity are dropped and counted as overruns.
    pub fn push(&self, samples: &[i16]) -> usize {
        let write = self.write_idx.load(Ordering::Relaxed);
        let read = self.read_idx.load(Ordering::Acquire);
        let used = self.count(write, read);
        let free = self.capacity.saturating_sub(used);
        let accepted = samples.len().min(free);

        // SAFETY: only the writer touches slots in [write, write+accepted),
        // which the reader has not yet reached (free >= accepted).
        let buf = unsafe { &mut *self.buf.get() };
        for (i, &s) in samples[..accepted].iter().enumerate() {
            let idx = (write.wrapping_add(i)) % self.capacity;
            buf[idx] = s;
        }
        if accepted > 0 {
            self.write_idx
                .store(write.wrapping_add(accepted), Ordering::Release);
        }

        let dropped = samples.len() - accepted;
        if dropped > 0 {
            self.overrun_count.fetch_add(dropped, Ordering::Relaxed);
        }
        accepted
    }

    /// Copies up to `dest.len()` samples into `dest`; returns the count
    /// copied.
    pub fn pop(&self, dest: &mut [i16]) -> usize {
        let write = self.write_idx.load(Ordering::Acquire);
        let read = self.read_idx.load(Ordering::Relaxed);
        let available = self.count(write, read);
        let n = dest.len().min(available);

        // SAFETY: only the reader touches slots in [read, read+n), which
        // the writer has already published via write_idx (n <= available).
        let buf = unsafe { &*self.buf.get() };
        for i in 0..n {
            let idx = (read.wrapping_add(i)) % self.capacity;
            dest[i] = buf[idx];
        }
        if n > 0 {
            self.read_idx
                .store(read.wrapping_add(n), Ordering::Release);
        }
        n
    }
}
