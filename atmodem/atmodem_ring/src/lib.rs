#![no_std]

//! Single-producer single-consumer byte ring for the serial RX path.
//!
//! The producer side is meant to be driven from the UART RX interrupt and
//! therefore never blocks and never takes a lock; the consumer side is the
//! AT reader, which is kept single-threaded by the session lock one layer
//! up. Coordination is two atomic indices with acquire/release pairing.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A fixed-capacity circular byte buffer with split producer/consumer
/// handles.
///
/// - `N` is the storage size; one slot is sacrificed to tell a full ring
///   from an empty one, so the usable capacity is `N - 1`.
/// - `write` on a full ring drops the bytes that do not fit and reports
///   how many were stored.
/// - `peek` copies without consuming, which the AT tokenizer relies on.
///
/// Intended use is a `static` ring split once at bring-up:
///
/// ```
/// use atmodem_ring::RxRing;
///
/// static RING: RxRing<64> = RxRing::new();
/// let (mut producer, mut consumer) = RING.try_split().unwrap();
/// producer.write(b"OK\r\n");
/// let mut buf = [0u8; 4];
/// assert_eq!(consumer.read(&mut buf), 4);
/// ```
pub struct RxRing<const N: usize> {
    buf: UnsafeCell<[u8; N]>,
    /// Next slot the producer will fill. Written by the producer only.
    head: AtomicUsize,
    /// Next slot the consumer will drain. Written by the consumer only.
    tail: AtomicUsize,
    split: AtomicBool,
}

// The unsafe cell is only ever touched through the split handles, and the
// index protocol keeps their slot ranges disjoint.
unsafe impl<const N: usize> Sync for RxRing<N> {}

impl<const N: usize> RxRing<N> {
    pub const fn new() -> Self {
        Self {
            buf: UnsafeCell::new([0; N]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            split: AtomicBool::new(false),
        }
    }

    /// Hands out the producer and consumer handles. Succeeds exactly once
    /// per ring; a second split would alias the single-producer and
    /// single-consumer roles.
    pub fn try_split(&'static self) -> Option<(RingProducer<N>, RingConsumer<N>)> {
        if self.split.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some((RingProducer { ring: self }, RingConsumer { ring: self }))
    }

    pub const fn capacity(&self) -> usize {
        N - 1
    }

    fn available(&self, head: usize, tail: usize) -> usize {
        (head + N - tail) % N
    }
}

/// Write half of an [`RxRing`]. Interrupt-safe: `write` is wait-free.
pub struct RingProducer<const N: usize> {
    ring: &'static RxRing<N>,
}

impl<const N: usize> RingProducer<N> {
    /// Appends `data`, returning the number of bytes actually stored.
    /// Bytes that do not fit are silently dropped.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let head = self.ring.head.load(Ordering::Relaxed);
        let tail = self.ring.tail.load(Ordering::Acquire);
        let free = (tail + N - head - 1) % N;
        let n = data.len().min(free);

        let buf = self.ring.buf.get() as *mut u8;
        for (i, &byte) in data[..n].iter().enumerate() {
            // Safety: slots [head, head + n) are unpublished and outside
            // the consumer's [tail, head) window.
            unsafe { buf.add((head + i) % N).write(byte) };
        }

        self.ring.head.store((head + n) % N, Ordering::Release);
        n
    }

    /// Free space currently left in the ring.
    pub fn free(&self) -> usize {
        let head = self.ring.head.load(Ordering::Relaxed);
        let tail = self.ring.tail.load(Ordering::Acquire);
        (tail + N - head - 1) % N
    }
}

/// Read half of an [`RxRing`].
pub struct RingConsumer<const N: usize> {
    ring: &'static RxRing<N>,
}

impl<const N: usize> RingConsumer<N> {
    /// Copies up to `buf.len()` bytes without consuming them.
    pub fn peek(&self, buf: &mut [u8]) -> usize {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        let head = self.ring.head.load(Ordering::Acquire);
        let n = self.ring.available(head, tail).min(buf.len());

        let src = self.ring.buf.get() as *const u8;
        for (i, slot) in buf[..n].iter_mut().enumerate() {
            // Safety: slots [tail, tail + n) were published by the
            // producer's release store on `head`.
            *slot = unsafe { src.add((tail + i) % N).read() };
        }
        n
    }

    /// Pops up to `buf.len()` bytes.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.peek(buf);
        self.release(n);
        n
    }

    /// Discards up to `n` bytes, returning how many were dropped.
    pub fn skip(&mut self, n: usize) -> usize {
        let n = self.len().min(n);
        self.release(n);
        n
    }

    /// Number of bytes currently readable.
    pub fn len(&self) -> usize {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        let head = self.ring.head.load(Ordering::Acquire);
        self.ring.available(head, tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&mut self, n: usize) {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        self.ring.tail.store((tail + n) % N, Ordering::Release);
    }
}
