//! Bounded PCM buffer between the delivery thread and a device callback.
//!
//! The producer side blocks for at most a caller-supplied timeout when the
//! buffer is full, so a stop request never waits on the device. The consumer
//! side never blocks: if the producer holds the lock it gets nothing and plays
//! silence for that period.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Bounded FIFO of interleaved `f32` samples.
#[derive(Debug)]
pub struct PcmBuffer {
    samples: Mutex<VecDeque<f32>>,
    /// Signalled whenever the consumer frees space or the buffer is cleared.
    space: Condvar,
    capacity: usize,
}

impl PcmBuffer {
    /// Create a buffer holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            space: Condvar::new(),
            capacity,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Append as many samples as fit, waiting up to `timeout` for room.
    ///
    /// Returns the number of samples accepted, which is zero when the buffer
    /// stayed full for the whole timeout.
    pub fn push_timeout(&self, samples: &[f32], timeout: Duration) -> usize {
        if samples.is_empty() {
            return 0;
        }

        let deadline = Instant::now() + timeout;
        let mut queue = self.samples.lock();
        while queue.len() >= self.capacity {
            if self.space.wait_until(&mut queue, deadline).timed_out() {
                break;
            }
        }

        let n = samples.len().min(self.capacity - queue.len().min(self.capacity));
        queue.extend(&samples[..n]);
        n
    }

    /// Move up to `out.len()` samples into `out` without blocking.
    ///
    /// Returns `None` when the lock is contended; the caller should treat that
    /// as an underrun rather than wait.
    pub fn try_pop_into(&self, out: &mut [f32]) -> Option<usize> {
        let mut queue = self.samples.try_lock()?;
        let n = out.len().min(queue.len());
        for (slot, sample) in out.iter_mut().zip(queue.drain(..n)) {
            *slot = sample;
        }
        drop(queue);

        if n > 0 {
            self.space.notify_all();
        }
        Some(n)
    }

    /// Wait up to `timeout` for the consumer to take everything buffered.
    ///
    /// Returns true once the buffer is empty.
    pub fn wait_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.samples.lock();
        while !queue.is_empty() {
            if self.space.wait_until(&mut queue, deadline).timed_out() {
                return queue.is_empty();
            }
        }
        true
    }

    /// Discard everything buffered.
    pub fn clear(&self) {
        self.samples.lock().clear();
        self.space.notify_all();
    }
}

/// Thread-safe reference to a PCM buffer.
pub type SharedPcmBuffer = Arc<PcmBuffer>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_push_pop() {
        let buffer = PcmBuffer::new(8);
        assert_eq!(buffer.push_timeout(&[1.0, 2.0, 3.0], Duration::ZERO), 3);
        assert_eq!(buffer.len(), 3);

        let mut out = [0.0f32; 2];
        assert_eq!(buffer.try_pop_into(&mut out), Some(2));
        assert_eq!(out, [1.0, 2.0]);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_push_is_bounded() {
        let buffer = PcmBuffer::new(4);
        assert_eq!(buffer.push_timeout(&[0.5; 10], Duration::ZERO), 4);

        let started = Instant::now();
        assert_eq!(buffer.push_timeout(&[0.5], Duration::from_millis(30)), 0);
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_push_wakes_when_consumer_drains() {
        let buffer = Arc::new(PcmBuffer::new(4));
        buffer.push_timeout(&[0.0; 4], Duration::ZERO);

        let consumer = Arc::clone(&buffer);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let mut out = [0.0f32; 2];
            loop {
                if let Some(n) = consumer.try_pop_into(&mut out) {
                    break n;
                }
            }
        });

        assert_eq!(buffer.push_timeout(&[1.0; 3], Duration::from_secs(5)), 2);
        assert_eq!(handle.join().unwrap(), 2);
    }

    #[test]
    fn test_clear() {
        let buffer = PcmBuffer::new(16);
        buffer.push_timeout(&[1.0; 10], Duration::ZERO);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.try_pop_into(&mut [0.0; 4]), Some(0));
    }

    #[test]
    fn test_pop_never_waits_for_producer() {
        let buffer = PcmBuffer::new(8);
        buffer.push_timeout(&[1.0; 4], Duration::ZERO);

        let held = buffer.samples.lock();
        assert_eq!(buffer.try_pop_into(&mut [0.0; 4]), None);
        drop(held);

        assert_eq!(buffer.try_pop_into(&mut [0.0; 4]), Some(4));
    }

    #[test]
    fn test_wait_empty() {
        let buffer = Arc::new(PcmBuffer::new(8));
        assert!(buffer.wait_empty(Duration::ZERO));

        buffer.push_timeout(&[1.0; 6], Duration::ZERO);
        assert!(!buffer.wait_empty(Duration::from_millis(10)));

        let consumer = Arc::clone(&buffer);
        let handle = std::thread::spawn(move || {
            let mut out = [0.0f32; 3];
            for _ in 0..2 {
                std::thread::sleep(Duration::from_millis(10));
                while consumer.try_pop_into(&mut out).is_none() {}
            }
        });

        assert!(buffer.wait_empty(Duration::from_secs(5)));
        handle.join().unwrap();
    }
}
