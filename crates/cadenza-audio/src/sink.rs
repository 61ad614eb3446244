//! Output sink abstraction and a software sink paced by the wall clock.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::sync::Arc;
use std::time::{Duration, Instant};

use cadenza_core::Result;
use parking_lot::Mutex;

use crate::decode::PcmSpec;

/// Device-facing consumer of interleaved PCM.
///
/// A sink is created on, and only ever touched by, the delivery thread.
pub trait OutputSink {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Format the sink expects; fixed once the sink is open.
    fn format(&self) -> PcmSpec;

    /// Hand samples to the device, waiting at most `timeout` for room.
    ///
    /// Returns how many samples were accepted; zero means the device stayed
    /// full for the whole timeout. Device failures are reported as
    /// `Error::SinkFailed`.
    fn write(&mut self, samples: &[f32], timeout: Duration) -> Result<usize>;

    /// Stop or restart consumption without discarding buffered samples.
    fn set_paused(&mut self, paused: bool);

    /// Discard buffered samples.
    fn clear(&mut self);

    /// Wait up to `timeout` for the device to play everything accepted so far.
    ///
    /// Returns true once nothing is left buffered. A paused sink never drains.
    fn drain(&mut self, timeout: Duration) -> bool;
}

/// Shared record of every sample a [`ClockSink`] accepted.
pub type SampleCapture = Arc<Mutex<Vec<f32>>>;

/// Sink with no hardware behind it that consumes samples in real time.
///
/// It models a device buffer of `latency` worth of audio draining at the
/// nominal sample rate, which gives the same backpressure a real device
/// would.
pub struct ClockSink {
    format: PcmSpec,
    capacity: usize,
    /// Samples accepted but not yet consumed.
    queued: f64,
    last_tick: Instant,
    paused: bool,
    capture: Option<SampleCapture>,
}

impl ClockSink {
    pub fn new(format: PcmSpec, latency: Duration) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let capacity = (latency.as_secs_f64() * format.samples_per_second() as f64) as usize;
        Self {
            format,
            capacity: capacity.max(usize::from(format.channels)),
            queued: 0.0,
            last_tick: Instant::now(),
            paused: false,
            capture: None,
        }
    }

    /// Also append every accepted sample to `capture`.
    #[must_use]
    pub fn capturing(mut self, capture: SampleCapture) -> Self {
        self.capture = Some(capture);
        self
    }

    #[allow(clippy::cast_precision_loss)]
    fn tick(&mut self) {
        let now = Instant::now();
        if !self.paused {
            let consumed = now.duration_since(self.last_tick).as_secs_f64()
                * self.format.samples_per_second() as f64;
            self.queued = (self.queued - consumed).max(0.0);
        }
        self.last_tick = now;
    }

    fn free(&self) -> usize {
        self.capacity.saturating_sub(self.queued.ceil() as usize)
    }
}

impl OutputSink for ClockSink {
    fn name(&self) -> &str {
        "clock"
    }

    fn format(&self) -> PcmSpec {
        self.format
    }

    #[allow(clippy::cast_precision_loss)]
    fn write(&mut self, samples: &[f32], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        loop {
            self.tick();

            let free = self.free();
            if free > 0 {
                let n = samples.len().min(free);
                self.queued += n as f64;
                if let Some(capture) = &self.capture {
                    capture.lock().extend_from_slice(&samples[..n]);
                }
                return Ok(n);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(2)));
        }
    }

    fn set_paused(&mut self, paused: bool) {
        self.tick();
        self.paused = paused;
    }

    fn clear(&mut self) {
        self.tick();
        self.queued = 0.0;
    }

    #[allow(clippy::cast_precision_loss)]
    fn drain(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.tick();
            if self.queued <= 0.0 {
                return true;
            }

            let now = Instant::now();
            if self.paused || now >= deadline {
                return false;
            }
            let left =
                Duration::from_secs_f64(self.queued / self.format.samples_per_second() as f64);
            std::thread::sleep(left.min(deadline - now).min(Duration::from_millis(5)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_sink_applies_backpressure() {
        let mut sink = ClockSink::new(PcmSpec::new(100, 1), Duration::from_secs(1));
        assert_eq!(sink.write(&[0.0; 500], Duration::ZERO).unwrap(), 100);

        // Nothing drains while paused.
        sink.set_paused(true);
        assert_eq!(sink.write(&[0.0; 10], Duration::from_millis(20)).unwrap(), 0);

        sink.set_paused(false);
        std::thread::sleep(Duration::from_millis(30));
        assert!(sink.write(&[0.0; 10], Duration::ZERO).unwrap() > 0);
    }

    #[test]
    fn test_clock_sink_drain() {
        let mut sink = ClockSink::new(PcmSpec::new(1000, 1), Duration::from_secs(1));
        assert!(sink.drain(Duration::ZERO));

        // 50 ms of audio.
        sink.write(&[0.0; 50], Duration::ZERO).unwrap();
        sink.set_paused(true);
        assert!(!sink.drain(Duration::from_millis(100)));

        sink.set_paused(false);
        assert!(!sink.drain(Duration::ZERO));
        let started = Instant::now();
        assert!(sink.drain(Duration::from_secs(2)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_clock_sink_capture_and_clear() {
        let capture = SampleCapture::default();
        let mut sink = ClockSink::new(PcmSpec::new(1000, 2), Duration::from_millis(10))
            .capturing(Arc::clone(&capture));

        let accepted = sink.write(&[0.25; 100], Duration::ZERO).unwrap();
        assert_eq!(accepted, 20);
        assert_eq!(capture.lock().len(), 20);

        sink.clear();
        assert_eq!(sink.write(&[0.25; 100], Duration::ZERO).unwrap(), 20);
        assert_eq!(capture.lock().len(), 40);
    }
}
