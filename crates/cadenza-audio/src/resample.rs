//! Conforming a decoded stream to the sink's rate and channel layout.

use cadenza_core::{Error, Result};
use rubato::{FftFixedIn, Resampler as RubatoResampler};
use tracing::debug;

use crate::decode::{PcmSpec, PcmStream, StreamRead};

/// Frames handed to the resampler per chunk.
const CHUNK_FRAMES: usize = 1024;

/// Wraps a [`PcmStream`] and presents it in another [`PcmSpec`].
///
/// Channels are mapped first (mono is duplicated, stereo is averaged down,
/// anything else is clamped to the nearest channel), then the rate is
/// converted with rubato if it differs. The resampler's delay is trimmed from
/// the front and its tail flushed at the end, so output frame `k` lines up with
/// source frame `k * source_rate / target_rate` and a stream of `n` source
/// frames yields exactly `n * target_rate / source_rate` frames.
pub struct ConformedStream {
    inner: Box<dyn PcmStream>,
    source: PcmSpec,
    target: PcmSpec,
    resampler: Option<FftFixedIn<f32>>,
    /// Raw samples read from `inner`.
    scratch: Vec<f32>,
    /// Channel-mapped, deinterleaved input waiting for a full chunk.
    planes: Vec<Vec<f32>>,
    /// Source frames fed to the resampler since the last reset.
    consumed: u64,
    trim: OutputTrim,
    /// Conformed interleaved samples not yet handed out.
    pending: Vec<f32>,
    pending_pos: usize,
    source_done: bool,
    flushed: bool,
    position: u64,
}

/// Resampler output bookkeeping since the last reset.
#[derive(Debug, Clone, Copy)]
struct OutputTrim {
    /// Leading frames still to drop.
    skip: usize,
    /// Frames kept so far.
    emitted: u64,
}

impl OutputTrim {
    const fn new(delay: usize) -> Self {
        Self {
            skip: delay,
            emitted: 0,
        }
    }

    /// Interleave planar `planes` into `out`, dropping the remaining delay and
    /// keeping at most `limit` frames in total.
    fn emit(&mut self, out: &mut Vec<f32>, planes: &[Vec<f32>], limit: u64) {
        let Some(first) = planes.first() else {
            return;
        };
        let skip = self.skip.min(first.len());
        self.skip -= skip;

        let room = usize::try_from(limit.saturating_sub(self.emitted)).unwrap_or(usize::MAX);
        let frames = (first.len() - skip).min(room);
        out.reserve(frames * planes.len());
        for frame in skip..skip + frames {
            for plane in planes {
                out.push(plane[frame]);
            }
        }
        self.emitted += frames as u64;
    }
}

impl ConformedStream {
    pub fn new(inner: Box<dyn PcmStream>, target: PcmSpec) -> Result<Self> {
        let source = inner.spec();
        let target_channels = usize::from(target.channels);

        let resampler = if source.sample_rate == target.sample_rate {
            None
        } else {
            let resampler = FftFixedIn::new(
                source.sample_rate as usize,
                target.sample_rate as usize,
                CHUNK_FRAMES,
                2,
                target_channels,
            )
            .map_err(|e| Error::Internal(format!("Failed to create resampler: {e}")))?;
            Some(resampler)
        };
        let delay = resampler.as_ref().map_or(0, |r| r.output_delay());

        debug!(
            "Conforming {}Hz/{}ch -> {}Hz/{}ch (delay {delay} frames)",
            source.sample_rate, source.channels, target.sample_rate, target.channels
        );

        Ok(Self {
            inner,
            source,
            target,
            resampler,
            scratch: Vec::new(),
            planes: vec![Vec::new(); target_channels],
            consumed: 0,
            trim: OutputTrim::new(delay),
            pending: Vec::new(),
            pending_pos: 0,
            source_done: false,
            flushed: false,
            position: 0,
        })
    }

    /// Make `pending` non-empty unless the stream is exhausted.
    fn refill(&mut self) -> Result<()> {
        while self.pending_pos >= self.pending.len() {
            self.pending.clear();
            self.pending_pos = 0;

            if self.source_done {
                if self.flushed {
                    return Ok(());
                }
                self.flush()?;
                self.flushed = true;
                continue;
            }

            let source_channels = usize::from(self.source.channels);
            self.scratch.resize(CHUNK_FRAMES * source_channels, 0.0);
            match self.inner.read(&mut self.scratch)? {
                StreamRead::EndOfStream => self.source_done = true,
                StreamRead::Samples(n) => self.push_frames(n)?,
            }
        }
        Ok(())
    }

    /// Map the first `n` samples of `scratch` and run full resampler chunks.
    fn push_frames(&mut self, n: usize) -> Result<()> {
        let source_channels = usize::from(self.source.channels);
        let target_channels = usize::from(self.target.channels);

        for frame in self.scratch[..n].chunks_exact(source_channels) {
            for ch in 0..target_channels {
                let sample = mapped_sample(frame, target_channels, ch);
                if self.resampler.is_some() {
                    self.planes[ch].push(sample);
                } else {
                    self.pending.push(sample);
                }
            }
        }

        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };
        self.consumed += (n / source_channels) as u64;

        while self.planes[0].len() >= resampler.input_frames_next() {
            let needed = resampler.input_frames_next();
            let chunk: Vec<Vec<f32>> = self
                .planes
                .iter_mut()
                .map(|plane| plane.drain(..needed).collect())
                .collect();

            let resampled = resampler
                .process(&chunk, None)
                .map_err(|e| Error::DecodeFailed(format!("Resample failed: {e}")))?;
            self.trim.emit(&mut self.pending, &resampled, u64::MAX);
        }
        Ok(())
    }

    /// Output frames owed for the source frames consumed since the last reset.
    fn expected_frames(&self) -> u64 {
        let frames = u128::from(self.consumed) * u128::from(self.target.sample_rate)
            / u128::from(self.source.sample_rate);
        frames as u64
    }

    /// Feed zero-padded chunks until the delayed tail is out, then stop at the
    /// exact expected length.
    fn flush(&mut self) -> Result<()> {
        let expected = self.expected_frames();
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };

        while self.trim.emitted < expected {
            let needed = resampler.input_frames_next();
            let chunk: Vec<Vec<f32>> = self
                .planes
                .iter_mut()
                .map(|plane| {
                    let take = plane.len().min(needed);
                    let mut data: Vec<f32> = plane.drain(..take).collect();
                    data.resize(needed, 0.0);
                    data
                })
                .collect();

            let resampled = resampler
                .process(&chunk, None)
                .map_err(|e| Error::DecodeFailed(format!("Resample failed: {e}")))?;
            self.trim.emit(&mut self.pending, &resampled, expected);
        }
        Ok(())
    }
}

impl PcmStream for ConformedStream {
    fn spec(&self) -> PcmSpec {
        self.target
    }

    fn read(&mut self, out: &mut [f32]) -> Result<StreamRead> {
        let mut written = 0;
        while written < out.len() {
            self.refill()?;
            let available = self.pending.len() - self.pending_pos;
            if available == 0 {
                break;
            }
            let n = available.min(out.len() - written);
            out[written..written + n]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
            self.pending_pos += n;
            written += n;
        }

        if written == 0 {
            return Ok(StreamRead::EndOfStream);
        }
        self.position += (written / usize::from(self.target.channels)) as u64;
        Ok(StreamRead::Samples(written))
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        let source_frame = u128::from(frame) * u128::from(self.source.sample_rate)
            / u128::from(self.target.sample_rate);
        self.inner.seek(source_frame as u64)?;

        let delay = self.resampler.as_mut().map_or(0, |resampler| {
            resampler.reset();
            resampler.output_delay()
        });
        self.trim = OutputTrim::new(delay);
        self.consumed = 0;
        self.planes.iter_mut().for_each(Vec::clear);
        self.pending.clear();
        self.pending_pos = 0;
        self.source_done = false;
        self.flushed = false;
        self.position = frame;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn duration(&self) -> Option<u64> {
        let frames = self.inner.duration()?;
        let scaled = u128::from(frames) * u128::from(self.target.sample_rate)
            / u128::from(self.source.sample_rate);
        Some(scaled as u64)
    }

    fn close(&mut self) {
        self.inner.close();
        self.planes.iter_mut().for_each(Vec::clear);
        self.pending = Vec::new();
        self.scratch = Vec::new();
    }
}

/// One output sample for `dst_ch` from an interleaved source frame.
fn mapped_sample(frame: &[f32], dst_channels: usize, dst_ch: usize) -> f32 {
    match (frame.len(), dst_channels) {
        (src, dst) if src == dst => frame[dst_ch],
        (2, 1) => 0.5 * (frame[0] + frame[1]),
        (src, _) => frame[dst_ch.min(src - 1)],
    }
}
