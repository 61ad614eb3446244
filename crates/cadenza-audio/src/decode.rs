//! Audio decoding using symphonia.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cadenza_core::{Error, Result};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder as CodecDecoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
    units::{Time, TimeBase},
};
use tracing::{debug, trace, warn};

/// Consecutive corrupt packets tolerated before the stream is declared broken.
const MAX_CORRUPT_PACKETS: u32 = 3;

/// Sample rate and channel layout of a PCM stream or sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmSpec {
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Interleaved samples per second.
    pub const fn samples_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize
    }
}

/// Result of a single [`PcmStream::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRead {
    /// This many interleaved samples were written to the front of the buffer.
    Samples(usize),
    /// The stream has no more data.
    EndOfStream,
}

/// A positioned source of interleaved `f32` PCM.
///
/// Buffers passed to `read` must hold a whole number of frames.
pub trait PcmStream: Send {
    /// Format of the samples produced by `read`; fixed for the stream's lifetime.
    fn spec(&self) -> PcmSpec;

    fn read(&mut self, out: &mut [f32]) -> Result<StreamRead>;

    /// Reposition to an absolute frame.
    fn seek(&mut self, frame: u64) -> Result<()>;

    /// Frames produced so far (or the frame sought to).
    fn position(&self) -> u64;

    /// Total length in frames, when the container reports it.
    fn duration(&self) -> Option<u64>;

    /// Release file handles and decoder buffers. Safe to call repeatedly.
    fn close(&mut self);
}

/// Counts streams that are open right now and the most ever open at once.
#[derive(Debug, Default)]
struct StreamTracker {
    open: AtomicUsize,
    peak: AtomicUsize,
}

impl StreamTracker {
    fn acquire(&self) {
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn release(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Opens audio files into [`DecodedStream`]s.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    tracker: Arc<StreamTracker>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open and probe `path`.
    ///
    /// Missing or unreadable files fail with [`Error::OpenFailed`] before any
    /// decoding is attempted; bad bitstreams fail with [`Error::DecodeFailed`].
    pub fn open(&self, path: &Path) -> Result<DecodedStream> {
        let file = Self::open_file(path)?;
        self.decode_file(file, path)
    }

    /// Open the file handle only.
    pub fn open_file(path: &Path) -> Result<File> {
        let open_failed = |source| Error::OpenFailed {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(open_failed)?;
        let metadata = file.metadata().map_err(open_failed)?;
        if metadata.is_dir() {
            return Err(open_failed(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "is a directory",
            )));
        }
        Ok(file)
    }

    /// Probe an already opened file and set up its decoder.
    ///
    /// On failure the file handle is dropped before returning.
    pub fn decode_file(&self, file: File, path: &Path) -> Result<DecodedStream> {
        let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| {
                Error::DecodeFailed(format!("Failed to probe {}: {e}", path.display()))
            })?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| {
                Error::DecodeFailed(format!("No audio tracks in {}", path.display()))
            })?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| Error::DecodeFailed("Unknown sample rate".to_string()))?;
        let channels = track
            .codec_params
            .channels
            .map_or(2, |c| c.count() as u16);
        let time_base = track.codec_params.time_base;
        let duration = track.codec_params.n_frames;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::DecodeFailed(format!("Failed to create decoder: {e}")))?;

        debug!(
            "Opened {}: track={}, sample_rate={}, channels={}",
            path.display(),
            track_id,
            sample_rate,
            channels
        );

        self.tracker.acquire();

        Ok(DecodedStream {
            spec: PcmSpec::new(sample_rate, channels),
            path: path.to_path_buf(),
            position: 0,
            duration,
            tracker: Arc::clone(&self.tracker),
            state: Some(StreamState {
                format,
                decoder,
                track_id,
                time_base,
                sample_buf: None,
                pending: Vec::new(),
                pending_pos: 0,
                skip_frames: 0,
                corrupt_run: 0,
                finished: false,
            }),
        })
    }

    /// Streams opened by this decoder that have not been closed.
    pub fn open_streams(&self) -> usize {
        self.tracker.open.load(Ordering::SeqCst)
    }

    /// Highest number of streams ever open at the same time.
    pub fn peak_open_streams(&self) -> usize {
        self.tracker.peak.load(Ordering::SeqCst)
    }
}

/// Decoder internals; dropped as a whole on close.
struct StreamState {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn CodecDecoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    sample_buf: Option<SampleBuffer<f32>>,
    /// Samples of the last decoded packet not yet handed out.
    pending: Vec<f32>,
    pending_pos: usize,
    /// Frames to drop after an accurate seek landed early.
    skip_frames: u64,
    corrupt_run: u32,
    finished: bool,
}

impl StreamState {
    /// Decode the next packet of our track into `pending`.
    ///
    /// Leaves `pending` empty and sets `finished` at end of stream.
    fn decode_packet(&mut self, channels: usize) -> Result<()> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.finished = true;
                    return Ok(());
                }
                Err(SymphoniaError::ResetRequired) => {
                    debug!("Stream reset required, treating as end of stream");
                    self.finished = true;
                    return Ok(());
                }
                Err(e) => {
                    return Err(Error::DecodeFailed(format!("Failed to read packet: {e}")));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    self.corrupt_run += 1;
                    if self.corrupt_run > MAX_CORRUPT_PACKETS {
                        return Err(Error::DecodeFailed(format!(
                            "Too many corrupt packets: {e}"
                        )));
                    }
                    warn!("Skipping corrupt packet: {e}");
                    continue;
                }
                Err(e) => return Err(Error::DecodeFailed(format!("Decode failed: {e}"))),
            };
            self.corrupt_run = 0;

            let spec = *decoded.spec();
            if spec.channels.count() != channels {
                return Err(Error::DecodeFailed(format!(
                    "Channel layout changed mid-stream: {} -> {}",
                    channels,
                    spec.channels.count()
                )));
            }
            if decoded.frames() == 0 {
                continue;
            }

            let needed = decoded.frames() * channels;
            let capacity = decoded.capacity() as u64;
            if self
                .sample_buf
                .as_ref()
                .is_some_and(|buf| buf.capacity() < needed)
            {
                self.sample_buf = None;
            }
            let buf = self
                .sample_buf
                .get_or_insert_with(|| SampleBuffer::new(capacity, spec));
            buf.copy_interleaved_ref(decoded);

            self.pending.clear();
            self.pending.extend_from_slice(buf.samples());
            self.pending_pos = 0;

            if self.skip_frames > 0 {
                let frames = (self.pending.len() / channels) as u64;
                let skipped = self.skip_frames.min(frames);
                self.pending_pos = skipped as usize * channels;
                self.skip_frames -= skipped;
            }

            trace!("Decoded {} samples", self.pending.len() - self.pending_pos);
            return Ok(());
        }
    }

    fn ts_to_frames(&self, ts: u64, sample_rate: u32) -> u64 {
        match self.time_base {
            Some(tb) => {
                let time = tb.calc_time(ts);
                time.seconds * u64::from(sample_rate)
                    + (time.frac * f64::from(sample_rate)).round() as u64
            }
            None => ts,
        }
    }
}

/// An open, positioned decode handle over one audio file.
pub struct DecodedStream {
    spec: PcmSpec,
    path: PathBuf,
    position: u64,
    duration: Option<u64>,
    tracker: Arc<StreamTracker>,
    state: Option<StreamState>,
}

impl DecodedStream {
    fn state_mut(&mut self) -> Result<&mut StreamState> {
        self.state
            .as_mut()
            .ok_or_else(|| Error::DecodeFailed(format!("{} is closed", self.path.display())))
    }
}

impl PcmStream for DecodedStream {
    fn spec(&self) -> PcmSpec {
        self.spec
    }

    fn read(&mut self, out: &mut [f32]) -> Result<StreamRead> {
        let channels = usize::from(self.spec.channels);
        let state = self.state_mut()?;

        let mut written = 0;
        while written < out.len() {
            let available = state.pending.len() - state.pending_pos;
            if available > 0 {
                let n = available.min(out.len() - written);
                out[written..written + n]
                    .copy_from_slice(&state.pending[state.pending_pos..state.pending_pos + n]);
                state.pending_pos += n;
                written += n;
                continue;
            }
            if state.finished {
                break;
            }
            state.decode_packet(channels)?;
        }

        if written == 0 {
            return Ok(StreamRead::EndOfStream);
        }
        self.position += (written / channels) as u64;
        Ok(StreamRead::Samples(written))
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        let sample_rate = self.spec.sample_rate;
        let state = self.state_mut()?;

        #[allow(clippy::cast_precision_loss)]
        let time = Time::from(frame as f64 / f64::from(sample_rate));
        let seeked = state
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(state.track_id),
                },
            )
            .map_err(|e| Error::DecodeFailed(format!("Seek failed: {e}")))?;

        state.decoder.reset();
        state.pending.clear();
        state.pending_pos = 0;
        state.finished = false;

        let required = state.ts_to_frames(seeked.required_ts, sample_rate);
        let actual = state.ts_to_frames(seeked.actual_ts, sample_rate);
        state.skip_frames = required.saturating_sub(actual);
        self.position = required;

        debug!("Seeked {} to frame {}", self.path.display(), required);
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn duration(&self) -> Option<u64> {
        self.duration
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            self.tracker.release();
            debug!("Closed {}", self.path.display());
        }
    }
}

impl Drop for DecodedStream {
    fn drop(&mut self) {
        self.close();
    }
}
