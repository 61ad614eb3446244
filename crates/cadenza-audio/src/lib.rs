//! # cadenza-audio
//!
//! Playback engine for Cadenza.
//!
//! Features:
//! - Asset lookup against a catalog snapshot
//! - Symphonia-based decoding into interleaved `f32` PCM
//! - Rate and channel conforming with rubato when the sink format differs
//! - A single cancellable delivery thread feeding a cpal (or clock-paced) sink

pub mod buffer;
pub mod decode;
pub mod engine;
pub mod locate;
pub mod output;
pub mod resample;
pub mod session;
pub mod sink;

#[cfg(test)]
#[path = "../tests/common/wav.rs"]
pub(crate) mod testing;

pub use decode::{DecodedStream, Decoder, PcmSpec, PcmStream, StreamRead};
pub use engine::PlaybackEngine;
pub use locate::AssetLocator;
pub use output::CpalSink;
pub use session::{PlaybackState, SessionEvent, SessionStatus};
pub use sink::{ClockSink, OutputSink, SampleCapture};
