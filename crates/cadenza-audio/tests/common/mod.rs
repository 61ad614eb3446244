//! Shared fixtures for playback tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cadenza_audio::{ClockSink, PcmSpec, PlaybackEngine, PlaybackState, SampleCapture, SessionEvent};
use cadenza_core::{Catalog, EngineConfig, Song};
use tempfile::TempDir;

mod wav;

pub use wav::{ramp_value, write_ramp_wav};

pub const RATE: u32 = 8000;
pub const BUFFER_FRAMES: usize = 256;

pub fn config_for(root: &Path) -> EngineConfig {
    EngineConfig {
        songs_root: root.to_path_buf(),
        sample_rate: RATE,
        channels: 1,
        buffer_frames: BUFFER_FRAMES,
        ..EngineConfig::default()
    }
}

/// An engine over a scratch directory of ramp assets, with a capturing sink.
pub struct Fixture {
    pub dir: TempDir,
    pub engine: PlaybackEngine,
    pub capture: SampleCapture,
}

impl Fixture {
    /// One asset per `(name, frames)`; the catalog stores paths with a leading `/`.
    pub fn new(songs: &[(&str, usize)]) -> Self {
        Self::with_output(songs, PcmSpec::new(RATE, 1))
    }

    /// Like [`Fixture::new`], but with the sink running at `output`.
    pub fn with_output(songs: &[(&str, usize)], output: PcmSpec) -> Self {
        let dir = TempDir::new().unwrap();
        let catalog = songs
            .iter()
            .map(|(name, frames)| {
                let file = format!("{name}.wav");
                write_ramp_wav(&dir.path().join(&file), RATE, 1, *frames);
                Song::new(*name, format!("/{file}")).with_artist("Test Artist")
            })
            .collect();
        Self::build(dir, Catalog::from_songs(catalog), output)
    }

    pub fn with_catalog(dir: TempDir, catalog: Catalog) -> Self {
        Self::build(dir, catalog, PcmSpec::new(RATE, 1))
    }

    fn build(dir: TempDir, catalog: Catalog, output: PcmSpec) -> Self {
        let config = EngineConfig {
            sample_rate: output.sample_rate,
            channels: output.channels,
            ..config_for(dir.path())
        };
        let capture = SampleCapture::default();
        let sink_capture = Arc::clone(&capture);
        let engine = PlaybackEngine::with_sink(config, Arc::new(catalog), move || {
            Ok(ClockSink::new(output, Duration::from_millis(50)).capturing(sink_capture))
        })
        .unwrap();

        Self {
            dir,
            engine,
            capture,
        }
    }

    pub fn captured(&self) -> usize {
        self.capture.lock().len()
    }

    pub fn ramp(&self) -> Vec<i32> {
        self.capture.lock().iter().map(|s| ramp_value(*s)).collect()
    }

    pub fn wait_for_state(&self, state: PlaybackState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.engine.state() == state {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    /// Names from `TrackStarted` events until `count` are seen or `timeout` passes.
    pub fn started_tracks(&self, count: usize, timeout: Duration) -> Vec<String> {
        let deadline = Instant::now() + timeout;
        let mut started = Vec::new();
        while started.len() < count && Instant::now() < deadline {
            if let Some(SessionEvent::TrackStarted(song)) =
                self.engine.recv_event_timeout(Duration::from_millis(20))
            {
                started.push(song.name);
            }
        }
        started
    }
}
