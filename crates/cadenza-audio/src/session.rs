//! Playback session state shared between control calls and the delivery thread.

use std::fmt;

use cadenza_core::{Error, PlaybackQueue, Song};
use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, trace};

use crate::decode::{PcmSpec, PcmStream};

/// Playback state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// No stream open.
    #[default]
    Idle,
    /// Frames are flowing to the sink.
    Playing,
    /// Stream open, sink not consuming.
    Paused,
    /// The last stream failed mid-playback and was released.
    Error,
}

impl PlaybackState {
    /// True while a stream is open.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Playing | Self::Paused)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Events emitted by the playback engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Playback state changed.
    StateChanged(PlaybackState),
    /// A stream was opened and delivery started.
    TrackStarted(Song),
    /// A stream reached its end.
    TrackFinished(Song),
    /// The queue head was taken; `remaining` entries are left.
    QueueAdvanced { remaining: usize },
    /// Something failed after the triggering call had returned.
    Error(String),
}

/// Snapshot of a session for status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: PlaybackState,
    pub song: Option<Song>,
    /// Decode position of the open stream, in output frames.
    pub position_frames: u64,
    pub duration_frames: Option<u64>,
    pub sample_rate: u32,
    pub queued: usize,
    pub last_error: Option<String>,
}

/// The song being played together with its open stream.
pub(crate) struct ActiveTrack {
    pub song: Song,
    pub stream: Box<dyn PcmStream>,
}

/// Everything guarded by the session lock.
pub(crate) struct Session {
    pub state: PlaybackState,
    pub active: Option<ActiveTrack>,
    pub queue: PlaybackQueue,
    /// Bumped whenever the open stream is replaced, closed, or repositioned.
    pub generation: u64,
    pub last_error: Option<String>,
    /// Format of the output sink.
    pub output: PcmSpec,
    pub shutdown: bool,
    events: Sender<SessionEvent>,
}

impl Session {
    pub fn new(output: PcmSpec, events: Sender<SessionEvent>) -> Self {
        Self {
            state: PlaybackState::Idle,
            active: None,
            queue: PlaybackQueue::new(),
            generation: 0,
            last_error: None,
            output,
            shutdown: false,
            events,
        }
    }

    /// Queue `event` for the application. Events are dropped, never waited
    /// on, when nobody drains the channel.
    pub fn emit(&self, event: SessionEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => trace!("Event channel full, dropping {event:?}"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            debug!("State changed: {} -> {}", self.state, state);
            self.state = state;
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    pub fn current_song(&self) -> Option<&Song> {
        self.active.as_ref().map(|track| &track.song)
    }

    /// Make `stream` the open stream and start playing it.
    pub fn install(&mut self, song: Song, stream: Box<dyn PcmStream>) {
        debug_assert!(self.active.is_none(), "previous stream must be released first");
        self.active = Some(ActiveTrack {
            song: song.clone(),
            stream,
        });
        self.generation += 1;
        self.last_error = None;
        self.set_state(PlaybackState::Playing);
        self.emit(SessionEvent::TrackStarted(song));
    }

    /// Close the open stream, if any. Does not change the state.
    pub fn release_active(&mut self) -> Option<Song> {
        let mut track = self.active.take()?;
        track.stream.close();
        self.generation += 1;
        Some(track.song)
    }

    /// Record a mid-stream failure and release the stream.
    pub fn fail(&mut self, error: &Error) {
        self.release_active();
        self.last_error = Some(error.to_string());
        self.set_state(PlaybackState::Error);
        self.emit(SessionEvent::Error(error.to_string()));
    }

    pub fn status(&self) -> SessionStatus {
        let stream = self.active.as_ref().map(|track| &track.stream);
        SessionStatus {
            state: self.state,
            song: self.current_song().cloned(),
            position_frames: stream.map_or(0, |s| s.position()),
            duration_frames: stream.and_then(|s| s.duration()),
            sample_rate: self.output.sample_rate,
            queued: self.queue.len(),
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::decode::StreamRead;
    use cadenza_core::Result;
    use crossbeam_channel::{bounded, unbounded};

    /// Stream that never yields data and counts closes.
    struct SilentStream {
        closes: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl PcmStream for SilentStream {
        fn spec(&self) -> PcmSpec {
            PcmSpec::new(8000, 1)
        }

        fn read(&mut self, _out: &mut [f32]) -> Result<StreamRead> {
            Ok(StreamRead::EndOfStream)
        }

        fn seek(&mut self, _frame: u64) -> Result<()> {
            Ok(())
        }

        fn position(&self) -> u64 {
            0
        }

        fn duration(&self) -> Option<u64> {
            None
        }

        fn close(&mut self) {
            self.closes
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn test_playback_state_default() {
        assert_eq!(PlaybackState::default(), PlaybackState::Idle);
        assert!(PlaybackState::Paused.is_active());
        assert!(!PlaybackState::Error.is_active());
        assert_eq!(PlaybackState::Playing.to_string(), "playing");
    }

    #[test]
    fn test_install_release_and_fail() {
        let (tx, rx) = unbounded();
        let closes = std::sync::Arc::default();
        let mut session = Session::new(PcmSpec::new(8000, 1), tx);

        let song = Song::new("A", "a.wav");
        session.install(
            song.clone(),
            Box::new(SilentStream {
                closes: std::sync::Arc::clone(&closes),
            }),
        );
        assert_eq!(session.state, PlaybackState::Playing);
        assert_eq!(session.current_song(), Some(&song));
        assert_eq!(session.generation, 1);

        session.fail(&Error::SinkFailed("unplugged".into()));
        assert_eq!(session.state, PlaybackState::Error);
        assert!(session.active.is_none());
        assert_eq!(closes.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(session.generation, 2);
        assert_eq!(
            session.status().last_error.as_deref(),
            Some("Audio output error: unplugged")
        );

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            [
                SessionEvent::StateChanged(PlaybackState::Playing),
                SessionEvent::TrackStarted(song),
                SessionEvent::StateChanged(PlaybackState::Error),
                SessionEvent::Error("Audio output error: unplugged".into()),
            ]
        );
    }

    #[test]
    fn test_full_event_channel_drops_events() {
        let (tx, rx) = bounded(2);
        let mut session = Session::new(PcmSpec::new(8000, 1), tx);

        for state in [
            PlaybackState::Playing,
            PlaybackState::Paused,
            PlaybackState::Playing,
            PlaybackState::Idle,
        ] {
            session.set_state(state);
        }
        session.emit(SessionEvent::QueueAdvanced { remaining: 0 });

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            [
                SessionEvent::StateChanged(PlaybackState::Playing),
                SessionEvent::StateChanged(PlaybackState::Paused),
            ]
        );
        assert_eq!(session.state, PlaybackState::Idle);

        drop(rx);
        session.emit(SessionEvent::QueueAdvanced { remaining: 0 });
    }
}
