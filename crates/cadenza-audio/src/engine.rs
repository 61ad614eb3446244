//! Playback engine coordinating lookup, decode, and delivery to the sink.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cadenza_core::{Catalog, EngineConfig, Error, QueueEntry, QueueEntryId, Result, Song};
use crossbeam_channel::{bounded, Receiver};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace, warn};

use crate::decode::{Decoder, PcmSpec, PcmStream, StreamRead};
use crate::locate::AssetLocator;
use crate::output::CpalSink;
use crate::resample::ConformedStream;
use crate::session::{PlaybackState, Session, SessionEvent, SessionStatus};
use crate::sink::OutputSink;

/// Events held for the application before new ones are dropped.
const EVENT_CAPACITY: usize = 1024;

/// How long shutdown waits for the sink to play out a finished song.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// State shared between the engine handle and the delivery thread.
struct Shared {
    session: Mutex<Session>,
    /// Signalled on every transition the worker must observe.
    wake: Condvar,
    catalog: Arc<Catalog>,
    locator: AssetLocator,
    decoder: Decoder,
    config: EngineConfig,
}

impl Shared {
    /// Open `name` and make it the active stream.
    ///
    /// Lookup and file open happen before the current stream is touched; the
    /// current stream is closed before the new one is decoded.
    fn start(&self, session: &mut Session, name: &str) -> Result<Song> {
        let (song, path) = self.locator.locate(name, &self.catalog.snapshot())?;
        let file = Decoder::open_file(&path)?;

        let superseded = session.release_active();
        if let Some(previous) = &superseded {
            debug!("Superseding {}", previous.name);
        }

        let output = session.output;
        let opened = self
            .decoder
            .decode_file(file, &path)
            .and_then(|decoded| -> Result<Box<dyn PcmStream>> {
                if decoded.spec() == output {
                    Ok(Box::new(decoded))
                } else {
                    Ok(Box::new(ConformedStream::new(Box::new(decoded), output)?))
                }
            });

        match opened {
            Ok(stream) => {
                info!("Playing {} from {}", song.display_name(), path.display());
                session.install(song.clone(), stream);
                Ok(song)
            }
            Err(e) => {
                if superseded.is_some() {
                    session.set_state(PlaybackState::Idle);
                }
                Err(e)
            }
        }
    }

    /// Start the next playable queue entry, or go idle when none is left.
    fn advance(&self, session: &mut Session) {
        while let Some(entry) = session.queue.dequeue_next() {
            session.emit(SessionEvent::QueueAdvanced {
                remaining: session.queue.len(),
            });

            match self.start(session, &entry.song.name) {
                Ok(_) => return,
                Err(e) => {
                    warn!("Skipping queued song {}: {e}", entry.song.name);
                    session.emit(SessionEvent::Error(format!(
                        "Skipped {}: {e}",
                        entry.song.name
                    )));
                }
            }
        }
        session.set_state(PlaybackState::Idle);
    }
}

/// Single-session playback engine.
///
/// Control calls may come from any thread; one background thread delivers
/// PCM to the sink. At most one decoded stream is open at any time.
pub struct PlaybackEngine {
    shared: Arc<Shared>,
    event_rx: Receiver<SessionEvent>,
    worker: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    /// Create an engine playing through the default cpal output device.
    pub fn new(config: EngineConfig, catalog: Arc<Catalog>) -> Result<Self> {
        let requested = PcmSpec::new(config.sample_rate, config.channels);
        Self::with_sink(config, catalog, move || CpalSink::open(requested))
    }

    /// Create an engine whose sink is built by `make_sink` on the delivery thread.
    pub fn with_sink<S, F>(config: EngineConfig, catalog: Arc<Catalog>, make_sink: F) -> Result<Self>
    where
        S: OutputSink + 'static,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        config.validate()?;
        let locator = AssetLocator::new(&config.songs_root)?;
        info!("Songs root: {}", locator.root().display());

        let (event_tx, event_rx) = bounded(EVENT_CAPACITY);
        let requested = PcmSpec::new(config.sample_rate, config.channels);
        let shared = Arc::new(Shared {
            session: Mutex::new(Session::new(requested, event_tx)),
            wake: Condvar::new(),
            catalog,
            locator,
            decoder: Decoder::new(),
            config,
        });

        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let worker_shared = Arc::clone(&shared);

        let handle = std::thread::Builder::new()
            .name("cadenza-playback".to_string())
            .spawn(move || {
                // The sink is created here because cpal streams are not Send.
                let sink = match make_sink() {
                    Ok(sink) => sink,
                    Err(e) => {
                        error!("Failed to open audio output: {e}");
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let format = sink.format();
                info!(
                    "Audio output ready: {} ({}Hz, {} channels)",
                    sink.name(),
                    format.sample_rate,
                    format.channels
                );
                worker_shared.session.lock().output = format;
                let _ = ready_tx.send(Ok(()));

                DeliveryWorker::new(Arc::clone(&worker_shared), sink).run();
            })
            .map_err(|e| Error::Internal(format!("Failed to spawn playback thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shared,
                event_rx,
                worker: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::Internal(
                    "Playback thread exited during startup".to_string(),
                ))
            }
        }
    }

    /// Play `name`, superseding whatever is playing.
    pub fn play_song(&self, name: &str) -> Result<Song> {
        let mut session = self.shared.session.lock();
        if self.shared.config.reject_replay_of_active
            && session.current_song().is_some_and(|s| s.name == name)
        {
            return Err(Error::Busy(name.to_string()));
        }

        let result = self.shared.start(&mut session, name);
        drop(session);
        self.shared.wake.notify_all();
        result
    }

    /// Stop playback and discard buffered audio.
    ///
    /// From `Error` this acknowledges the failure and returns to `Idle`.
    pub fn stop_playback(&self) -> Result<()> {
        let mut session = self.shared.session.lock();
        match session.state {
            PlaybackState::Playing | PlaybackState::Paused => {
                if let Some(song) = session.release_active() {
                    info!("Stopped {}", song.display_name());
                }
                session.set_state(PlaybackState::Idle);
            }
            PlaybackState::Error => {
                session.last_error = None;
                session.set_state(PlaybackState::Idle);
            }
            PlaybackState::Idle => return Err(Error::NotPlaying),
        }
        drop(session);
        self.shared.wake.notify_all();
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.transition(PlaybackState::Playing, PlaybackState::Paused, "pause")
    }

    pub fn resume(&self) -> Result<()> {
        self.transition(PlaybackState::Paused, PlaybackState::Playing, "resume")
    }

    fn transition(
        &self,
        from: PlaybackState,
        to: PlaybackState,
        operation: &'static str,
    ) -> Result<()> {
        let mut session = self.shared.session.lock();
        if session.state != from {
            return Err(Error::InvalidState {
                operation,
                state: session.state.to_string(),
            });
        }
        session.set_state(to);
        drop(session);
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Drop the current song and move to the next queue entry.
    ///
    /// Returns the song now playing, if any.
    pub fn skip(&self) -> Result<Option<Song>> {
        let mut session = self.shared.session.lock();
        if !session.state.is_active() {
            return Err(Error::NotPlaying);
        }

        if let Some(song) = session.release_active() {
            info!("Skipped {}", song.display_name());
        }
        self.shared.advance(&mut session);
        let now_playing = session.current_song().cloned();
        drop(session);
        self.shared.wake.notify_all();
        Ok(now_playing)
    }

    /// Reposition the open stream to `frame` (in output frames).
    pub fn seek(&self, frame: u64) -> Result<()> {
        let mut session = self.shared.session.lock();
        let Some(track) = session.active.as_mut() else {
            return Err(Error::NotPlaying);
        };
        track.stream.seek(frame)?;
        debug!("Seeked {} to frame {frame}", track.song.name);
        session.generation += 1;
        drop(session);
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Append `name` to the queue.
    pub fn enqueue_song(&self, name: &str) -> Result<QueueEntryId> {
        let song = self
            .shared
            .catalog
            .find(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        let mut session = self.shared.session.lock();
        let id = session.queue.enqueue(song);
        debug!("Queued {name} as {id} ({} pending)", session.queue.len());
        Ok(id)
    }

    /// Remove a pending queue entry.
    pub fn dequeue_entry(&self, id: QueueEntryId) -> Option<QueueEntry> {
        self.shared.session.lock().queue.remove(id)
    }

    pub fn clear_queue(&self) {
        self.shared.session.lock().queue.clear();
    }

    pub fn queue(&self) -> Vec<QueueEntry> {
        self.shared.session.lock().queue.snapshot()
    }

    pub fn currently_playing(&self) -> Option<Song> {
        self.shared.session.lock().current_song().cloned()
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.session.lock().state
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.session.lock().status()
    }

    /// Remove `name` from the catalog unless it is the song being played.
    pub fn delete_song(&self, name: &str) -> Result<Song> {
        // Held across the removal so the song cannot start in between.
        let session = self.shared.session.lock();
        if session.current_song().is_some_and(|s| s.name == name) {
            return Err(Error::Busy(name.to_string()));
        }

        let song = self.shared.catalog.remove(name)?;
        drop(session);

        self.shared.catalog.save()?;
        info!("Deleted {}", song.display_name());
        Ok(song)
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.shared.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Format the sink is running at.
    pub fn output_format(&self) -> PcmSpec {
        self.shared.session.lock().output
    }

    pub fn try_recv_event(&self) -> Option<SessionEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<SessionEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// Decoded streams currently open.
    pub fn open_streams(&self) -> usize {
        self.shared.decoder.open_streams()
    }

    /// Highest number of decoded streams ever open at once.
    pub fn peak_open_streams(&self) -> usize {
        self.shared.decoder.peak_open_streams()
    }
}

/// Dropping the engine stops delivery and closes the open stream. If the last
/// song ended on its own, the sink is first given up to a second to play out
/// what it holds; otherwise buffered audio is discarded.
impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.shared.session.lock().shutdown = true;
        self.shared.wake.notify_all();

        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("Playback thread panicked");
            }
        }
    }
}

/// Moves PCM from the active stream into the sink.
struct DeliveryWorker<S> {
    shared: Arc<Shared>,
    sink: S,
    /// Samples read from the stream but not yet accepted by the sink.
    pending: Vec<f32>,
    pending_pos: usize,
    /// Session generation `pending` and the sink contents belong to.
    generation: u64,
    /// The sink holds the tail of a song that ended on its own.
    tail: bool,
    sink_paused: bool,
}

impl<S: OutputSink> DeliveryWorker<S> {
    fn new(shared: Arc<Shared>, sink: S) -> Self {
        let generation = shared.session.lock().generation;
        Self {
            shared,
            sink,
            pending: Vec::new(),
            pending_pos: 0,
            generation,
            tail: false,
            sink_paused: false,
        }
    }

    fn run(mut self) {
        info!("Playback worker started");
        let shared = Arc::clone(&self.shared);

        loop {
            let mut session = shared.session.lock();
            loop {
                if session.shutdown {
                    let keep_tail = self.tail
                        && session.state == PlaybackState::Idle
                        && session.generation == self.generation;
                    if let Some(song) = session.release_active() {
                        debug!("Closed {} on shutdown", song.name);
                    }
                    drop(session);
                    self.shut_down(keep_tail);
                    return;
                }

                if session.generation != self.generation {
                    trace!("Generation {} -> {}", self.generation, session.generation);
                    self.generation = session.generation;
                    self.tail = false;
                    self.pending.clear();
                    self.pending_pos = 0;
                    self.sink.clear();
                }

                // Only an explicit pause holds the device; when idle the
                // device drains what it already has.
                let paused = session.state == PlaybackState::Paused;
                if paused != self.sink_paused {
                    self.sink.set_paused(paused);
                    self.sink_paused = paused;
                }

                if session.state == PlaybackState::Playing {
                    break;
                }
                shared.wake.wait(&mut session);
            }

            if self.pending_pos >= self.pending.len() && !self.read_next(&mut session) {
                continue;
            }
            drop(session);

            self.deliver();
        }
    }

    /// Fill `pending` from the active stream. Returns false if nothing was read.
    fn read_next(&mut self, session: &mut Session) -> bool {
        let samples = self.shared.config.buffer_frames * usize::from(session.output.channels);

        let Some(track) = session.active.as_mut() else {
            warn!("Playing without an open stream");
            session.set_state(PlaybackState::Idle);
            return false;
        };

        self.pending.resize(samples, 0.0);
        self.pending_pos = 0;

        match track.stream.read(&mut self.pending) {
            Ok(StreamRead::Samples(n)) => {
                self.pending.truncate(n);
                true
            }
            Ok(StreamRead::EndOfStream) => {
                self.pending.clear();
                if let Some(song) = session.release_active() {
                    info!("Finished {}", song.display_name());
                    session.emit(SessionEvent::TrackFinished(song));
                }
                self.shared.advance(session);
                // Keep the tail of the finished song that the sink still holds.
                self.generation = session.generation;
                self.tail = true;
                false
            }
            Err(e) => {
                self.pending.clear();
                error!("Playback of {} failed: {e}", track.song.name);
                session.fail(&e);
                false
            }
        }
    }

    /// Play out the tail of a finished song, or discard whatever is buffered.
    fn shut_down(&mut self, keep_tail: bool) {
        if keep_tail && !self.sink_paused {
            if self.sink.drain(DRAIN_TIMEOUT) {
                debug!("Output drained");
            } else {
                warn!("Output still busy after {DRAIN_TIMEOUT:?}, discarding");
                self.sink.clear();
            }
        } else {
            self.sink.clear();
        }
        info!("Playback worker shutting down");
    }

    fn deliver(&mut self) {
        let timeout = self.shared.config.sink_timeout();
        match self.sink.write(&self.pending[self.pending_pos..], timeout) {
            Ok(n) => self.pending_pos += n,
            Err(e) => {
                error!("Audio output failed: {e}");
                let mut session = self.shared.session.lock();
                // A stop or new play since the write started supersedes the failure.
                if session.generation == self.generation {
                    session.fail(&e);
                }
            }
        }
    }
}
