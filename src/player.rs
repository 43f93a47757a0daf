//! Playback engine: one worker thread per song that streams, decodes and
//! writes PCM into an audio sink.
//!
//! The worker and the control thread share only the quit flag, the pause gate
//! and the atomics of [`PlaybackState`]. At most one worker and one sink exist
//! at a time: a new attempt is only started once the previous worker has been
//! joined and its sink closed.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::Song;
use crate::notify::NotificationBus;
use crate::sink::{AudioSink, SinkFactory};
use crate::transport::Transport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PlayerMode {
    Freed = 0,
    Starting = 1,
    Playing = 2,
    Paused = 3,
    FinishedPlayback = 4,
}

impl PlayerMode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PlayerMode::Starting,
            2 => PlayerMode::Playing,
            3 => PlayerMode::Paused,
            4 => PlayerMode::FinishedPlayback,
            _ => PlayerMode::Freed,
        }
    }

    /// A worker is running and owns (or is about to own) the sink.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PlayerMode::Starting | PlayerMode::Playing | PlayerMode::Paused
        )
    }
}

/// Scalars written by the worker and read by the heartbeat.
#[derive(Debug)]
pub struct PlaybackState {
    mode: AtomicU8,
    elapsed_ms: AtomicU64,
    duration_ms: AtomicU64,
}

impl PlaybackState {
    fn new() -> Self {
        Self {
            mode: AtomicU8::new(PlayerMode::Starting as u8),
            elapsed_ms: AtomicU64::new(0),
            duration_ms: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> PlayerMode {
        PlayerMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    fn set_mode(&self, mode: PlayerMode) {
        self.mode.store(mode as u8, Ordering::Release);
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms.load(Ordering::Relaxed))
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms.load(Ordering::Relaxed))
    }
}

/// Binary semaphore guarding each sink write. Closing it pauses the worker at
/// its next write; the control thread only ever try-acquires it.
#[derive(Debug, Default)]
pub struct PauseGate {
    closed: Mutex<bool>,
    cond: Condvar,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closes the gate if it is open. Returns `false` if it was already
    /// closed. Never blocks beyond the internal lock.
    pub fn try_close(&self) -> bool {
        let mut closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
        if *closed {
            false
        } else {
            *closed = true;
            true
        }
    }

    pub fn open(&self) {
        let mut closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
        *closed = false;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Blocks while the gate is closed, unless `quit` is raised.
    fn wait_open(&self, quit: &AtomicBool) {
        let mut closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
        while *closed && !quit.load(Ordering::Acquire) {
            closed = self.cond.wait(closed).unwrap_or_else(|e| e.into_inner());
        }
    }
}

type SinkSlot = Arc<Mutex<Option<Arc<dyn AudioSink>>>>;

/// Everything shared with one worker.
struct Shared {
    state: PlaybackState,
    gate: PauseGate,
    quit: AtomicBool,
    sink: SinkSlot,
}

struct Attempt {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

pub struct Player {
    sinks: Arc<dyn SinkFactory>,
    bus: NotificationBus,
    attempt: Option<Attempt>,
}

impl Player {
    pub fn new(sinks: Arc<dyn SinkFactory>, bus: NotificationBus) -> Self {
        Self {
            sinks,
            bus,
            attempt: None,
        }
    }

    pub fn mode(&self) -> PlayerMode {
        self.attempt
            .as_ref()
            .map(|a| a.shared.state.mode())
            .unwrap_or(PlayerMode::Freed)
    }

    /// Elapsed time and total duration of the current song.
    pub fn times(&self) -> (Duration, Duration) {
        self.attempt
            .as_ref()
            .map(|a| (a.shared.state.elapsed(), a.shared.state.duration()))
            .unwrap_or_default()
    }

    /// Spawns the worker for `song`. Rejected while another song is active.
    pub fn start(&mut self, song: &Song, transport: Arc<dyn Transport>) -> Result<()> {
        let mode = self.mode();
        if mode.is_active() {
            self.bus.status("Playback already in progress");
            return Err(Error::State(format!("cannot start playback while {:?}", mode)));
        }
        // A finished worker still holds its thread and sink until joined.
        self.stop();

        let shared = Arc::new(Shared {
            state: PlaybackState::new(),
            gate: PauseGate::new(),
            quit: AtomicBool::new(false),
            sink: Arc::new(Mutex::new(None)),
        });

        let worker = Worker {
            song: song.clone(),
            transport,
            sinks: self.sinks.clone(),
            bus: self.bus.clone(),
            shared: shared.clone(),
        };
        let handle = thread::Builder::new()
            .name("playback".into())
            .spawn(move || worker.run())
            .map_err(|e| Error::State(format!("failed to spawn playback thread: {}", e)))?;

        info!("playing {} - {}", song.artist, song.title);
        self.attempt = Some(Attempt {
            shared,
            worker: Some(handle),
        });
        Ok(())
    }

    /// Stops the worker, joins it and closes the sink. Safe to call at any
    /// time; does nothing when there is no playback.
    pub fn stop(&mut self) {
        let Some(mut attempt) = self.attempt.take() else {
            return;
        };

        attempt.shared.quit.store(true, Ordering::Release);
        attempt.shared.gate.open();

        if let Some(handle) = attempt.worker.take() {
            if handle.join().is_err() {
                warn!("playback worker panicked");
            }
        }

        let sink = attempt
            .shared
            .sink
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(sink) = sink {
            sink.close();
        }
        debug!("playback stopped");
    }

    /// Toggles the pause gate. Returns `true` when playback is now paused.
    pub fn pause_toggle(&self) -> bool {
        let Some(attempt) = &self.attempt else {
            return false;
        };
        let gate = &attempt.shared.gate;
        if gate.try_close() {
            true
        } else {
            gate.open();
            false
        }
    }

    fn current_sink(&self) -> Option<Arc<dyn AudioSink>> {
        let attempt = self.attempt.as_ref()?;
        let slot = attempt.shared.sink.lock().ok()?;
        slot.clone()
    }

    /// `None` while no sink is open.
    pub fn volume(&self) -> Option<u8> {
        self.current_sink().map(|s| s.volume())
    }

    pub fn adjust_volume(&self, delta: i32) {
        if let Some(sink) = self.current_sink() {
            sink.adjust_volume(delta);
        }
    }

    pub fn toggle_mute(&self) {
        if let Some(sink) = self.current_sink() {
            sink.toggle_mute();
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    song: Song,
    transport: Arc<dyn Transport>,
    sinks: Arc<dyn SinkFactory>,
    bus: NotificationBus,
    shared: Arc<Shared>,
}

impl Worker {
    fn run(self) {
        if let Err(e) = self.play() {
            if !self.quitting() {
                warn!("playback of {} failed: {}", self.song.title, e);
                self.bus.status(format!("Playback error: {}", e));
            }
        }
        self.shared.state.set_mode(PlayerMode::FinishedPlayback);
    }

    fn quitting(&self) -> bool {
        self.shared.quit.load(Ordering::Acquire)
    }

    fn play(&self) -> Result<()> {
        let stream = self.transport.open_stream(&self.song.audio_url)?;
        let source = MediaSourceStream::new(Box::new(ReadOnlySource::new(stream)), Default::default());

        let mut hint = Hint::new();
        hint.with_extension(self.song.audio_format.extension());
        let detected = symphonia::default::get_probe().format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format = detected.format;

        let track = format
            .default_track()
            .ok_or_else(|| Error::Decode("stream has no audio track".into()))?;
        let track_id = track.id;
        let params = track.codec_params.clone();
        let mut decoder =
            symphonia::default::get_codecs().make(&params, &DecoderOptions::default())?;

        if let (Some(frames), Some(rate)) = (params.n_frames, params.sample_rate) {
            if rate > 0 {
                self.shared
                    .state
                    .duration_ms
                    .store(frames * 1000 / rate as u64, Ordering::Relaxed);
            }
        }

        let gain = self.song.gain_factor();
        let mut sample_buf: Option<SampleBuffer<i16>> = None;
        let mut frames_played: u64 = 0;

        loop {
            if self.quitting() {
                return Ok(());
            }

            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    debug!("end of stream");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!("skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            let frames = decoded.frames();
            if frames == 0 {
                continue;
            }
            let channels = spec.channels.count();
            let needed = decoded.capacity() * channels;
            if sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
                sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
            }
            let Some(buf) = sample_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref(decoded);

            let mut pcm = buf.samples().to_vec();
            if (gain - 1.0).abs() > f32::EPSILON {
                for sample in pcm.iter_mut() {
                    *sample = (*sample as f32 * gain)
                        .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                }
            }

            if !self.write(&pcm, frames, spec.rate, channels as u16)? {
                return Ok(());
            }

            frames_played += frames as u64;
            if spec.rate > 0 {
                self.shared
                    .state
                    .elapsed_ms
                    .store(frames_played * 1000 / spec.rate as u64, Ordering::Relaxed);
            }
        }
    }

    /// Hands one chunk to the sink. Returns `false` when the worker should
    /// quit instead.
    fn write(&self, pcm: &[i16], frames: usize, rate: u32, channels: u16) -> Result<bool> {
        if self.quitting() {
            return Ok(false);
        }
        if self.shared.gate.is_closed() {
            self.shared.state.set_mode(PlayerMode::Paused);
            self.shared.gate.wait_open(&self.shared.quit);
            if self.quitting() {
                return Ok(false);
            }
        }
        let sink = {
            let mut slot = self
                .shared
                .sink
                .lock()
                .map_err(|_| Error::Audio("sink slot poisoned".into()))?;
            match slot.as_ref() {
                Some(sink) => sink.clone(),
                None => {
                    self.bus.status(format!(
                        "Setting up audio rate({}), channels({})",
                        rate, channels
                    ));
                    let sink = self.sinks.open(rate, channels)?;
                    *slot = Some(sink.clone());
                    sink
                }
            }
        };

        self.shared.state.set_mode(PlayerMode::Playing);
        sink.add_frames(pcm, frames);
        sink.drain();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::{AudioStream, HttpRequest};
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn wav(seconds: u32, rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut bytes = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
            for i in 0..seconds * rate {
                writer.write_sample(((i % 100) as i16 - 50) * 100).unwrap();
            }
            writer.finalize().unwrap();
        }
        bytes
    }

    struct WavTransport(Vec<u8>);

    impl Transport for WavTransport {
        fn fetch(&self, _request: &HttpRequest) -> std::result::Result<Vec<u8>, TransportError> {
            Err(TransportError::Network("unused".into()))
        }

        fn open_stream(&self, _url: &str) -> std::result::Result<AudioStream, TransportError> {
            Ok(Box::new(Cursor::new(self.0.clone())))
        }
    }

    #[derive(Default)]
    struct Counts {
        opened: AtomicUsize,
        closed: AtomicUsize,
        frames: AtomicUsize,
    }

    struct CountingSink {
        counts: Arc<Counts>,
        delay: Duration,
    }

    impl AudioSink for CountingSink {
        fn add_frames(&self, _buffer: &[i16], frames: usize) {
            self.counts.frames.fetch_add(frames, Ordering::SeqCst);
        }
        fn drain(&self) {
            thread::sleep(self.delay);
        }
        fn volume(&self) -> u8 {
            50
        }
        fn adjust_volume(&self, _delta: i32) {}
        fn toggle_mute(&self) {}
        fn close(&self) {
            self.counts.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingFactory {
        counts: Arc<Counts>,
        delay: Duration,
    }

    impl SinkFactory for CountingFactory {
        fn open(&self, _rate: u32, _channels: u16) -> Result<Arc<dyn AudioSink>> {
            self.counts.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingSink {
                counts: self.counts.clone(),
                delay: self.delay,
            }))
        }
    }

    fn player(delay: Duration) -> (Player, Arc<Counts>) {
        let counts = Arc::new(Counts::default());
        let factory = CountingFactory {
            counts: counts.clone(),
            delay,
        };
        (Player::new(Arc::new(factory), NotificationBus::new()), counts)
    }

    fn wait_for(player: &Player, mode: PlayerMode) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if player.mode() == mode {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_pause_gate_round_trip() {
        let gate = PauseGate::new();
        assert!(!gate.is_closed());

        // first toggle closes, second finds it closed and opens it
        assert!(gate.try_close());
        assert!(!gate.try_close());
        gate.open();
        assert!(!gate.is_closed());
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let (mut player, counts) = player(Duration::ZERO);
        player.stop();
        player.stop();
        assert_eq!(player.mode(), PlayerMode::Freed);
        assert_eq!(counts.opened.load(Ordering::SeqCst), 0);
        assert!(!player.pause_toggle());
        assert_eq!(player.volume(), None);
    }

    #[test]
    fn test_start_then_stop_releases_sink() {
        let (mut player, counts) = player(Duration::from_millis(1));
        let transport = Arc::new(WavTransport(wav(30, 8000)));

        player.start(&Song::default(), transport).unwrap();
        player.stop();

        assert_eq!(player.mode(), PlayerMode::Freed);
        assert_eq!(
            counts.opened.load(Ordering::SeqCst),
            counts.closed.load(Ordering::SeqCst)
        );
    }

    #[test]
    fn test_stop_while_playing_closes_the_sink() {
        let (mut player, counts) = player(Duration::from_millis(1));
        let transport = Arc::new(WavTransport(wav(30, 8000)));

        player.start(&Song::default(), transport).unwrap();
        assert!(wait_for(&player, PlayerMode::Playing));
        assert_eq!(player.volume(), Some(50));
        player.stop();

        assert_eq!(player.mode(), PlayerMode::Freed);
        assert_eq!(player.volume(), None);
        assert_eq!(counts.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counts.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_natural_finish() {
        let (mut player, counts) = player(Duration::ZERO);
        let transport = Arc::new(WavTransport(wav(1, 8000)));

        player.start(&Song::default(), transport).unwrap();
        assert!(wait_for(&player, PlayerMode::FinishedPlayback));
        assert_eq!(counts.frames.load(Ordering::SeqCst), 8000);
        assert_eq!(player.times().1, Duration::from_secs(1));

        player.stop();
        assert_eq!(counts.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counts.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_paused_worker_rejects_start_and_stops() {
        let (mut player, counts) = player(Duration::from_millis(1));
        let transport = Arc::new(WavTransport(wav(60, 8000)));
        let song = Song::default();

        player.start(&song, transport.clone()).unwrap();
        assert!(player.pause_toggle());
        assert!(wait_for(&player, PlayerMode::Paused));

        let err = player.start(&song, transport).unwrap_err();
        assert!(matches!(err, Error::State(_)));

        player.stop();
        assert_eq!(player.mode(), PlayerMode::Freed);
        assert_eq!(
            counts.opened.load(Ordering::SeqCst),
            counts.closed.load(Ordering::SeqCst)
        );
    }

    #[test]
    fn test_restart_after_finish() {
        let (mut player, counts) = player(Duration::ZERO);
        let transport = Arc::new(WavTransport(wav(1, 8000)));

        player.start(&Song::default(), transport.clone()).unwrap();
        assert!(wait_for(&player, PlayerMode::FinishedPlayback));
        player.start(&Song::default(), transport).unwrap();
        assert!(wait_for(&player, PlayerMode::FinishedPlayback));
        player.stop();

        assert_eq!(counts.opened.load(Ordering::SeqCst), 2);
        assert_eq!(counts.closed.load(Ordering::SeqCst), 2);
    }
}
