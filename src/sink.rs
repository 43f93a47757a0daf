//! Audio output: the sink the playback worker writes PCM frames into.

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Buffers queued in the device before `drain` starts waiting.
const HIGH_WATER: usize = 4;
const DRAIN_POLL: Duration = Duration::from_millis(10);

pub trait AudioSink: Send + Sync {
    /// Queues `frames` interleaved frames from `buffer`.
    fn add_frames(&self, buffer: &[i16], frames: usize);
    /// Blocks until the device has room for more data.
    fn drain(&self);
    /// Current volume, 0 to 100.
    fn volume(&self) -> u8;
    fn adjust_volume(&self, delta: i32);
    fn toggle_mute(&self);
    /// Stops output and releases the device. Later calls are ignored.
    fn close(&self);
}

pub trait SinkFactory: Send + Sync {
    fn open(&self, sample_rate: u32, channels: u16) -> Result<Arc<dyn AudioSink>>;
}

#[derive(Debug)]
struct VolumeState {
    level: u8,
    /// Level to restore when unmuting.
    muted_from: Option<u8>,
}

impl VolumeState {
    fn adjust(&mut self, delta: i32) {
        let base = self.muted_from.take().unwrap_or(self.level) as i32;
        self.level = (base + delta).clamp(0, 100) as u8;
    }

    fn toggle_mute(&mut self) {
        match self.muted_from.take() {
            Some(previous) => self.level = previous,
            None => {
                self.muted_from = Some(self.level);
                self.level = 0;
            }
        }
    }

    fn gain(&self) -> f32 {
        self.level as f32 / 100.0
    }
}

/// Opens rodio sinks on the default output device. The volume survives from
/// one sink to the next.
pub struct RodioSinkFactory {
    volume: Arc<Mutex<VolumeState>>,
}

impl RodioSinkFactory {
    pub fn new(initial_volume: f32) -> Self {
        let level = (initial_volume.clamp(0.0, 1.0) * 100.0).round() as u8;
        Self {
            volume: Arc::new(Mutex::new(VolumeState {
                level,
                muted_from: None,
            })),
        }
    }
}

impl SinkFactory for RodioSinkFactory {
    fn open(&self, sample_rate: u32, channels: u16) -> Result<Arc<dyn AudioSink>> {
        let sink = RodioSink::open(sample_rate, channels, self.volume.clone())?;
        Ok(Arc::new(sink))
    }
}

pub struct RodioSink {
    sink: Sink,
    sample_rate: u32,
    channels: u16,
    volume: Arc<Mutex<VolumeState>>,
    close_tx: Mutex<Option<mpsc::Sender<()>>>,
    output_thread: Mutex<Option<JoinHandle<()>>>,
}

impl RodioSink {
    /// The output stream is not `Send`, so a dedicated thread owns it until
    /// the sink is closed.
    fn open(sample_rate: u32, channels: u16, volume: Arc<Mutex<VolumeState>>) -> Result<Self> {
        let (sink_tx, sink_rx) = mpsc::sync_channel::<Result<Sink>>(1);
        let (close_tx, close_rx) = mpsc::channel::<()>();

        let output_thread = thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                let (_stream, handle) = match OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = sink_tx.send(Err(Error::Audio(format!(
                            "Failed to initialize audio output: {}. Check your audio drivers.",
                            e
                        ))));
                        return;
                    }
                };
                match Sink::try_new(&handle) {
                    Ok(sink) => {
                        if sink_tx.send(Ok(sink)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = sink_tx.send(Err(Error::Audio(format!(
                            "Failed to create audio sink: {}",
                            e
                        ))));
                        return;
                    }
                }
                // Keep the stream alive until close; a dropped sender also ends it.
                let _ = close_rx.recv();
                debug!("audio output stream released");
            })
            .map_err(|e| Error::Audio(e.to_string()))?;

        let sink = match sink_rx.recv() {
            Ok(Ok(sink)) => sink,
            Ok(Err(e)) => {
                let _ = output_thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = output_thread.join();
                return Err(Error::Audio("audio output thread exited".into()));
            }
        };

        if let Ok(state) = volume.lock() {
            sink.set_volume(state.gain());
        }
        debug!("audio sink open: {} Hz, {} channels", sample_rate, channels);

        Ok(Self {
            sink,
            sample_rate,
            channels,
            volume,
            close_tx: Mutex::new(Some(close_tx)),
            output_thread: Mutex::new(Some(output_thread)),
        })
    }

    fn with_volume(&self, f: impl FnOnce(&mut VolumeState)) {
        if let Ok(mut state) = self.volume.lock() {
            f(&mut state);
            self.sink.set_volume(state.gain());
        }
    }
}

impl AudioSink for RodioSink {
    fn add_frames(&self, buffer: &[i16], frames: usize) {
        let samples = (frames * self.channels as usize).min(buffer.len());
        if samples == 0 {
            return;
        }
        self.sink.append(SamplesBuffer::new(
            self.channels,
            self.sample_rate,
            buffer[..samples].to_vec(),
        ));
    }

    fn drain(&self) {
        while self.sink.len() > HIGH_WATER && !self.sink.empty() {
            thread::sleep(DRAIN_POLL);
        }
    }

    fn volume(&self) -> u8 {
        self.volume.lock().map(|s| s.level).unwrap_or(0)
    }

    fn adjust_volume(&self, delta: i32) {
        self.with_volume(|state| state.adjust(delta));
    }

    fn toggle_mute(&self) {
        self.with_volume(|state| state.toggle_mute());
    }

    fn close(&self) {
        self.sink.stop();

        if let Ok(mut tx) = self.close_tx.lock() {
            if let Some(tx) = tx.take() {
                let _ = tx.send(());
            }
        }
        if let Ok(mut handle) = self.output_thread.lock() {
            if let Some(handle) = handle.take() {
                if handle.join().is_err() {
                    warn!("audio output thread panicked");
                }
            }
        }
    }
}

impl Drop for RodioSink {
    fn drop(&mut self) {
        self.close();
    }
}
