#![allow(dead_code)]

use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use pandora_player::config::Config;
use pandora_player::credentials::MemoryCredentialStore;
use pandora_player::notify::{FnListener, Notification, NotificationBus};
use pandora_player::sink::{AudioSink, SinkFactory};
use pandora_player::transport::{AudioStream, Connector, Fingerprint, HttpRequest, Transport};
use pandora_player::{Session, TransportError};

/// `seconds` of 8 kHz mono PCM as a WAV file.
pub fn wav(seconds: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut bytes = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
        for i in 0..seconds * 8000 {
            writer.write_sample(((i % 80) as i16 - 40) * 200).unwrap();
        }
        writer.finalize().unwrap();
    }
    bytes
}

/// In-process stand-in for the tuner service.
pub struct MockService {
    pub stations: Vec<(&'static str, &'static str)>,
    pub playlists: Mutex<VecDeque<Vec<&'static str>>>,
    pub fail_login: AtomicBool,
    pub fail_playlist: AtomicBool,
    pub audio: Vec<u8>,
    pub connects: AtomicUsize,
    pub releases: AtomicUsize,
    pub methods: Mutex<Vec<String>>,
}

impl MockService {
    pub fn new(playlists: Vec<Vec<&'static str>>, audio_seconds: u32) -> Arc<Self> {
        Arc::new(Self {
            stations: vec![("st-a", "Station A"), ("st-b", "Station B")],
            playlists: Mutex::new(playlists.into()),
            fail_login: AtomicBool::new(false),
            fail_playlist: AtomicBool::new(false),
            audio: wav(audio_seconds),
            connects: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            methods: Mutex::new(Vec::new()),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn reply(&self, method: &str) -> Value {
        match method {
            "auth.partnerLogin" => json!({
                "stat": "ok",
                "result": {"partnerId": "p1", "partnerAuthToken": "PT", "syncTime": 1000}
            }),
            "auth.userLogin" if self.fail_login.load(Ordering::SeqCst) => json!({
                "stat": "fail", "code": 1002, "message": "INVALID_LOGIN"
            }),
            "auth.userLogin" => json!({
                "stat": "ok",
                "result": {"userId": "u1", "userAuthToken": "UT"}
            }),
            "user.getStationList" => {
                let stations: Vec<Value> = self
                    .stations
                    .iter()
                    .map(|(id, name)| json!({"stationToken": id, "stationName": name}))
                    .collect();
                json!({"stat": "ok", "result": {"stations": stations}})
            }
            "station.getPlaylist" if self.fail_playlist.load(Ordering::SeqCst) => json!({
                "stat": "fail", "code": 1006, "message": "STATION_DOES_NOT_EXIST"
            }),
            "station.getPlaylist" => {
                let titles = self.playlists.lock().unwrap().pop_front().unwrap_or_default();
                let items: Vec<Value> = titles
                    .iter()
                    .map(|title| {
                        json!({
                            "songName": title,
                            "artistName": "Artist",
                            "albumName": "Album",
                            "trackGain": "0.0",
                            "audioUrlMap": {
                                "highQuality": {
                                    "audioUrl": format!("mock://audio/{}", title),
                                    "encoding": "aacplus"
                                }
                            }
                        })
                    })
                    .collect();
                json!({"stat": "ok", "result": {"items": items}})
            }
            _ => json!({"stat": "fail", "code": 0, "message": "unknown method"}),
        }
    }
}

pub struct MockTransport {
    service: Arc<MockService>,
}

impl Transport for MockTransport {
    fn fetch(&self, request: &HttpRequest) -> Result<Vec<u8>, TransportError> {
        let url = reqwest::Url::parse(&request.url).unwrap();
        let method = url
            .query_pairs()
            .find(|(k, _)| k == "method")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();
        self.service.methods.lock().unwrap().push(method.clone());
        Ok(serde_json::to_vec(&self.service.reply(&method)).unwrap())
    }

    fn open_stream(&self, _url: &str) -> Result<AudioStream, TransportError> {
        Ok(Box::new(Cursor::new(self.service.audio.clone())))
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.service.releases.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockConnector(pub Arc<MockService>);

impl Connector for MockConnector {
    fn connect(&self, _pin: Fingerprint) -> Result<Arc<dyn Transport>, TransportError> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockTransport {
            service: self.0.clone(),
        }))
    }
}

#[derive(Default)]
pub struct SinkCounts {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
}

impl SinkCounts {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

struct MockSink {
    counts: Arc<SinkCounts>,
    closed: AtomicBool,
    drain_delay: Duration,
}

impl AudioSink for MockSink {
    fn add_frames(&self, _buffer: &[i16], _frames: usize) {}
    fn drain(&self) {
        thread::sleep(self.drain_delay);
    }
    fn volume(&self) -> u8 {
        50
    }
    fn adjust_volume(&self, _delta: i32) {}
    fn toggle_mute(&self) {}
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.counts.closed.fetch_add(1, Ordering::SeqCst);
            self.counts.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

pub struct MockSinkFactory(pub Arc<SinkCounts>, pub Duration);

impl SinkFactory for MockSinkFactory {
    fn open(&self, _rate: u32, _channels: u16) -> pandora_player::Result<Arc<dyn AudioSink>> {
        self.0.opened.fetch_add(1, Ordering::SeqCst);
        let live = self.0.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(Arc::new(MockSink {
            counts: self.0.clone(),
            closed: AtomicBool::new(false),
            drain_delay: self.1,
        }))
    }
}

#[derive(Clone, Default)]
pub struct Recorder(pub Arc<Mutex<Vec<String>>>);

impl Recorder {
    pub fn attach(&self, bus: &NotificationBus) {
        let seen = self.0.clone();
        bus.set_listener(Arc::new(FnListener(move |n: &Notification| {
            if !matches!(n, Notification::Progress { .. }) {
                seen.lock().unwrap().push(n.to_string());
            }
        })));
    }

    pub fn contains(&self, message: &str) -> bool {
        self.0.lock().unwrap().iter().any(|m| m == message)
    }

    pub fn count(&self, message: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|m| *m == message).count()
    }
}

pub struct Harness {
    pub service: Arc<MockService>,
    pub sinks: Arc<SinkCounts>,
    pub recorder: Recorder,
    drain_delay: Duration,
}

impl Harness {
    /// Songs are one second long and play back instantly.
    pub fn new(playlists: Vec<Vec<&'static str>>) -> Self {
        Self {
            service: MockService::new(playlists, 1),
            sinks: Arc::new(SinkCounts::default()),
            recorder: Recorder::default(),
            drain_delay: Duration::ZERO,
        }
    }

    /// Songs last a minute and each write waits a little, so playback is
    /// still running when the test acts on it.
    pub fn slow(playlists: Vec<Vec<&'static str>>) -> Self {
        Self {
            service: MockService::new(playlists, 60),
            drain_delay: Duration::from_millis(1),
            ..Self::new(vec![])
        }
    }

    pub fn sink_factory(&self) -> MockSinkFactory {
        MockSinkFactory(self.sinks.clone(), self.drain_delay)
    }

    pub fn session(&self, config: Config) -> Session {
        let bus = NotificationBus::new();
        self.recorder.attach(&bus);
        Session::new(
            config,
            Arc::new(MockConnector(self.service.clone())),
            Arc::new(MemoryCredentialStore::with_credentials("user", "secret")),
            Arc::new(self.sink_factory()),
            bus,
        )
        .unwrap()
    }
}

/// Polls `check` for up to five seconds.
pub fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}
