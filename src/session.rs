//! The logged-in session: stations, the current playlist and the song cursor,
//! plus the playback lifecycle built on top of them.
//!
//! A session is "initialized" while it holds a control-plane client. Login
//! builds everything in locals and commits only on success, so a failed login
//! leaves nothing behind. Logout releases the playlist, the stations, the auth
//! tokens, the client and finally the TLS transport, in that order.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::client::RpcClient;
use crate::config::Config;
use crate::credentials::{CredentialStore, Credentials};
use crate::error::{Error, ProtocolCode, Result};
use crate::models::{Song, Station};
use crate::notify::{Notification, NotificationBus};
use crate::player::{Player, PlayerMode};
use crate::protocol::{Protocol, RequestData, Response};
use crate::sink::SinkFactory;
use crate::transport::{Connector, Fingerprint, Transport};

#[derive(Debug, Clone, Copy)]
struct Heartbeat {
    interval: Duration,
    next_due: Instant,
}

pub struct Session {
    config: Config,
    pin: Fingerprint,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialStore>,
    bus: NotificationBus,

    transport: Option<Arc<dyn Transport>>,
    client: Option<RpcClient>,
    stations: Vec<Station>,
    current_station: Option<usize>,
    playlist: Option<Vec<Song>>,
    current_song: Option<usize>,

    player: Player,
    heartbeat: Option<Heartbeat>,
}

impl Session {
    pub fn new(
        config: Config,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialStore>,
        sinks: Arc<dyn SinkFactory>,
        bus: NotificationBus,
    ) -> anyhow::Result<Self> {
        let pin = config.rpc.fingerprint()?;
        Ok(Self {
            config,
            pin,
            connector,
            credentials,
            player: Player::new(sinks, bus.clone()),
            bus,
            transport: None,
            client: None,
            stations: Vec::new(),
            current_station: None,
            playlist: None,
            current_song: None,
            heartbeat: None,
        })
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn is_logged_in(&self) -> bool {
        self.client.is_some()
    }

    /// Stores `credentials` so later logins and re-authentication find them.
    pub fn save_credentials(&self, credentials: &Credentials) -> anyhow::Result<()> {
        credentials.save(self.credentials.as_ref())
    }

    /// Logs in with the credentials kept in the store.
    pub fn login_stored(&mut self) -> Result<()> {
        let credentials =
            Credentials::load(self.credentials.as_ref()).ok_or(Error::MissingCredentials)?;
        self.login(credentials)
    }

    /// Sets up TLS, logs in and fetches the station list. The first station
    /// becomes current. On failure the session stays logged out.
    pub fn login(&mut self, credentials: Credentials) -> Result<()> {
        if self.is_logged_in() {
            self.logout();
        }
        self.bus.status("Login... ");

        let transport = self.connector.connect(self.pin).map_err(|e| {
            self.bus.status(format!("Network error: {}", e));
            Error::Network(e)
        })?;
        let mut client = RpcClient::new(
            transport.clone(),
            Protocol::new(self.config.rpc.clone()),
            self.credentials.clone(),
            self.bus.clone(),
        );

        client.call(RequestData::login(credentials))?;
        let stations = match client.call(RequestData::GetStations)? {
            Response::Stations(stations) => stations,
            other => {
                warn!("unexpected reply to station request: {:?}", other);
                return Err(ProtocolCode::InvalidResponse.into());
            }
        };

        info!("logged in, {} stations", stations.len());
        self.transport = Some(transport);
        self.client = Some(client);
        self.current_station = if stations.is_empty() { None } else { Some(0) };
        self.stations = stations;
        self.bus
            .publish(Notification::Stations(self.stations.clone()));
        Ok(())
    }

    /// Ends the session. Does nothing when not logged in.
    pub fn logout(&mut self) {
        let Some(mut client) = self.client.take() else {
            return;
        };

        // The worker holds a transport handle; join it before releasing TLS.
        self.stop_playback();

        self.playlist = None;
        self.current_song = None;
        self.stations.clear();
        self.current_station = None;
        client.clear_auth();
        drop(client);
        if self.transport.take().is_some() {
            debug!("TLS subsystem shut down");
        }
        self.bus.status("Logged out");
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn current_station(&self) -> Option<&Station> {
        self.current_station.and_then(|i| self.stations.get(i))
    }

    /// Selects the station with `id`. An unknown id leaves no station
    /// selected. Switching drops the previous station's playlist.
    pub fn set_current_station(&mut self, id: &str) -> Option<&Station> {
        let index = self.stations.iter().position(|s| s.id == id);
        if index != self.current_station {
            self.playlist = None;
            self.current_song = None;
        }
        self.current_station = index;
        self.current_station()
    }

    pub fn current_song(&self) -> Option<&Song> {
        let playlist = self.playlist.as_ref()?;
        playlist.get(self.current_song?)
    }

    pub fn playlist(&self) -> Option<&[Song]> {
        self.playlist.as_deref()
    }

    fn clear_selection(&mut self) {
        self.current_station = None;
        self.current_song = None;
        self.playlist = None;
    }

    /// Fetches a fresh playlist for the current station. Any failure, or an
    /// empty result, leaves no station, playlist or song selected.
    pub fn get_playlist(&mut self) -> Result<()> {
        let Some(station_id) = self.current_station().map(|s| s.id.clone()) else {
            self.clear_selection();
            return Err(Error::State("no station selected".into()));
        };
        let format = self.config.playback.audio_format;
        let Some(client) = self.client.as_mut() else {
            self.clear_selection();
            return Err(Error::State("not logged in".into()));
        };

        let result = client.call(RequestData::GetPlaylist { station_id, format });
        match result {
            Ok(Response::Playlist(songs)) if songs.is_empty() => {
                self.clear_selection();
                self.bus.status("No tracks left.");
                Ok(())
            }
            Ok(Response::Playlist(songs)) => {
                debug!("playlist of {} songs", songs.len());
                self.playlist = Some(songs);
                self.current_song = Some(0);
                Ok(())
            }
            Ok(other) => {
                warn!("unexpected reply to playlist request: {:?}", other);
                self.clear_selection();
                Err(ProtocolCode::InvalidResponse.into())
            }
            Err(e) => {
                self.clear_selection();
                Err(e)
            }
        }
    }

    /// Stops the current song, moves to its successor (refetching when the
    /// playlist is exhausted) and starts it. A failed refetch still goes
    /// through `start_playback`, which reports the empty playlist; the
    /// refetch error is the one returned.
    pub fn next_song(&mut self) -> Result<()> {
        self.stop_playback();

        if let (Some(playlist), Some(index)) = (&self.playlist, self.current_song) {
            self.current_song = Some(index + 1).filter(|next| *next < playlist.len());
        }
        let refetch = if self.current_song.is_none() {
            self.get_playlist()
        } else {
            Ok(())
        };
        let started = self.start_playback();
        refetch.and(started)
    }

    /// Starts the current song and arms the heartbeat.
    pub fn start_playback(&mut self) -> Result<()> {
        self.bus.status("Starting playback");

        let Some(song) = self.current_song().cloned() else {
            self.bus.status("Empty playlist");
            return Err(Error::State("empty playlist".into()));
        };
        let Some(transport) = self.transport.clone() else {
            return Err(Error::State("not logged in".into()));
        };

        self.player.start(&song, transport)?;
        let interval = self.config.playback.heartbeat_interval();
        self.heartbeat = Some(Heartbeat {
            interval,
            next_due: Instant::now() + interval,
        });
        self.bus.publish(Notification::NewSong(song));
        Ok(())
    }

    /// Cancels the heartbeat and tears down the worker and sink. Safe to call
    /// when nothing is playing.
    pub fn stop_playback(&mut self) {
        self.heartbeat = None;
        self.player.stop();
    }

    pub fn pause_toggle(&self) -> bool {
        self.player.pause_toggle()
    }

    pub fn player_mode(&self) -> PlayerMode {
        self.player.mode()
    }

    pub fn times(&self) -> (Duration, Duration) {
        self.player.times()
    }

    pub fn volume(&self) -> Option<u8> {
        self.player.volume()
    }

    pub fn volume_up(&self) {
        self.player.adjust_volume(self.config.playback.volume_step);
    }

    pub fn volume_down(&self) {
        self.player.adjust_volume(-self.config.playback.volume_step);
    }

    pub fn toggle_mute(&self) {
        self.player.toggle_mute();
    }

    /// When the next heartbeat is due, or `None` while it is disarmed.
    pub fn heartbeat_deadline(&self) -> Option<Instant> {
        self.heartbeat.map(|h| h.next_due)
    }

    /// Fires the heartbeat if it is due at `now`.
    pub fn poll_heartbeat(&mut self, now: Instant) {
        let Some(heartbeat) = self.heartbeat.as_mut() else {
            return;
        };
        if now < heartbeat.next_due {
            return;
        }
        heartbeat.next_due = now + heartbeat.interval;
        self.heartbeat();
    }

    /// One heartbeat tick: advances to the next song once the worker has
    /// finished, otherwise reports progress.
    pub fn heartbeat(&mut self) {
        if self.heartbeat.is_none() {
            return;
        }
        match self.player.mode() {
            PlayerMode::FinishedPlayback | PlayerMode::Freed => {
                debug!("end of track");
                if let Err(e) = self.next_song() {
                    warn!("could not advance to next song: {}", e);
                }
            }
            _ => {
                let (elapsed, duration) = self.player.times();
                self.bus
                    .publish(Notification::Progress { elapsed, duration });
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_playback();
        self.logout();
    }
}
