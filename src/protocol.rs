//! Requests and responses of the tuner RPC service.
//!
//! Each call is one or more JSON POSTs to `<base>?method=<name>&...`. Replies
//! carry an envelope: `{"stat":"ok","result":{...}}` or
//! `{"stat":"fail","code":N,"message":"..."}`. Logging in takes two
//! round-trips (partner login, then user login); the step counter lives in the
//! request data so the caller can loop on [`Outcome::Continue`].

use reqwest::Url;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::RpcConfig;
use crate::credentials::Credentials;
use crate::error::ProtocolCode;
use crate::models::{AudioFormat, Song, Station};
use crate::transport::HttpRequest;

const API_VERSION: &str = "5";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Login,
    GetStations,
    GetPlaylist,
}

#[derive(Clone, Debug)]
pub enum RequestData {
    Login { credentials: Credentials, step: u8 },
    GetStations,
    GetPlaylist { station_id: String, format: AudioFormat },
}

impl RequestData {
    pub fn login(credentials: Credentials) -> Self {
        RequestData::Login {
            credentials,
            step: 0,
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            RequestData::Login { .. } => RequestKind::Login,
            RequestData::GetStations => RequestKind::GetStations,
            RequestData::GetPlaylist { .. } => RequestKind::GetPlaylist,
        }
    }

    fn method(&self) -> &'static str {
        match self {
            RequestData::Login { step: 0, .. } => "auth.partnerLogin",
            RequestData::Login { .. } => "auth.userLogin",
            RequestData::GetStations => "user.getStationList",
            RequestData::GetPlaylist { .. } => "station.getPlaylist",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    LoggedIn,
    Stations(Vec<Station>),
    Playlist(Vec<Song>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Another round-trip is needed for the same call.
    Continue,
    Done(Response),
}

#[derive(Default)]
struct AuthState {
    partner_id: Option<String>,
    partner_auth_token: Option<String>,
    user_id: Option<String>,
    user_auth_token: Option<String>,
    sync_time: Option<(u64, Instant)>,
}

impl AuthState {
    fn sync_time(&self) -> u64 {
        self.sync_time
            .map(|(server, received)| server + received.elapsed().as_secs())
            .unwrap_or(0)
    }
}

pub struct Protocol {
    rpc: RpcConfig,
    auth: AuthState,
}

impl Protocol {
    pub fn new(rpc: RpcConfig) -> Self {
        Self {
            rpc,
            auth: AuthState::default(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.user_auth_token.is_some()
    }

    /// Forgets every server-issued token.
    pub fn clear_auth(&mut self) {
        self.auth = AuthState::default();
    }

    /// Builds the HTTP request for the current step of `data`.
    pub fn prepare(&self, data: &RequestData) -> Result<HttpRequest, ProtocolCode> {
        let mut url = Url::parse(&self.rpc.base_url()).map_err(|e| {
            warn!("invalid RPC base url {}: {}", self.rpc.base_url(), e);
            ProtocolCode::InvalidRequest
        })?;

        let body = match data {
            RequestData::Login { step: 0, .. } => {
                url.query_pairs_mut().append_pair("method", data.method());
                json!({
                    "username": self.rpc.partner_username,
                    "password": self.rpc.partner_password,
                    "deviceModel": self.rpc.device_model,
                    "version": API_VERSION,
                })
            }
            RequestData::Login { credentials, .. } => {
                let partner_token = self
                    .auth
                    .partner_auth_token
                    .as_deref()
                    .ok_or(ProtocolCode::NotAuthenticated)?;
                let partner_id = self.auth.partner_id.as_deref().unwrap_or_default();
                url.query_pairs_mut()
                    .append_pair("method", data.method())
                    .append_pair("auth_token", partner_token)
                    .append_pair("partner_id", partner_id);
                json!({
                    "loginType": "user",
                    "username": credentials.username,
                    "password": credentials.password,
                    "partnerAuthToken": partner_token,
                    "syncTime": self.auth.sync_time(),
                })
            }
            RequestData::GetStations | RequestData::GetPlaylist { .. } => {
                let user_token = self
                    .auth
                    .user_auth_token
                    .as_deref()
                    .ok_or(ProtocolCode::NotAuthenticated)?;
                url.query_pairs_mut()
                    .append_pair("method", data.method())
                    .append_pair("auth_token", user_token)
                    .append_pair("partner_id", self.auth.partner_id.as_deref().unwrap_or_default())
                    .append_pair("user_id", self.auth.user_id.as_deref().unwrap_or_default());

                let mut body = json!({
                    "userAuthToken": user_token,
                    "syncTime": self.auth.sync_time(),
                });
                if let RequestData::GetPlaylist { station_id, format } = data {
                    body["stationToken"] = json!(station_id);
                    if let Some(name) = format.additional_url_name() {
                        body["additionalAudioUrl"] = json!(name);
                    }
                }
                body
            }
        };

        debug!("prepared {}", data.method());
        let body = serde_json::to_vec(&body).map_err(|_| ProtocolCode::InvalidRequest)?;
        Ok(HttpRequest::post(url.as_str(), body).header("Content-Type", "application/json"))
    }

    /// Interprets the response body for the current step of `data`, advancing
    /// its step counter when another round-trip is required.
    pub fn handle(&mut self, data: &mut RequestData, body: &[u8]) -> Result<Outcome, ProtocolCode> {
        let result = parse_envelope(body)?;

        match data {
            RequestData::Login { step, .. } if *step == 0 => {
                self.auth.partner_id = str_field(&result, "partnerId");
                self.auth.partner_auth_token = Some(
                    str_field(&result, "partnerAuthToken").ok_or(ProtocolCode::InvalidResponse)?,
                );
                let server_time = result.get("syncTime").and_then(|t| t.as_u64()).unwrap_or(0);
                self.auth.sync_time = Some((server_time, Instant::now()));
                *step = 1;
                Ok(Outcome::Continue)
            }
            RequestData::Login { .. } => {
                self.auth.user_id = str_field(&result, "userId");
                self.auth.user_auth_token = Some(
                    str_field(&result, "userAuthToken").ok_or(ProtocolCode::InvalidResponse)?,
                );
                Ok(Outcome::Done(Response::LoggedIn))
            }
            RequestData::GetStations => {
                let stations = result
                    .get("stations")
                    .and_then(|s| s.as_array())
                    .ok_or(ProtocolCode::InvalidResponse)?
                    .iter()
                    .filter_map(parse_station)
                    .collect();
                Ok(Outcome::Done(Response::Stations(stations)))
            }
            RequestData::GetPlaylist { format, .. } => {
                let songs = result
                    .get("items")
                    .and_then(|s| s.as_array())
                    .map(|items| items.iter().filter_map(|i| parse_song(i, *format)).collect())
                    .unwrap_or_default();
                Ok(Outcome::Done(Response::Playlist(songs)))
            }
        }
    }
}

fn parse_envelope(body: &[u8]) -> Result<Value, ProtocolCode> {
    let json: Value = serde_json::from_slice(body).map_err(|e| {
        warn!("unparseable RPC response: {}", e);
        ProtocolCode::InvalidResponse
    })?;

    match json.get("stat").and_then(|s| s.as_str()) {
        Some("ok") => Ok(json.get("result").cloned().unwrap_or(Value::Null)),
        Some("fail") => {
            let code = json.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
            let message = json.get("message").and_then(|m| m.as_str()).unwrap_or("");
            debug!("RPC failure code={} message={}", code, message);
            Err(ProtocolCode::from_code(code))
        }
        _ => Err(ProtocolCode::InvalidResponse),
    }
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(|x| x.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn parse_station(v: &Value) -> Option<Station> {
    let id = str_field(v, "stationToken").or_else(|| str_field(v, "stationId"))?;
    let name = str_field(v, "stationName").unwrap_or_else(|| id.clone());
    Some(Station { id, name })
}

fn parse_song(item: &Value, preferred: AudioFormat) -> Option<Song> {
    // Ads carry an adToken instead of song fields.
    if item.get("adToken").is_some() {
        return None;
    }

    let additional = preferred
        .additional_url_name()
        .and(str_field(item, "additionalAudioUrl"));

    let (audio_url, audio_format) = match additional {
        Some(url) => (url, preferred),
        None => {
            let quality = item
                .get("audioUrlMap")
                .and_then(|m| m.get(preferred.quality_key()))?;
            let url = str_field(quality, "audioUrl")?;
            let format = quality
                .get("encoding")
                .and_then(|e| e.as_str())
                .and_then(AudioFormat::from_encoding)
                .unwrap_or(preferred);
            (url, format)
        }
    };

    let file_gain = item
        .get("trackGain")
        .and_then(|g| {
            g.as_str()
                .and_then(|s| s.parse::<f32>().ok())
                .or_else(|| g.as_f64().map(|f| f as f32))
        })
        .unwrap_or(0.0);

    Some(Song {
        title: str_field(item, "songName")?,
        artist: str_field(item, "artistName").unwrap_or_default(),
        album: str_field(item, "albumName").unwrap_or_default(),
        audio_url,
        file_gain,
        audio_format,
        cover_art: str_field(item, "albumArtUrl"),
    })
}
