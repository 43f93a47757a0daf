use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::AudioFormat;
use crate::transport::Fingerprint;

const APP_DIR: &str = "pandora";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// SHA-1 fingerprint of the server certificate, hex encoded.
    #[serde(default = "default_tls_fingerprint")]
    pub tls_fingerprint: String,
    #[serde(default = "default_partner_username")]
    pub partner_username: String,
    #[serde(default = "default_partner_password")]
    pub partner_password: String,
    #[serde(default = "default_device_model")]
    pub device_model: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default)]
    pub audio_format: AudioFormat,
    #[serde(default = "default_volume_step")]
    pub volume_step: i32,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    #[serde(default = "default_initial_volume")]
    pub initial_volume: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            path: default_path(),
            tls_fingerprint: default_tls_fingerprint(),
            partner_username: default_partner_username(),
            partner_password: default_partner_password(),
            device_model: default_device_model(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            audio_format: AudioFormat::default(),
            volume_step: default_volume_step(),
            heartbeat_ms: default_heartbeat_ms(),
            initial_volume: default_initial_volume(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            credentials_file: default_credentials_file(),
            log_dir: default_log_dir(),
        }
    }
}

fn default_host() -> String {
    "tuner.pandora.com".to_string()
}

fn default_path() -> String {
    "/services/json/".to_string()
}

fn default_tls_fingerprint() -> String {
    "D9980BA2CC0F97BB03822C6211EAEA4A06EEF427".to_string()
}

fn default_partner_username() -> String {
    "android".to_string()
}

fn default_partner_password() -> String {
    "AC7IBG09A3DTSYM4R41UJWL07VLN8JI7".to_string()
}

fn default_device_model() -> String {
    "android-generic".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_volume_step() -> i32 {
    2
}

fn default_heartbeat_ms() -> u64 {
    1000
}

fn default_initial_volume() -> f32 {
    0.5
}

fn default_credentials_file() -> PathBuf {
    config_dir().join("credentials.toml")
}

fn default_log_dir() -> PathBuf {
    data_dir()
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl RpcConfig {
    pub fn fingerprint(&self) -> anyhow::Result<Fingerprint> {
        Fingerprint::from_hex(&self.tls_fingerprint)
    }

    pub fn base_url(&self) -> String {
        format!("https://{}{}", self.host, self.path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl PlaybackConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms.max(1))
    }
}

impl Config {
    /// Loads the config file, writing the defaults first if it does not exist.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        config_dir().join("config.toml")
    }
}
