use serde::{Deserialize, Serialize};

/// Encoding of a song's audio stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    AacPlus,
    Mp3,
    Mp3Hifi,
}

impl AudioFormat {
    /// Key of the stream URL inside the playlist item's `audioUrlMap`.
    pub fn quality_key(&self) -> &'static str {
        match self {
            AudioFormat::AacPlus => "highQuality",
            AudioFormat::Mp3 => "mediumQuality",
            AudioFormat::Mp3Hifi => "highQuality",
        }
    }

    /// Value sent as `additionalAudioUrl` when requesting a playlist.
    pub fn additional_url_name(&self) -> Option<&'static str> {
        match self {
            AudioFormat::AacPlus => None,
            AudioFormat::Mp3 => Some("HTTP_128_MP3"),
            AudioFormat::Mp3Hifi => Some("HTTP_192_MP3"),
        }
    }

    /// File extension handed to the decoder as a format hint.
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::AacPlus => "aac",
            AudioFormat::Mp3 | AudioFormat::Mp3Hifi => "mp3",
        }
    }

    pub fn from_encoding(encoding: &str) -> Option<Self> {
        match encoding.to_ascii_lowercase().as_str() {
            "aacplus" | "aac" => Some(AudioFormat::AacPlus),
            "mp3" => Some(AudioFormat::Mp3),
            "mp3-hifi" => Some(AudioFormat::Mp3Hifi),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub audio_url: String,
    /// Replay gain in dB.
    pub file_gain: f32,
    pub audio_format: AudioFormat,
    pub cover_art: Option<String>,
}

impl Song {
    /// Linear scale factor for the song's replay gain.
    pub fn gain_factor(&self) -> f32 {
        10f32.powf(self.file_gain / 20.0)
    }
}
