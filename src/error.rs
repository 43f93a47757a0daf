//! Error types shared by the transport, control-plane client, session and
//! playback engine.

use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of a single HTTP(S) round-trip. The transport never retries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    /// The server certificate did not match the pinned fingerprint.
    #[error("TLS verification failed: {0}")]
    TlsVerification(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP status {0}")]
    Status(u16),
}

/// Result codes reported by the remote RPC service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolCode {
    AuthTokenInvalid,
    InvalidLogin,
    InvalidPartnerLogin,
    ListenerNotAuthorized,
    UserNotAuthorized,
    StationDoesNotExist,
    PlaylistExceeded,
    MaintenanceMode,
    ReadOnlyMode,
    /// The response body could not be understood.
    InvalidResponse,
    /// The request could not be built.
    InvalidRequest,
    /// A request needing authentication was built before login.
    NotAuthenticated,
    Other(i64),
}

impl ProtocolCode {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::MaintenanceMode,
            1000 => Self::ReadOnlyMode,
            1001 => Self::AuthTokenInvalid,
            1002 => Self::InvalidLogin,
            1003 => Self::ListenerNotAuthorized,
            1004 => Self::UserNotAuthorized,
            1006 => Self::StationDoesNotExist,
            1011 | 1012 => Self::InvalidPartnerLogin,
            1039 => Self::PlaylistExceeded,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for ProtocolCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthTokenInvalid => f.write_str("Invalid auth token"),
            Self::InvalidLogin => f.write_str("Wrong email address or password"),
            Self::InvalidPartnerLogin => f.write_str("Invalid partner login"),
            Self::ListenerNotAuthorized => f.write_str("Listener not authorized"),
            Self::UserNotAuthorized => f.write_str("User not authorized"),
            Self::StationDoesNotExist => f.write_str("Station does not exist"),
            Self::PlaylistExceeded => f.write_str("Playlist end; too many skips"),
            Self::MaintenanceMode => f.write_str("Service in maintenance mode"),
            Self::ReadOnlyMode => f.write_str("Service in read-only mode"),
            Self::InvalidResponse => f.write_str("Invalid response"),
            Self::InvalidRequest => f.write_str("Invalid request"),
            Self::NotAuthenticated => f.write_str("Not logged in"),
            Self::Other(code) => write!(f, "Unknown error (code {})", code),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Network(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(ProtocolCode),

    /// The auth token was rejected and could not be refreshed.
    #[error("authentication expired")]
    AuthExpired,

    /// An operation was invoked in a state that does not allow it.
    #[error("invalid state: {0}")]
    State(String),

    #[error("no credentials stored")]
    MissingCredentials,

    #[error("audio error: {0}")]
    Audio(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl From<ProtocolCode> for Error {
    fn from(code: ProtocolCode) -> Self {
        match code {
            ProtocolCode::AuthTokenInvalid => Error::AuthExpired,
            other => Error::Protocol(other),
        }
    }
}

impl From<symphonia::core::errors::Error> for Error {
    fn from(err: symphonia::core::errors::Error) -> Self {
        Error::Decode(err.to_string())
    }
}
