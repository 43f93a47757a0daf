//! HTTPS request/response primitive with certificate pinning.
//!
//! The server certificate is accepted only when the SHA-1 digest of its DER
//! encoding equals the pinned fingerprint. There is no fallback to the system
//! trust store. Retrying is left to callers.

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, ServerName};
use sha1::{Digest, Sha1};
use std::error::Error as StdError;
use std::fmt;
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

use crate::error::TransportError;

pub const FINGERPRINT_LEN: usize = 20;

const USER_AGENT: &str = concat!("pandora_player/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Parses 40 hex digits; `:` separators are allowed.
    pub fn from_hex(text: &str) -> anyhow::Result<Self> {
        let cleaned: String = text.chars().filter(|c| *c != ':').collect();
        let bytes = hex::decode(cleaned.trim())?;
        let bytes: [u8; FINGERPRINT_LEN] = bytes.try_into().map_err(|v: Vec<u8>| {
            anyhow::anyhow!(
                "fingerprint must be {} bytes, got {}",
                FINGERPRINT_LEN,
                v.len()
            )
        })?;
        Ok(Self(bytes))
    }

    pub fn of_der(der: &[u8]) -> Self {
        let digest = Sha1::digest(der);
        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", hex::encode_upper(self.0))
    }
}

/// Accepts exactly the certificate whose digest matches the pin.
pub struct PinnedCertVerifier {
    pin: Fingerprint,
}

impl PinnedCertVerifier {
    pub fn new(pin: Fingerprint) -> Self {
        Self { pin }
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let seen = Fingerprint::of_der(&end_entity.0);
        if seen == self.pin {
            Ok(ServerCertVerified::assertion())
        } else {
            warn!("certificate {:?} does not match pin {:?}", seen, self.pin);
            Err(rustls::Error::General(format!(
                "certificate fingerprint {} does not match pinned value",
                hex::encode_upper(seen.0)
            )))
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub url: String,
    pub method: Method,
    pub body: Option<Vec<u8>>,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn post(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            method: Method::Post,
            body: Some(body),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Blocking byte stream of a song's audio.
pub type AudioStream = Box<dyn Read + Send + Sync>;

pub trait Transport: Send + Sync {
    /// One request/response round-trip; the whole body is returned.
    fn fetch(&self, request: &HttpRequest) -> Result<Vec<u8>, TransportError>;

    /// Opens a GET stream. Reads on it have no timeout.
    fn open_stream(&self, url: &str) -> Result<AudioStream, TransportError>;
}

/// Builds a pinned transport. Connecting is the TLS subsystem setup; dropping
/// the returned transport tears it down.
pub trait Connector: Send + Sync {
    fn connect(&self, pin: Fingerprint) -> Result<Arc<dyn Transport>, TransportError>;
}

pub struct HttpsConnector {
    request_timeout: Duration,
}

impl HttpsConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Connector for HttpsConnector {
    fn connect(&self, pin: Fingerprint) -> Result<Arc<dyn Transport>, TransportError> {
        let transport = HttpsTransport::new(pin, self.request_timeout)?;
        Ok(Arc::new(transport))
    }
}

pub struct HttpsTransport {
    client: reqwest::blocking::Client,
    request_timeout: Duration,
}

impl HttpsTransport {
    pub fn new(pin: Fingerprint, request_timeout: Duration) -> Result<Self, TransportError> {
        let tls = ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(PinnedCertVerifier::new(pin)))
            .with_no_client_auth();

        // No client-wide timeout: it would also cut audio streams short.
        let client = reqwest::blocking::Client::builder()
            .use_preconfigured_tls(tls)
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        debug!("TLS transport ready, pinned to {:?}", pin);
        Ok(Self {
            client,
            request_timeout,
        })
    }
}

impl Drop for HttpsTransport {
    fn drop(&mut self) {
        debug!("TLS transport released");
    }
}

impl Transport for HttpsTransport {
    fn fetch(&self, request: &HttpRequest) -> Result<Vec<u8>, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        builder = builder.timeout(self.request_timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        let bytes = response.bytes().map_err(classify)?;
        Ok(bytes.to_vec())
    }

    fn open_stream(&self, url: &str) -> Result<AudioStream, TransportError> {
        let response = self.client.get(url).send().map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(Box::new(SyncReader(Mutex::new(response))))
    }
}

/// The decoder wants a `Sync` source; the HTTP body is only `Send`.
struct SyncReader<R>(Mutex<R>);

impl<R: Read> Read for SyncReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.0.get_mut() {
            Ok(inner) => inner.read(buf),
            Err(poisoned) => poisoned.into_inner().read(buf),
        }
    }
}

/// Maps a reqwest error, telling pin failures apart from other network errors.
fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout;
    }

    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(tls) = find_tls_error(cause) {
            return TransportError::TlsVerification(tls.to_string());
        }
        source = cause.source();
    }

    TransportError::Network(err.to_string())
}

/// `io::Error` hides what it wraps from `source()`, so nested io errors are
/// unwrapped with `get_ref` until something else turns up.
fn find_tls_error<'a>(mut cause: &'a (dyn StdError + 'static)) -> Option<&'a rustls::Error> {
    loop {
        if let Some(tls) = cause.downcast_ref::<rustls::Error>() {
            return Some(tls);
        }
        match cause
            .downcast_ref::<std::io::Error>()
            .and_then(|io| io.get_ref())
        {
            Some(inner) => cause = inner,
            None => return None,
        }
    }
}
