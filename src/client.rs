//! Control-plane client: runs one logical RPC call to completion.
//!
//! A call may need several HTTP round-trips (multi-step login) and, when the
//! service rejects the auth token, one transparent re-login followed by a
//! single retry of the original request.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::credentials::{CredentialStore, Credentials};
use crate::error::{Error, ProtocolCode, Result};
use crate::notify::NotificationBus;
use crate::protocol::{Outcome, Protocol, RequestData, RequestKind, Response};
use crate::transport::{HttpRequest, Transport};

/// State of a single round-trip. The response buffer is owned here and is
/// released when the attempt goes out of scope, on every exit path.
struct RequestAttempt {
    kind: RequestKind,
    step: u8,
    response: Option<Vec<u8>>,
}

impl RequestAttempt {
    fn new(data: &RequestData) -> Self {
        let step = match data {
            RequestData::Login { step, .. } => *step,
            _ => 0,
        };
        Self {
            kind: data.kind(),
            step,
            response: None,
        }
    }
}

impl Drop for RequestAttempt {
    fn drop(&mut self) {
        if let Some(buf) = self.response.take() {
            debug!(
                "releasing {} byte response of {:?} step {}",
                buf.len(),
                self.kind,
                self.step
            );
        }
    }
}

pub struct RpcClient {
    transport: Arc<dyn Transport>,
    protocol: Protocol,
    credentials: Arc<dyn CredentialStore>,
    bus: NotificationBus,
}

impl RpcClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        protocol: Protocol,
        credentials: Arc<dyn CredentialStore>,
        bus: NotificationBus,
    ) -> Self {
        Self {
            transport,
            protocol,
            credentials,
            bus,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.protocol.is_authenticated()
    }

    pub fn clear_auth(&mut self) {
        self.protocol.clear_auth();
    }

    /// Issues `data` until the service reports completion or an error.
    pub fn call(&mut self, data: RequestData) -> Result<Response> {
        self.execute(data, true)
    }

    fn execute(&mut self, mut data: RequestData, allow_reauth: bool) -> Result<Response> {
        let kind = data.kind();
        let mut reauthenticated = false;

        loop {
            let mut attempt = RequestAttempt::new(&data);

            let request: HttpRequest = match self.protocol.prepare(&data) {
                Ok(request) => request,
                Err(code) => {
                    self.bus.status(format!("Error: {}", code));
                    return Err(code.into());
                }
            };

            match self.transport.fetch(&request) {
                Ok(body) => attempt.response = Some(body),
                Err(err) => {
                    warn!("{:?} failed: {}", kind, err);
                    self.bus.status(format!("Network error: {}", err));
                    return Err(Error::Network(err));
                }
            }

            let body = attempt.response.as_deref().unwrap_or_default();
            match self.protocol.handle(&mut data, body) {
                Ok(Outcome::Continue) => continue,
                Ok(Outcome::Done(response)) => {
                    if kind == RequestKind::Login {
                        self.bus.status("Login Ok.");
                    }
                    return Ok(response);
                }
                Err(ProtocolCode::AuthTokenInvalid)
                    if allow_reauth && !reauthenticated && kind != RequestKind::Login =>
                {
                    drop(attempt);
                    self.bus.status("Reauthentication required... ");
                    self.reauthenticate()?;
                    reauthenticated = true;
                    self.bus.status("Trying again... ");
                }
                Err(code) => {
                    self.bus.status(format!("Error: {}", code));
                    return Err(code.into());
                }
            }
        }
    }

    /// Logs in again with credentials read fresh from the store. The copy is
    /// dropped when this returns.
    fn reauthenticate(&mut self) -> Result<()> {
        let credentials =
            Credentials::load(self.credentials.as_ref()).ok_or(Error::MissingCredentials)?;
        info!("re-authenticating as {}", credentials.username);
        self.execute(RequestData::login(credentials), false)
            .map(|_| ())
    }
}
