//! Control thread. Owns the [`Session`], runs UI commands one at a time and
//! fires the playback heartbeat when it is due.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::credentials::Credentials;
use crate::error::Error;
use crate::session::Session;

/// How long the loop sleeps when no heartbeat is armed.
const IDLE_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Saves the credentials, then logs in with them.
    Login { username: String, password: String },
    /// Logs in with the credentials already in the store.
    LoginStored,
    Logout,
    SelectStation(String),
    /// Starts the current song, fetching a playlist first if needed.
    Play,
    Next,
    Stop,
    PauseToggle,
    VolumeUp,
    VolumeDown,
    ToggleMute,
    Shutdown,
}

pub struct Controller {
    tx: mpsc::Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl Controller {
    pub fn spawn(session: Session) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("control".into())
            .spawn(move || run(session, rx))?;
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    pub fn send(&self, command: Command) -> anyhow::Result<()> {
        self.tx
            .send(command)
            .map_err(|_| anyhow::anyhow!("control thread has exited"))
    }

    /// Stops playback, logs out and waits for the control thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("control thread panicked");
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(mut session: Session, rx: mpsc::Receiver<Command>) {
    info!("control loop started");
    loop {
        let wait = session
            .heartbeat_deadline()
            .map(|due| due.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_WAIT);

        match rx.recv_timeout(wait) {
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(command) => dispatch(&mut session, command),
            Err(RecvTimeoutError::Timeout) => {}
        }
        session.poll_heartbeat(Instant::now());
    }

    session.stop_playback();
    session.logout();
    info!("control loop finished");
}

fn dispatch(session: &mut Session, command: Command) {
    debug!("command {:?}", command);
    let result = match command {
        Command::Login { username, password } => {
            let credentials = Credentials::new(username, password);
            if let Err(e) = session.save_credentials(&credentials) {
                warn!("could not save credentials: {:#}", e);
                session.bus().status(format!("Could not save credentials: {}", e));
            }
            session.login(credentials)
        }
        Command::LoginStored => session.login_stored(),
        Command::Logout => {
            session.logout();
            Ok(())
        }
        Command::SelectStation(id) => {
            if session.set_current_station(&id).is_none() {
                session.bus().status(format!("Unknown station {}", id));
            }
            Ok(())
        }
        Command::Play => play(session),
        Command::Next => session.next_song(),
        Command::Stop => {
            session.stop_playback();
            Ok(())
        }
        Command::PauseToggle => {
            if session.player_mode().is_active() {
                let paused = session.pause_toggle();
                session
                    .bus()
                    .status(if paused { "Paused" } else { "Playing" });
            }
            Ok(())
        }
        Command::VolumeUp => {
            session.volume_up();
            report_volume(session);
            Ok(())
        }
        Command::VolumeDown => {
            session.volume_down();
            report_volume(session);
            Ok(())
        }
        Command::ToggleMute => {
            session.toggle_mute();
            report_volume(session);
            Ok(())
        }
        Command::Shutdown => Ok(()),
    };

    if let Err(e) = result {
        warn!("command failed: {}", e);
        // Network and protocol failures were already reported by the client.
        match e {
            Error::Network(_) | Error::Protocol(_) | Error::AuthExpired => {}
            other => session.bus().status(format!("Error: {}", other)),
        }
    }
}

fn play(session: &mut Session) -> crate::error::Result<()> {
    if session.current_song().is_none() {
        session.get_playlist()?;
    }
    session.start_playback()
}

fn report_volume(session: &Session) {
    if let Some(volume) = session.volume() {
        session.bus().status(format!("Volume {}%", volume));
    }
}
