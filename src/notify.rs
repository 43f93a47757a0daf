//! One-listener notification channel from the session and playback engine to
//! the UI.
//!
//! At most one listener is registered at a time; registering a new one
//! replaces the previous. Every message is also mirrored to the log.

use crate::models::{Song, Station};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// Sentinel text of [`Notification::NewSong`].
pub const NEW_SONG: &str = "New Song";

#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    /// Free-text status or diagnostic line.
    Status(String),
    /// Playback of a new song started; the UI should refresh metadata and
    /// cover art.
    NewSong(Song),
    /// Heartbeat tick with the worker's elapsed time and the song duration.
    Progress { elapsed: Duration, duration: Duration },
    /// Station list after login.
    Stations(Vec<Station>),
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Status(msg) => f.write_str(msg),
            Notification::NewSong(_) => f.write_str(NEW_SONG),
            Notification::Progress { elapsed, duration } => {
                f.write_str(&format_time(elapsed.as_secs(), duration.as_secs()))
            }
            Notification::Stations(stations) => write!(f, "{} stations", stations.len()),
        }
    }
}

pub trait NotificationListener: Send + Sync {
    fn receive(&self, notification: &Notification);
}

impl NotificationListener for tokio::sync::mpsc::UnboundedSender<Notification> {
    fn receive(&self, notification: &Notification) {
        let _ = self.send(notification.clone());
    }
}

/// Adapts a closure into a listener.
pub struct FnListener<F>(pub F);

impl<F> NotificationListener for FnListener<F>
where
    F: Fn(&Notification) + Send + Sync,
{
    fn receive(&self, notification: &Notification) {
        (self.0)(notification)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerId(u64);

type Slot = Option<(ListenerId, Arc<dyn NotificationListener>)>;

#[derive(Clone, Default)]
pub struct NotificationBus {
    slot: Arc<Mutex<Slot>>,
    next_id: Arc<AtomicU64>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener`, replacing any previous one.
    pub fn set_listener(&self, listener: Arc<dyn NotificationListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some((id, listener));
        }
        id
    }

    /// Unregisters the listener only if `id` is still the registered one.
    pub fn remove_listener(&self, id: ListenerId) {
        if let Ok(mut slot) = self.slot.lock() {
            if matches!(slot.as_ref(), Some((current, _)) if *current == id) {
                *slot = None;
            }
        }
    }

    pub fn has_listener(&self) -> bool {
        self.slot.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    pub fn publish(&self, notification: Notification) {
        match &notification {
            Notification::Progress { .. } => {}
            other => info!("{}", other),
        }

        // Deliver outside the lock so a listener may re-register.
        let listener = self
            .slot
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|(_, l)| l.clone()));
        if let Some(listener) = listener {
            listener.receive(&notification);
        }
    }

    pub fn status(&self, message: impl Into<String>) {
        self.publish(Notification::Status(message.into()));
    }
}

/// Renders `played / total` the way the player screen shows it. When the
/// total is unknown only the elapsed part is shown.
pub fn format_time(elapsed_secs: u64, duration_secs: u64) -> String {
    let hms = |t: u64| (t / 3600, (t / 60) % 60, t % 60);
    let (eh, em, es) = hms(elapsed_secs);
    let (dh, dm, ds) = hms(duration_secs);

    if duration_secs == 0 {
        if eh > 0 {
            format!("{}:{:02}:{:02}", eh, em, es)
        } else {
            format!("{:02}:{:02}", em, es)
        }
    } else if dh > 0 {
        format!("{}:{:02}:{:02} / {}:{:02}:{:02}", eh, em, es, dh, dm, ds)
    } else {
        format!("{:02}:{:02} / {:02}:{:02}", em, es, dm, ds)
    }
}
