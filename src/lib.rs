pub mod client;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod models;
pub mod notify;
pub mod player;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod transport;

pub use error::{Error, ProtocolCode, Result, TransportError};
pub use models::{AudioFormat, Song, Station};
pub use notify::{Notification, NotificationBus, NotificationListener};
pub use session::Session;
