use anyhow::Result;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};

use pandora_player::config::Config;
use pandora_player::controller::{Command, Controller};
use pandora_player::credentials::{Credentials, FileCredentialStore};
use pandora_player::logging::init_logging;
use pandora_player::notify::{Notification, NotificationBus};
use pandora_player::sink::RodioSinkFactory;
use pandora_player::transport::HttpsConnector;
use pandora_player::{Session, Station};

const HELP: &str = "commands: login [user password] | stations | station <n> | play | next | \
                    pause | stop | + | - | mute | logout | quit";

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Send(Command),
    StationAt(usize),
    ListStations,
    Help,
    Quit,
}

fn parse_input(line: &str) -> Option<Input> {
    let mut words = line.split_whitespace();
    let input = match words.next()? {
        "login" => match (words.next(), words.next()) {
            (Some(username), Some(password)) => Input::Send(Command::Login {
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => Input::Send(Command::LoginStored),
        },
        "logout" => Input::Send(Command::Logout),
        "stations" => Input::ListStations,
        "station" => Input::StationAt(words.next()?.parse().ok()?),
        "play" => Input::Send(Command::Play),
        "next" | "n" => Input::Send(Command::Next),
        "pause" | "p" => Input::Send(Command::PauseToggle),
        "stop" => Input::Send(Command::Stop),
        "+" | "=" => Input::Send(Command::VolumeUp),
        "-" => Input::Send(Command::VolumeDown),
        "mute" | "m" => Input::Send(Command::ToggleMute),
        "help" | "?" => Input::Help,
        "quit" | "q" => Input::Quit,
        _ => return None,
    };
    Some(input)
}

fn print_stations(stations: &[Station]) {
    for (i, station) in stations.iter().enumerate() {
        println!("  {:>2}  {}", i, station.name);
    }
}

fn print_notification(notification: &Notification) {
    match notification {
        Notification::NewSong(song) => {
            println!("\n♪ {} - {}", song.artist, song.title);
            if !song.album.is_empty() {
                println!("  {}", song.album);
            }
        }
        Notification::Progress { .. } => {
            print!("\r  {}   ", notification);
            let _ = std::io::stdout().flush();
        }
        Notification::Stations(stations) => {
            println!("{} stations:", stations.len());
            print_stations(stations);
        }
        Notification::Status(message) => println!("{}", message),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    let log_path = init_logging(&config.paths.log_dir)?;

    let credentials = Arc::new(FileCredentialStore::open(&config.paths.credentials_file)?);
    let have_credentials = Credentials::load(credentials.as_ref()).is_some();

    let bus = NotificationBus::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Notification>();
    bus.set_listener(Arc::new(tx));

    let session = Session::new(
        config.clone(),
        Arc::new(HttpsConnector::new(config.rpc.request_timeout())),
        credentials,
        Arc::new(RodioSinkFactory::new(config.playback.initial_volume)),
        bus,
    )?;
    let controller = Controller::spawn(session)?;

    let stations: Arc<Mutex<Vec<Station>>> = Arc::new(Mutex::new(Vec::new()));
    let stations_for_printer = stations.clone();
    tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            if let Notification::Stations(list) = &notification {
                if let Ok(mut known) = stations_for_printer.lock() {
                    *known = list.clone();
                }
            }
            print_notification(&notification);
        }
    });

    println!("Logging to {}", log_path.display());
    println!("{}", HELP);
    if have_credentials {
        controller.send(Command::LoginStored)?;
    } else {
        println!("No stored credentials; use `login <email> <password>`.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_input(line) {
            Some(Input::Send(command)) => controller.send(command)?,
            Some(Input::StationAt(index)) => {
                let id = stations
                    .lock()
                    .ok()
                    .and_then(|known| known.get(index).map(|s| s.id.clone()));
                match id {
                    Some(id) => controller.send(Command::SelectStation(id))?,
                    None => println!("No station {}", index),
                }
            }
            Some(Input::ListStations) => {
                if let Ok(known) = stations.lock() {
                    print_stations(&known);
                }
            }
            Some(Input::Help) => println!("{}", HELP),
            Some(Input::Quit) => break,
            None => println!("Unknown command. {}", HELP),
        }
    }

    tokio::task::spawn_blocking(move || controller.shutdown()).await?;
    println!("Bye.");
    Ok(())
}
