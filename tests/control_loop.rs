mod common;

use common::{eventually, Harness};
use pandora_player::config::Config;
use pandora_player::controller::{Command, Controller};

fn fast_heartbeat() -> Config {
    let mut config = Config::default();
    config.playback.heartbeat_ms = 20;
    config
}

#[test]
fn test_commands_run_in_order_and_shutdown_logs_out() {
    let harness = Harness::slow(vec![vec!["Song1", "Song2"]]);
    let controller = Controller::spawn(harness.session(Config::default())).unwrap();

    controller.send(Command::LoginStored).unwrap();
    controller.send(Command::Play).unwrap();
    controller.shutdown();

    let recorder = &harness.recorder;
    assert!(recorder.contains("Login Ok."));
    assert_eq!(recorder.count("New Song"), 1);
    assert!(recorder.contains("Logged out"));
    assert_eq!(harness.service.connects(), 1);
    assert_eq!(harness.service.releases(), 1);
    assert_eq!(harness.sinks.opened(), harness.sinks.closed());
}

#[test]
fn test_heartbeat_plays_through_playlist() {
    let harness = Harness::new(vec![vec!["Song1", "Song2"]]);
    let controller = Controller::spawn(harness.session(fast_heartbeat())).unwrap();

    controller.send(Command::LoginStored).unwrap();
    controller.send(Command::Play).unwrap();

    // Both songs finish on their own, then the refetch comes back empty.
    assert!(eventually(|| harness.recorder.contains("No tracks left.")));
    assert_eq!(harness.recorder.count("New Song"), 2);
    assert!(harness.sinks.max_live() <= 1);

    controller.shutdown();
    assert_eq!(harness.service.releases(), 1);
    assert_eq!(harness.sinks.opened(), harness.sinks.closed());
}

#[test]
fn test_unknown_station_is_reported() {
    let harness = Harness::new(vec![]);
    let controller = Controller::spawn(harness.session(Config::default())).unwrap();

    controller.send(Command::LoginStored).unwrap();
    controller
        .send(Command::SelectStation("missing".into()))
        .unwrap();
    controller.send(Command::Play).unwrap();
    controller.shutdown();

    assert!(harness.recorder.contains("Unknown station missing"));
    assert!(harness
        .recorder
        .contains("Error: invalid state: no station selected"));
    assert_eq!(harness.recorder.count("New Song"), 0);
}

#[test]
fn test_login_command_saves_credentials() {
    let harness = Harness::new(vec![]);
    let controller = Controller::spawn(harness.session(Config::default())).unwrap();

    controller
        .send(Command::Login {
            username: "someone@example.com".into(),
            password: "pw".into(),
        })
        .unwrap();
    controller.send(Command::Logout).unwrap();
    controller.send(Command::LoginStored).unwrap();
    controller.shutdown();

    assert_eq!(harness.recorder.count("Login Ok."), 2);
    assert_eq!(harness.service.connects(), 2);
    assert_eq!(harness.service.releases(), 2);
}
