mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::{Harness, RawClient, connect_payload, test_config, valid_connect_payload};
use replica::command::Command;
use replica::net::{ClientOpcode, GAME_VERSION, PacketBuffer, parse_client_datagram};
use replica::server::{LauncherInfo, QUERY_PLAYERS, launcher_query};
use replica::world::{UserInfo, UserInfoFlags};
use replica::{
    ClientEvent, ClientPhase, ConnectionError, ConnectionState, DisconnectReason, ServerConfig,
    ServerEvent,
};

#[test]
fn test_first_joiner_spawns() {
    let mut h = Harness::new(test_config());
    let index = h.join("alice");

    let client = &h.clients[index];
    assert_eq!(client.state().console_player, Some(0));
    assert_eq!(
        client.state().console().map(|p| p.userinfo.name.as_str()),
        Some("alice")
    );
    assert_eq!(h.server.connection_state(0), ConnectionState::Spawned);
    assert_eq!(h.server.world().player(0).unwrap().userinfo.name, "alice");
    assert!(h.events.iter().any(|e| matches!(
        e,
        ServerEvent::ClientSpawned { slot: 0, name } if name == "alice"
    )));
    assert!(
        client
            .state()
            .messages
            .iter()
            .any(|(_, text)| text.contains("Test Server"))
    );
}

#[test]
fn test_wrong_password_is_refused() {
    let mut h = Harness::new(ServerConfig {
        password: "secret".to_string(),
        force_password: true,
        ..test_config()
    });
    let mut config = h.client_config("mallory");
    config.password = "guess".to_string();
    let index = h.connect(config);

    assert!(h.wait_for(1000, |h| h.clients[index].phase().is_finished()));
    assert_eq!(
        *h.clients[index].phase(),
        ClientPhase::Refused(ConnectionError::WrongPassword)
    );
    assert_eq!(h.server.connections().len(), 0);
    assert!(
        h.events
            .iter()
            .any(|e| matches!(e, ServerEvent::ConnectionDenied { .. }))
    );
}

#[test]
fn test_right_password_gets_in_any_case() {
    let mut h = Harness::new(ServerConfig {
        password: "secret".to_string(),
        force_password: true,
        ..test_config()
    });
    let mut config = h.client_config("bob");
    // Passwords compare without case.
    config.password = "SECRET".to_string();
    let index = h.connect(config);

    assert!(h.wait_for(2000, |h| *h.clients[index].phase() == ClientPhase::Spawned));
}

#[test]
fn test_wrong_protocol_refused_with_sequence_zero() {
    let mut h = Harness::new(test_config());
    let mut raw = RawClient::new(h.server_addr());
    raw.send(&connect_payload(GAME_VERSION, "", 99));

    let received = raw.exchange(&mut h.server, 500);
    assert_eq!(received.len(), 1);
    let (sequence, commands) = &received[0];
    assert_eq!(*sequence, Some(0));
    assert_eq!(
        commands,
        &vec![Command::ConnectError(ConnectionError::WrongProtocolVersion)]
    );
    assert_eq!(h.server.connections().len(), 0);
}

#[test]
fn test_wrong_version_names_the_server_version() {
    let mut h = Harness::new(test_config());
    let mut raw = RawClient::new(h.server_addr());
    raw.send(&connect_payload("0.0.1", "", replica::net::PROTOCOL_VERSION));

    let received = raw.exchange(&mut h.server, 500);
    let commands = &received[0].1;
    assert_eq!(
        commands[0],
        Command::ConnectError(ConnectionError::WrongVersion {
            server_version: GAME_VERSION.to_string()
        })
    );
}

#[test]
fn test_authentication_failure_frees_the_slot() {
    let mut h = Harness::new(test_config());
    let mut raw = RawClient::new(h.server_addr());
    raw.send(&valid_connect_payload());

    let received = raw.exchange(&mut h.server, 500);
    let authenticate = received
        .iter()
        .find(|(sequence, _)| *sequence == Some(0))
        .expect("no reliable reply");
    assert!(matches!(
        &authenticate.1[0],
        Command::Authenticate { map } if map == "MAP01"
    ));
    assert_eq!(h.server.connection_state(0), ConnectionState::Connected);

    let mut buf = PacketBuffer::new(64);
    buf.write_byte(ClientOpcode::AttemptAuthentication as u8);
    for _ in 0..5 {
        buf.write_string("00000000");
    }
    raw.send(buf.as_bytes());

    let mut refused = false;
    let start = Instant::now();
    while !refused && start.elapsed() < Duration::from_millis(500) {
        refused = raw.exchange(&mut h.server, 100).iter().any(|(_, commands)| {
            commands.contains(&Command::ConnectError(ConnectionError::AuthenticationFailed))
        });
    }
    assert!(refused);
    assert_eq!(h.server.connection_state(0), ConnectionState::Free);
}

#[test]
fn test_unknown_command_puts_address_on_cooldown() {
    let mut h = Harness::new(test_config());
    let mut raw = RawClient::new(h.server_addr());
    raw.send(&[250]);
    h.server.tick_n(2);
    thread::sleep(Duration::from_millis(5));

    raw.send(&valid_connect_payload());
    assert!(raw.exchange(&mut h.server, 200).is_empty());
    assert_eq!(h.server.connections().len(), 0);
}

#[test]
fn test_server_full() {
    let mut h = Harness::new(ServerConfig {
        max_clients: 1,
        max_clients_per_ip: 4,
        ..test_config()
    });
    h.join("first");
    // Loopback connections get one slot beyond the limit.
    h.join("admin");

    let config = h.client_config("third");
    let index = h.connect(config);
    assert!(h.wait_for(1000, |h| h.clients[index].phase().is_finished()));
    assert_eq!(
        *h.clients[index].phase(),
        ClientPhase::Refused(ConnectionError::ServerIsFull)
    );
}

#[test]
fn test_too_many_connections_from_one_address() {
    let mut h = Harness::new(ServerConfig {
        max_clients_per_ip: 1,
        ..test_config()
    });
    h.join("first");

    let config = h.client_config("second");
    let index = h.connect(config);
    assert!(h.wait_for(1000, |h| h.clients[index].phase().is_finished()));
    assert_eq!(
        *h.clients[index].phase(),
        ClientPhase::Refused(ConnectionError::TooManyConnectionsFromIp)
    );
    assert_eq!(h.server.connections().len(), 1);
}

#[test]
fn test_silent_client_lags_then_times_out() {
    let mut h = Harness::new(ServerConfig {
        timeout_ticks: 30,
        lagging_ticks: 10,
        ..test_config()
    });
    h.join("quiet");
    h.clients.clear();

    h.steps(15);
    let infos = h.server.client_infos();
    assert_eq!(infos.len(), 1);
    assert!(infos[0].lagging);
    assert!(h.server.world().player(0).unwrap().lagging);

    h.steps(20);
    assert_eq!(h.server.connections().len(), 0);
    assert!(h.events.iter().any(|e| matches!(
        e,
        ServerEvent::ClientDisconnected {
            reason: DisconnectReason::Timeout,
            ..
        }
    )));
}

#[test]
fn test_quit_is_graceful() {
    let mut h = Harness::new(test_config());
    let alice = h.join("alice");
    let bob = h.join("bob");

    h.clients[alice].quit().unwrap();
    assert!(h.wait_for(1000, |h| h.server.connections().len() == 1));
    assert!(h.events.iter().any(|e| matches!(
        e,
        ServerEvent::ClientDisconnected {
            slot: 0,
            reason: DisconnectReason::Graceful,
            ..
        }
    )));

    assert!(h.wait_for(1000, |h| h.clients[bob].state().world.player(0).is_none()));
    assert!(
        h.clients[bob]
            .state()
            .messages
            .iter()
            .any(|(_, text)| text == "alice disconnected.")
    );
}

#[test]
fn test_kick_tells_the_player_why() {
    let mut h = Harness::new(test_config());
    let index = h.join("rude");

    assert!(h.server.kick(0, "Language."));
    assert!(h.wait_for(1000, |h| h.clients[index].phase().is_finished()));
    assert_eq!(
        *h.clients[index].phase(),
        ClientPhase::Kicked("Language.".to_string())
    );
    assert_eq!(h.server.connections().len(), 0);
}

#[test]
fn test_old_client_id_does_not_reach_a_reused_slot() {
    let mut h = Harness::new(test_config());
    let first = h.join("alice");
    let old = h.server.client_infos()[0].id;
    assert_eq!(h.server.resolve(old), Some(0));

    h.clients[first].quit().unwrap();
    assert!(h.wait_for(1000, |h| h.server.connections().is_empty()));
    assert_eq!(h.server.resolve(old), None);

    h.join("bob");
    let new = h.server.client_infos()[0].id;
    assert_eq!(new.slot, old.slot);
    assert_eq!(h.server.resolve(old), None);
    assert_eq!(h.server.resolve(new), Some(0));
}

#[test]
fn test_banned_address_cannot_return() {
    let mut h = Harness::new(test_config());
    let index = h.join("griefer");

    assert!(h.server.ban(0, "griefing", 0));
    assert!(h.wait_for(1000, |h| h.clients[index].phase().is_finished()));

    let config = h.client_config("griefer");
    let again = h.connect(config);
    assert!(h.wait_for(1000, |h| h.clients[again].phase().is_finished()));
    assert_eq!(
        *h.clients[again].phase(),
        ClientPhase::Refused(ConnectionError::Banned {
            reason: "griefing".to_string(),
            expires: 0
        })
    );
}

#[test]
fn test_bans_survive_a_restart() {
    let ban_file = std::env::temp_dir().join(format!("replica-bans-{}.json", std::process::id()));
    let mut config = test_config();
    config.ban_file = Some(ban_file.clone());

    let mut h = Harness::new(config.clone());
    h.join("griefer");
    assert!(h.server.ban(0, "griefing", 0));
    drop(h);

    config.port = common::next_port();
    let mut h = Harness::new(config);
    assert_eq!(h.server.bans().len(), 1);
    let client = h.client_config("griefer");
    let again = h.connect(client);
    assert!(h.wait_for(1000, |h| h.clients[again].phase().is_finished()));
    std::fs::remove_file(&ban_file).unwrap();
    assert!(matches!(
        h.clients[again].phase(),
        ClientPhase::Refused(ConnectionError::Banned { .. })
    ));
}

#[test]
fn test_userinfo_change_reaches_everyone() {
    let mut h = Harness::new(test_config());
    let alice = h.join("alice");
    let bob = h.join("bob");

    let info = UserInfo {
        name: "alicia".to_string(),
        ..UserInfo::default()
    };
    h.clients[alice]
        .set_userinfo(UserInfoFlags::NAME, &info)
        .unwrap();

    assert!(h.wait_for(1000, |h| {
        h.clients[bob]
            .state()
            .world
            .player(0)
            .is_some_and(|p| p.userinfo.name == "alicia")
    }));
    assert_eq!(h.server.world().player(0).unwrap().userinfo.name, "alicia");
    assert!(
        h.clients[bob]
            .state()
            .messages
            .iter()
            .any(|(_, text)| text == "alice is now known as alicia")
    );
}

#[test]
fn test_spectator_joins_without_playing() {
    let mut h = Harness::new(test_config());
    let mut config = h.client_config("watcher");
    config.spectate = true;
    let index = h.connect(config);
    assert!(h.wait_for(2000, |h| *h.clients[index].phase() == ClientPhase::Spawned));

    assert!(h.server.world().player(0).unwrap().spectating);
    assert!(h.clients[index].state().console().unwrap().spectating);
}

#[test]
fn test_scores_restored_on_rejoin() {
    let mut h = Harness::new(test_config());
    let first = h.join("fragger");
    h.server.world_mut().player_mut(0).unwrap().frags = 7;

    h.clients[first].quit().unwrap();
    assert!(h.wait_for(1000, |h| h.server.connections().is_empty()));

    h.join("fragger");
    assert_eq!(h.server.world().player(0).unwrap().frags, 7);
    let last = h.clients.len() - 1;
    assert_eq!(h.clients[last].state().console().unwrap().frags, 7);
}

/// Sends a hand-built missing-packet list and checks the sender is kicked
/// without anything being resent.
fn assert_missing_list_kicks(entries: &[i32]) {
    let mut h = Harness::new(test_config());
    let index = h.join("liar");

    let mut buf = PacketBuffer::new(64);
    buf.write_byte(ClientOpcode::MissingPacket as u8);
    for entry in entries {
        buf.write_long(*entry);
    }
    h.clients[index].send_payload(buf.as_bytes()).unwrap();

    assert!(
        h.wait_for(1000, |h| h.clients[index].phase().is_finished()),
        "{:?} was accepted",
        entries
    );
    assert_eq!(
        *h.clients[index].phase(),
        ClientPhase::Kicked("Invalid missing packet request.".to_string())
    );
    let events: Vec<_> = h.clients[index].drain_events().collect();
    assert!(events.contains(&ClientEvent::Kicked {
        reason: "Invalid missing packet request.".to_string(),
        reconnect: false
    }));
    assert!(
        !h.events
            .iter()
            .any(|e| matches!(e, ServerEvent::PacketsResent { .. })),
        "{:?} triggered a resend",
        entries
    );
}

#[test]
fn test_descending_missing_list_is_kicked() {
    assert_missing_list_kicks(&[5, 3, -1]);
}

#[test]
fn test_duplicate_missing_entries_are_kicked() {
    assert_missing_list_kicks(&[5, 5, -1]);
}

#[test]
fn test_negative_missing_entry_is_kicked() {
    assert_missing_list_kicks(&[-3, -1]);
}

#[test]
fn test_unterminated_missing_list_is_kicked() {
    assert_missing_list_kicks(&[0, 1]);
}

#[test]
fn test_launcher_query() {
    let mut h = Harness::new(test_config());
    h.join("alice");

    let mut raw = RawClient::new(h.server_addr());
    raw.send(&launcher_query(QUERY_PLAYERS, 4321));

    let mut info = None;
    let start = Instant::now();
    while info.is_none() && start.elapsed() < Duration::from_millis(500) {
        h.server.tick_n(1);
        thread::sleep(Duration::from_millis(1));
        for (data, _) in raw.endpoint.receive().unwrap() {
            let payload = parse_client_datagram(&data).unwrap();
            info = LauncherInfo::decode(&payload);
        }
    }

    let info = info.expect("no launcher reply");
    assert_eq!(info.time, 4321);
    assert_eq!(info.host_name, "Test Server");
    assert_eq!(info.map, "MAP01");
    assert_eq!(info.player_count, 1);
    assert_eq!(info.players[0].name, "alice");
    assert!(info.is_compatible());
    assert!(!info.passworded);
}
