mod common;

use std::collections::BTreeMap;

use glam::IVec3;

use common::{Harness, test_config};
use replica::net::PacketLossSimulation;
use replica::snapshot::is_replicated;
use replica::world::{ActorKind, ActorState, FRACUNIT, NetId, World, catalog};
use replica::{ClientEvent, ClientPhase, ConnectionState, ServerConfig, ServerEvent};

fn units(x: i32, y: i32) -> IVec3 {
    IVec3::new(x * FRACUNIT, y * FRACUNIT, 0)
}

/// What a client should be able to see of `world`.
fn visible(world: &World) -> BTreeMap<NetId, (ActorKind, IVec3)> {
    world
        .actors()
        .filter(|a| is_replicated(a) || a.player.is_some())
        .filter_map(|a| Some((a.net_id?, (a.kind, a.position))))
        .collect()
}

fn mirrored(world: &World) -> BTreeMap<NetId, (ActorKind, IVec3)> {
    world
        .actors()
        .filter_map(|a| Some((a.net_id?, (a.kind, a.position))))
        .collect()
}

#[test]
fn test_early_and_late_joiners_agree_with_the_server() {
    let mut h = Harness::new(test_config());
    let imp = h.server.spawn_actor(catalog::IMP, units(10, 20)).unwrap();
    h.server.spawn_actor(catalog::BARREL, units(-5, 3)).unwrap();
    assert!(h.server.set_sector_light(0, 96));

    let early = h.join("early");

    let demon = h
        .server
        .spawn_actor(catalog::DEMON, IVec3::new(12345, -999, 0))
        .unwrap();
    assert!(h.server.move_actor(imp, units(11, 21), IVec3::new(FRACUNIT, FRACUNIT, 0)));
    assert!(h.server.set_line_alpha(0, FRACUNIT / 2));
    h.steps(3);

    let late = h.join("late");
    h.steps(10);

    let expected = visible(h.server.world());
    assert!(expected.contains_key(&demon));
    for index in [early, late] {
        let world = &h.clients[index].state().world;
        assert_eq!(mirrored(world), expected, "client {} diverged", index);
        assert_eq!(world.level.sector(0).unwrap().light_level, 96);
        assert_eq!(world.level.lines[0].alpha, FRACUNIT / 2);
        assert_eq!(world.actor(imp).unwrap().position, units(11, 21));
    }
    assert_eq!(
        h.clients[early].state().world.player(1).unwrap().userinfo.name,
        "late"
    );
    assert_eq!(
        h.clients[late].state().world.player(0).unwrap().userinfo.name,
        "early"
    );
}

#[test]
fn test_live_changes_replicate() {
    let mut h = Harness::new(test_config());
    let index = h.join("watcher");

    let imp = h.server.spawn_actor(catalog::IMP, units(1, 1)).unwrap();
    let barrel = h.server.spawn_actor(catalog::BARREL, units(2, 2)).unwrap();
    assert!(h.wait_for(1000, |h| h.clients[index].state().world.contains(barrel)));

    h.server.move_actor(imp, units(4, 1), IVec3::ZERO);
    h.server.kill_actor(imp, None);
    h.server.destroy_actor(barrel);
    assert!(h.wait_for(1000, |h| !h.clients[index].state().world.contains(barrel)));

    let mirror = h.clients[index].state().world.actor(imp).unwrap();
    assert_eq!(mirror.position, units(4, 1));
    assert_eq!(mirror.state, ActorState::Death);
    assert_eq!(mirror.health, 0);
}

#[test]
fn test_players_see_each_other_move() {
    let mut h = Harness::new(test_config());
    let mover = h.join("mover");
    let watcher = h.join("watcher");

    let target = units(100, -40);
    h.clients[mover].move_to(target, 0x4000_0000).unwrap();

    assert!(h.wait_for(1000, |h| {
        let world = &h.clients[watcher].state().world;
        world
            .player(0)
            .and_then(|p| p.body)
            .and_then(|id| world.actor(id))
            .is_some_and(|body| body.position == target)
    }));
    let body = h.server.world().player(0).unwrap().body.unwrap();
    assert_eq!(h.server.world().actor(body).unwrap().position, target);
}

#[test]
fn test_dropped_packet_is_recovered() {
    let mut h = Harness::new(test_config());
    let index = h.join("unlucky");
    h.steps(2);

    assert!(h.server.set_packet_loss_for(0, PacketLossSimulation::lossy(100.0)));
    let lost = h.server.spawn_actor(catalog::IMP, units(7, 7)).unwrap();
    h.steps(1);
    assert!(!h.clients[index].state().world.contains(lost));

    h.server.set_packet_loss_for(0, PacketLossSimulation::default());
    let found = h.server.spawn_actor(catalog::DEMON, units(8, 8)).unwrap();

    assert!(h.wait_for(1000, |h| {
        let world = &h.clients[index].state().world;
        world.contains(lost) && world.contains(found)
    }));
    assert_eq!(h.clients[index].held_back(), 0);
    assert!(h.clients[index].stats().missing_requests >= 1);
    assert!(
        h.events
            .iter()
            .any(|e| matches!(e, ServerEvent::PacketsResent { slot: 0, .. }))
    );
    let requested = h.clients[index]
        .drain_events()
        .any(|e| matches!(e, ClientEvent::MissingRequested { .. }));
    assert!(requested);
}

#[test]
fn test_evicted_packet_forces_a_reconnect() {
    let mut h = Harness::new(ServerConfig {
        ring_size: 4,
        ..test_config()
    });
    let index = h.join("far away");
    h.steps(2);

    h.server
        .set_packet_loss_for(0, PacketLossSimulation::lossy(100.0));
    let mut spawned = Vec::new();
    for i in 0..8 {
        spawned.push(h.server.spawn_actor(catalog::CLIP, units(i, 0)).unwrap());
        h.steps(1);
    }
    h.server.set_packet_loss_for(0, PacketLossSimulation::default());
    spawned.push(h.server.spawn_actor(catalog::MEDIKIT, units(9, 0)).unwrap());

    assert!(h.wait_for(1000, |h| {
        h.events.iter().any(|e| {
            matches!(e, ServerEvent::ClientDisconnected { slot: 0, .. })
        })
    }));
    assert!(h.wait_for(2000, |h| {
        *h.clients[index].phase() == ClientPhase::Spawned
            && h.server.connection_state(0) == ConnectionState::Spawned
    }));

    let events: Vec<_> = h.clients[index].drain_events().collect();
    assert!(events.contains(&ClientEvent::Kicked {
        reason: "Too many missed packets.".to_string(),
        reconnect: true
    }));
    assert!(events.contains(&ClientEvent::Reconnecting));
    for id in spawned {
        assert!(h.clients[index].state().world.contains(id));
    }
}

#[test]
fn test_map_change_reauthenticates_everyone() {
    let mut h = Harness::new(test_config());
    let first = h.join("first");
    let second = h.join("second");

    h.server.change_map("MAP02");
    assert_eq!(h.server.connection_state(0), ConnectionState::AuthenticatedButOutdatedMap);

    assert!(h.wait_for(2000, |h| {
        [first, second].iter().all(|&i| {
            h.clients[i].state().world.level.name == "MAP02"
                && *h.clients[i].phase() == ClientPhase::Spawned
        }) && h.server.connection_state(0) == ConnectionState::Spawned
            && h.server.connection_state(1) == ConnectionState::Spawned
    }));
    h.steps(5);

    let expected = visible(h.server.world());
    for index in [first, second] {
        assert_eq!(mirrored(&h.clients[index].state().world), expected);
    }
    assert!(
        h.events
            .iter()
            .any(|e| matches!(e, ServerEvent::MapChanged { map } if map == "MAP02"))
    );
}

#[test]
fn test_ping_is_measured() {
    let mut h = Harness::new(test_config());
    h.join("pinger");
    // One ping goes out per second of ticks; the pong comes straight back.
    assert!(h.wait_for(2000, |h| {
        h.server
            .connections()
            .get(0)
            .is_some_and(|c| c.ping.samples() > 0)
    }));
    assert!(h.server.client_infos()[0].ping_ms < 1000);
}
