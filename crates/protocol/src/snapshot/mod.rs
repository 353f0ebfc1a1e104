//! The full update a client receives once, right after it requests a
//! snapshot. Building it is a pure function of the world so the server can
//! send it through the bus like any other batch of commands.

use glam::IVec3;

use crate::command::{Command, MoveBits, PrintLevel, ThingMove, ThingProperty, ThingSpawn};
use crate::world::{
    Actor, ActorState, LineSide, NetId, Player, TexturePosition, UserInfoFlags, World, catalog,
};

const TEXTURE_POSITIONS: [TexturePosition; 3] = [
    TexturePosition::Top,
    TexturePosition::Mid,
    TexturePosition::Bottom,
];

/// Server strings shown to a joining client.
#[derive(Debug, Clone, Copy)]
pub struct Welcome<'a> {
    pub host_name: &'a str,
    pub motd: &'a str,
}

/// Every command a freshly joining client in `slot` needs, in send order.
/// The joining player's record (and body, when it has one) must already be
/// in the world.
pub fn full_update(world: &World, slot: u8, welcome: Welcome<'_>) -> Vec<Command> {
    let mut commands = vec![
        Command::BeginSnapshot,
        Command::Print {
            level: PrintLevel::High,
            text: format!("Welcome to {}", welcome.host_name),
        },
        Command::SetConsolePlayer { slot },
        Command::SetGameMode {
            mode: world.game_mode,
        },
    ];
    if !welcome.motd.is_empty() {
        commands.push(Command::PrintMotd {
            text: welcome.motd.to_string(),
        });
    }

    let receiver_spectating = world.player(slot).is_some_and(|p| p.spectating);
    if let Some(player) = world.player(slot) {
        player_commands(world, player, false, &mut commands);
    }

    level_commands(world, &mut commands);

    for player in world.players().filter(|p| p.slot != slot) {
        player_commands(world, player, receiver_spectating, &mut commands);
    }

    if world.game_mode.uses_teams() {
        for (team, score) in world.team_scores.iter().enumerate() {
            commands.push(Command::SetTeamScore {
                team: team as u8,
                score: *score,
            });
        }
    }

    for player in world.players() {
        score_commands(world, player, &mut commands);
    }

    commands.push(Command::SetMapTime {
        time: world.map_time,
    });

    for actor in world.actors().filter(|a| is_replicated(a)) {
        actor_commands(actor, &mut commands);
    }

    commands.push(Command::FullUpdateCompleted);
    commands.push(Command::EndSnapshot);
    commands
}

/// Actors a joining client is told about. Player bodies travel with
/// `SpawnPlayer`; held items, client-side effects, finished deaths and
/// hidden actors are left out.
pub fn is_replicated(actor: &Actor) -> bool {
    actor.player.is_none()
        && actor.owner.is_none()
        && !actor.is_client_spawned()
        && !actor.is_hidden()
        && (!actor.is_dead() || actor.is_corpse())
}

fn player_commands(world: &World, player: &Player, with_weapon: bool, out: &mut Vec<Command>) {
    let slot = player.slot;
    if let Some(body) = player.body.and_then(|id| world.actor(id)) {
        out.push(Command::SpawnPlayer {
            slot,
            body: body.net_id.unwrap_or(NetId(0)),
            position: body.position,
            angle: body.angle,
            spectating: player.spectating,
        });
    }
    out.push(Command::SetPlayerUserInfo {
        slot,
        flags: UserInfoFlags::all(),
        info: player.userinfo.clone(),
    });
    if world.game_mode.uses_teams() {
        out.push(Command::SetPlayerTeam {
            slot,
            team: player.team,
        });
    }
    if player.spectating {
        out.push(Command::PlayerIsSpectator {
            slot,
            dead_spectator: player.dead_spectator,
        });
    }
    if player.max_health != 100 {
        out.push(Command::SetPlayerMaxHealth {
            slot,
            max_health: player.max_health,
        });
    }
    for powerup in &player.powerups {
        out.push(Command::GivePowerup {
            slot,
            name: powerup.name.clone(),
            ticks: powerup.ticks,
        });
    }
    for item in &player.inventory {
        out.push(Command::GiveInventory {
            slot,
            name: item.name.clone(),
            amount: item.amount,
        });
    }
    if player.is_dead() {
        out.push(Command::KillPlayer {
            slot,
            source: None,
            health: player.health,
        });
    } else {
        out.push(Command::SetPlayerHealth {
            slot,
            health: player.health,
        });
    }
    if with_weapon {
        if let Some(weapon) = &player.weapon {
            out.push(Command::WeaponChange {
                slot,
                weapon: weapon.clone(),
            });
        }
    }
    if player.lagging {
        out.push(Command::SetPlayerLaggingStatus {
            slot,
            lagging: true,
        });
    }
}

fn score_commands(world: &World, player: &Player, out: &mut Vec<Command>) {
    let slot = player.slot;
    out.push(Command::SetPlayerFrags {
        slot,
        frags: player.frags,
    });
    if world.game_mode.uses_points() {
        out.push(Command::SetPlayerPoints {
            slot,
            points: player.points,
        });
    }
    if world.game_mode.uses_wins() {
        out.push(Command::SetPlayerWins {
            slot,
            wins: player.wins,
        });
    }
}

/// Only what differs from the level as loaded goes out.
fn level_commands(world: &World, out: &mut Vec<Command>) {
    let level = &world.level;

    for (index, line) in level.lines.iter().enumerate() {
        let index = index as u16;
        let Some(default) = level.default_line(index) else {
            continue;
        };
        if line.alpha != default.alpha {
            out.push(Command::SetLineAlpha {
                line: index,
                alpha: line.alpha,
            });
        }
        if line.flags != default.flags {
            out.push(Command::SetSomeLineFlags {
                line: index,
                flags: line.flags,
            });
        }
        for side in [LineSide::Front, LineSide::Back] {
            let Some(side_index) = level.line_side(index, side) else {
                continue;
            };
            let (Some(current), Some(default)) = (
                level.sides.get(side_index as usize),
                level.default_side(side_index),
            ) else {
                continue;
            };
            for position in TEXTURE_POSITIONS {
                let texture = &current.textures[position as usize];
                if *texture != default.textures[position as usize] {
                    out.push(Command::SetLineTexture {
                        line: index,
                        side,
                        position,
                        texture: texture.clone(),
                    });
                }
            }
        }
    }

    for (index, side) in level.sides.iter().enumerate() {
        let index = index as u16;
        if level.default_side(index).is_some_and(|d| d.flags != side.flags) {
            out.push(Command::SetSideFlags {
                side: index,
                flags: side.flags,
            });
        }
    }

    for (index, sector) in level.sectors.iter().enumerate() {
        let index = index as u16;
        let Some(default) = level.default_sector(index) else {
            continue;
        };
        if sector.floor_height != default.floor_height {
            out.push(Command::SetSectorFloorPlane {
                sector: index,
                height: sector.floor_height,
            });
        }
        if sector.ceiling_height != default.ceiling_height {
            out.push(Command::SetSectorCeilingPlane {
                sector: index,
                height: sector.ceiling_height,
            });
        }
        if sector.floor_flat != default.floor_flat || sector.ceiling_flat != default.ceiling_flat {
            out.push(Command::SetSectorFlat {
                sector: index,
                ceiling: sector.ceiling_flat.clone(),
                floor: sector.floor_flat.clone(),
            });
        }
        if sector.floor_panning != default.floor_panning
            || sector.ceiling_panning != default.ceiling_panning
        {
            out.push(Command::SetSectorPanning {
                sector: index,
                ceiling: sector.ceiling_panning,
                floor: sector.floor_panning,
            });
        }
        if sector.floor_rotation != default.floor_rotation
            || sector.ceiling_rotation != default.ceiling_rotation
        {
            out.push(Command::SetSectorRotation {
                sector: index,
                ceiling: sector.ceiling_rotation,
                floor: sector.floor_rotation,
            });
        }
        if sector.floor_scale != default.floor_scale || sector.ceiling_scale != default.ceiling_scale
        {
            out.push(Command::SetSectorScale {
                sector: index,
                ceiling: sector.ceiling_scale,
                floor: sector.floor_scale,
            });
        }
        if sector.color != default.color || sector.desaturation != default.desaturation {
            out.push(Command::SetSectorColor {
                sector: index,
                color: sector.color,
                desaturation: sector.desaturation,
            });
        }
        if sector.fade != default.fade {
            out.push(Command::SetSectorFade {
                sector: index,
                fade: sector.fade,
            });
        }
        if sector.friction != default.friction || sector.move_factor != default.move_factor {
            out.push(Command::SetSectorFriction {
                sector: index,
                friction: sector.friction,
                move_factor: sector.move_factor,
            });
        }
        if sector.gravity != default.gravity {
            out.push(Command::SetSectorGravity {
                sector: index,
                gravity: sector.gravity,
            });
        }
        if sector.light_level != default.light_level {
            out.push(Command::SetSectorLightLevel {
                sector: index,
                level: sector.light_level,
            });
        }
        if sector.floor_reflection != default.floor_reflection
            || sector.ceiling_reflection != default.ceiling_reflection
        {
            out.push(Command::SetSectorReflection {
                sector: index,
                ceiling: sector.ceiling_reflection,
                floor: sector.floor_reflection,
            });
        }
        if sector.light_effect != default.light_effect {
            out.push(match sector.light_effect {
                Some(effect) => Command::StartLightEffect {
                    sector: index,
                    effect,
                },
                None => Command::StopLightEffect { sector: index },
            });
        }
    }

    for (index, poly) in level.polyobjects.iter().enumerate() {
        let index = index as u16;
        let Some(default) = level.default_polyobject(index) else {
            continue;
        };
        if poly.position != default.position {
            out.push(Command::SetPolyobjPosition {
                poly: index,
                position: poly.position,
            });
        }
        if poly.angle != default.angle {
            out.push(Command::SetPolyobjRotation {
                poly: index,
                angle: poly.angle,
            });
        }
    }

    for (sector, mover) in &level.movers {
        out.push(Command::StartSectorMover {
            sector: *sector,
            mover: *mover,
        });
    }
}

fn actor_commands(actor: &Actor, out: &mut Vec<Command>) {
    let Some(id) = actor.net_id else {
        return;
    };

    if actor.is_missile() {
        out.push(Command::SpawnMissile {
            id,
            kind: actor.kind,
            position: actor.position,
            velocity: actor.velocity,
            target: None,
        });
    } else {
        out.push(Command::SpawnThing(ThingSpawn {
            id: Some(id),
            kind: actor.kind,
            position: actor.position,
            exact: true,
        }));
    }

    let mut bits = MoveBits::empty();
    if !actor.is_missile() && actor.velocity != IVec3::ZERO {
        bits |= MoveBits::VELOCITY;
    }
    if actor.pitch != 0 {
        bits |= MoveBits::PITCH;
    }
    if actor.movedir != 0 {
        bits |= MoveBits::MOVEDIR;
    }
    if !bits.is_empty() {
        let mut mv = ThingMove::new(id, bits);
        mv.velocity = actor.velocity;
        mv.pitch = actor.pitch;
        mv.movedir = actor.movedir;
        mv.exact = true;
        out.push(Command::MoveThing(mv));
    }
    if actor.angle != 0 {
        out.push(Command::SetThingAngle {
            id,
            angle: actor.angle,
        });
    }

    if actor.has_custom_flags() {
        out.push(Command::SetThingFlags {
            id,
            flags: actor.flags,
        });
    }
    let class = catalog::class(actor.kind);
    if actor.properties.speed != class.speed {
        out.push(Command::SetThingProperty {
            id,
            property: ThingProperty::Speed(actor.properties.speed),
        });
    }
    if actor.properties.render_style != class.render_style {
        out.push(Command::SetThingProperty {
            id,
            property: ThingProperty::RenderStyle(actor.properties.render_style),
        });
    }
    if actor.properties.alpha != class.alpha {
        out.push(Command::SetThingProperty {
            id,
            property: ThingProperty::Alpha(actor.properties.alpha),
        });
    }
    if actor.health != class.health {
        out.push(Command::SetThingHealth {
            id,
            health: actor.health,
        });
    }

    if actor.is_corpse() {
        out.push(Command::ThingIsCorpse { id });
    } else if actor.state != ActorState::Spawn {
        out.push(Command::SetThingState {
            id,
            state: actor.state,
        });
    }
    if let Some(frame) = &actor.frame {
        out.push(Command::SetThingFrame {
            id,
            frame: frame.clone(),
        });
    }

    if actor.args != [0; 5] {
        out.push(Command::SetThingArguments {
            id,
            args: actor.args,
        });
    }
    if actor.tid != 0 {
        out.push(Command::SetThingTid { id, tid: actor.tid });
    }
    if actor.translation != 0 {
        out.push(Command::SetThingTranslation {
            id,
            translation: actor.translation,
        });
    }
    if actor.spawn_point != actor.position {
        out.push(Command::SetThingSpawnPoint {
            id,
            point: actor.spawn_point,
        });
    }
    if actor.water_level != 0 {
        out.push(Command::SetThingWaterLevel {
            id,
            level: actor.water_level,
        });
    }
    if actor.reaction_time != 0 {
        out.push(Command::SetThingReactionTime {
            id,
            time: actor.reaction_time,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientState;
    use crate::command::CommandRegistry;
    use crate::world::{
        ActorFlags, FRACUNIT, GameMode, Level, LightEffect, UserInfo,
    };

    const WELCOME: Welcome<'static> = Welcome {
        host_name: "test host",
        motd: "be nice",
    };

    fn joined_world() -> World {
        let mut world = World::new(Level::generate("MAP01"), GameMode::Cooperative);
        world.set_player(Player::new(0, UserInfo::default()));
        world.spawn_player_body(0, IVec3::new(64 * FRACUNIT, 0, 0));
        world
    }

    fn replay(world: &World, commands: Vec<Command>) -> ClientState {
        let registry = CommandRegistry::new().unwrap();
        let mut state = ClientState::new();
        state.world.change_level(Level::generate(&world.level.name));
        for command in commands {
            registry.apply(command, &mut state).unwrap();
        }
        state
    }

    #[test]
    fn test_first_joiner_gets_an_empty_world() {
        let world = joined_world();
        let commands = full_update(&world, 0, WELCOME);

        assert_eq!(commands.first(), Some(&Command::BeginSnapshot));
        assert_eq!(commands.last(), Some(&Command::EndSnapshot));
        assert!(commands.contains(&Command::SetConsolePlayer { slot: 0 }));
        assert!(commands.contains(&Command::PrintMotd {
            text: "be nice".into()
        }));
        assert_eq!(
            commands
                .iter()
                .filter(|c| matches!(c, Command::SpawnPlayer { .. }))
                .count(),
            1
        );
        assert!(!commands.iter().any(|c| matches!(c, Command::SpawnThing(_))));
    }

    #[test]
    fn test_bracketing_order() {
        let world = joined_world();
        let commands = full_update(&world, 0, WELCOME);
        let position = |wanted: &Command| commands.iter().position(|c| c == wanted).unwrap();

        assert!(position(&Command::SetConsolePlayer { slot: 0 }) < 4);
        assert_eq!(
            position(&Command::FullUpdateCompleted),
            commands.len() - 2
        );
    }

    #[test]
    fn test_skips_what_clients_do_not_need() {
        let mut world = joined_world();
        let puff = world.spawn(catalog::BULLET_PUFF, IVec3::ZERO).unwrap();
        let hidden = world.spawn(catalog::IMP, IVec3::ZERO).unwrap();
        world.actor_mut(hidden).unwrap().net_flags |= crate::world::NetFlags::HIDDEN_INDEFINITELY;
        let dying = world.spawn(catalog::ZOMBIEMAN, IVec3::ZERO).unwrap();
        world.actor_mut(dying).unwrap().health = 0;
        let corpse = world.spawn(catalog::DEMON, IVec3::ZERO).unwrap();
        {
            let actor = world.actor_mut(corpse).unwrap();
            actor.health = 0;
            actor.flags |= ActorFlags::CORPSE;
        }

        let commands = full_update(&world, 0, WELCOME);
        let spawned: Vec<NetId> = commands
            .iter()
            .filter_map(|c| match c {
                Command::SpawnThing(spawn) => spawn.id,
                _ => None,
            })
            .collect();
        assert_eq!(spawned, vec![corpse]);
        assert!(!spawned.contains(&puff));
        assert!(commands.contains(&Command::ThingIsCorpse { id: corpse }));
    }

    #[test]
    fn test_replay_reproduces_the_world() {
        let mut world = joined_world();
        world.set_player(Player::new(3, UserInfo {
            name: "other".into(),
            ..UserInfo::default()
        }));
        world.spawn_player_body(3, IVec3::new(0, 128 * FRACUNIT, 0));
        world.player_mut(3).unwrap().frags = 7;

        let imp = world.spawn(catalog::IMP, IVec3::new(5 * FRACUNIT + 3, 0, 0)).unwrap();
        {
            let actor = world.actor_mut(imp).unwrap();
            actor.angle = 1 << 30;
            actor.velocity = IVec3::new(FRACUNIT, 0, 0);
            actor.tid = 12;
            actor.health = 20;
            actor.flags |= ActorFlags::DORMANT;
        }
        world.level.sectors[1].light_level = 32;
        world.level.sectors[2].light_effect = Some(LightEffect::Glow { max: 200, min: 80 });
        world.level.lines[0].alpha = FRACUNIT / 2;
        world.map_time = 4000;

        let state = replay(&world, full_update(&world, 0, WELCOME));

        assert!(state.snapshot_complete);
        assert_eq!(state.console_player, Some(0));
        assert_eq!(state.world.map_time, 4000);
        assert_eq!(state.world.level.sectors, world.level.sectors);
        assert_eq!(state.world.level.lines, world.level.lines);
        assert_eq!(state.world.player(3).unwrap().frags, 7);
        assert_eq!(state.world.player(3).unwrap().userinfo.name, "other");

        let mirrored = state.world.actor(imp).unwrap();
        let original = world.actor(imp).unwrap();
        assert_eq!(mirrored.position, original.position);
        assert_eq!(mirrored.velocity, original.velocity);
        assert_eq!(mirrored.angle, original.angle);
        assert_eq!(mirrored.flags, original.flags);
        assert_eq!(mirrored.health, 20);
        assert_eq!(mirrored.tid, 12);

        let ids: Vec<_> = world.actors().filter_map(|a| a.net_id).collect();
        let mirrored_ids: Vec<_> = state.world.actors().filter_map(|a| a.net_id).collect();
        assert_eq!(ids, mirrored_ids);
    }
}
