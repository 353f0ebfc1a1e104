use glam::IVec3;

use super::{Command, CommandCode, MoveBits, ThingProperty};
use crate::client::{ClientState, SessionNotice};
use crate::world::{
    Actor, ActorFlags, ActorState, Level, NetFlags, NetId, Player, UserInfo, catalog,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    #[error("{command}: unknown actor {id}")]
    UnknownActor { command: CommandCode, id: NetId },
    #[error("{command}: no player in slot {slot}")]
    UnknownPlayer { command: CommandCode, slot: u8 },
    #[error("{command}: no {what} {index}")]
    UnknownIndex {
        command: CommandCode,
        what: &'static str,
        index: u16,
    },
    #[error("{0} is not handled here")]
    Unhandled(CommandCode),
}

pub(super) fn apply_session(command: Command, state: &mut ClientState) -> Result<(), ApplyError> {
    match command {
        Command::ConnectError(error) => state.notify(SessionNotice::ConnectError(error)),
        Command::Authenticate { map } => {
            state.world.change_level(Level::generate(&map));
            state.last_positions.clear();
            state.receiving_snapshot = false;
            state.snapshot_complete = false;
            state.notify(SessionNotice::Authenticate { map });
        }
        Command::MapLoad { game_mode } => {
            state.world.game_mode = game_mode;
            state.notify(SessionNotice::MapLoaded { game_mode });
        }
        Command::Ping { time } => state.notify(SessionNotice::Ping { time }),
        Command::Nothing => {}
        Command::BeginSnapshot => {
            state.receiving_snapshot = true;
            state.snapshot_complete = false;
        }
        Command::EndSnapshot => {
            state.receiving_snapshot = false;
            state.notify(SessionNotice::SnapshotCompleted);
        }
        Command::FullUpdateCompleted => state.snapshot_complete = true,
        Command::Print { level, text } => state.messages.push((level, text)),
        Command::PrintMotd { text } => state.motd = Some(text),
        Command::SetConsolePlayer { slot } => state.console_player = Some(slot),
        Command::SetGameMode { mode } => state.world.game_mode = mode,
        Command::SetMapTime { time } => state.world.map_time = time,
        Command::ConsolePlayerKicked { reason, reconnect } => {
            state.notify(SessionNotice::Kicked { reason, reconnect })
        }
        other => return Err(ApplyError::Unhandled(other.code())),
    }
    Ok(())
}

fn player_mut<'s>(
    state: &'s mut ClientState,
    code: CommandCode,
    slot: u8,
) -> Result<&'s mut Player, ApplyError> {
    state
        .world
        .player_mut(slot)
        .ok_or(ApplyError::UnknownPlayer {
            command: code,
            slot,
        })
}

fn actor_mut<'s>(
    state: &'s mut ClientState,
    code: CommandCode,
    id: NetId,
) -> Result<&'s mut Actor, ApplyError> {
    state
        .world
        .actor_mut(id)
        .ok_or(ApplyError::UnknownActor { command: code, id })
}

fn body_mut(state: &mut ClientState, slot: u8) -> Option<&mut Actor> {
    let body = state.world.player(slot)?.body?;
    state.world.actor_mut(body)
}

pub(super) fn apply_player(command: Command, state: &mut ClientState) -> Result<(), ApplyError> {
    let code = command.code();
    match command {
        Command::SpawnPlayer {
            slot,
            body,
            position,
            angle,
            spectating,
        } => {
            if state.world.player(slot).is_none() {
                state.world.set_player(Player::new(slot, UserInfo::default()));
            }
            let old = state.world.player(slot).and_then(|p| p.body);
            if let Some(old) = old.filter(|old| *old != body) {
                state.world.destroy(old);
                state.last_positions.remove(&old);
            }

            let mut actor = Actor::new(catalog::PLAYER, position);
            actor.angle = angle;
            actor.player = Some(slot);
            state.world.insert(body, actor);
            state.last_positions.insert(body, position);

            let player = player_mut(state, code, slot)?;
            player.body = Some(body);
            player.spectating = spectating;
            player.dead_spectator = false;
            player.health = player.max_health;
        }
        Command::MovePlayer {
            slot,
            position,
            velocity,
            angle,
            pitch,
        } => {
            player_mut(state, code, slot)?;
            if let Some(actor) = body_mut(state, slot) {
                actor.position = position;
                actor.velocity = velocity;
                actor.angle = angle;
                actor.pitch = pitch;
            }
        }
        Command::MoveLocalPlayer {
            tick,
            position,
            velocity,
        } => {
            state.local_tick = tick;
            if let Some(slot) = state.console_player {
                if let Some(actor) = body_mut(state, slot) {
                    actor.position = position;
                    actor.velocity = velocity;
                }
            }
        }
        Command::DamagePlayer {
            slot,
            health,
            armor,
        } => {
            let player = player_mut(state, code, slot)?;
            player.health = health;
            player.armor = armor;
        }
        Command::KillPlayer { slot, health, .. } => {
            player_mut(state, code, slot)?.health = health;
            if let Some(actor) = body_mut(state, slot) {
                actor.health = health;
                actor.state = ActorState::Death;
            }
        }
        Command::SetPlayerHealth { slot, health } => {
            player_mut(state, code, slot)?.health = health;
        }
        Command::SetPlayerMaxHealth { slot, max_health } => {
            player_mut(state, code, slot)?.max_health = max_health;
        }
        Command::SetPlayerUserInfo { slot, flags, info } => {
            player_mut(state, code, slot)?.userinfo.merge(flags, &info);
        }
        Command::SetPlayerFrags { slot, frags } => player_mut(state, code, slot)?.frags = frags,
        Command::SetPlayerPoints { slot, points } => {
            player_mut(state, code, slot)?.points = points
        }
        Command::SetPlayerWins { slot, wins } => player_mut(state, code, slot)?.wins = wins,
        Command::SetPlayerTeam { slot, team } => player_mut(state, code, slot)?.team = team,
        Command::SetPlayerLaggingStatus { slot, lagging } => {
            player_mut(state, code, slot)?.lagging = lagging
        }
        Command::UpdatePlayerPing { slot, ping } => player_mut(state, code, slot)?.ping = ping,
        Command::DisconnectPlayer { slot } => {
            if let Some(player) = state.world.remove_player(slot) {
                if let Some(body) = player.body {
                    state.last_positions.remove(&body);
                }
            }
        }
        Command::PlayerIsSpectator {
            slot,
            dead_spectator,
        } => {
            let player = player_mut(state, code, slot)?;
            player.spectating = true;
            player.dead_spectator = dead_spectator;
        }
        Command::GivePowerup { slot, name, ticks } => {
            player_mut(state, code, slot)?.give_powerup(&name, ticks)
        }
        Command::GiveInventory { slot, name, amount } => {
            player_mut(state, code, slot)?.set_inventory(&name, amount)
        }
        Command::WeaponChange { slot, weapon } => {
            player_mut(state, code, slot)?.weapon = Some(weapon)
        }
        other => return Err(ApplyError::Unhandled(other.code())),
    }
    Ok(())
}

pub(super) fn apply_thing(command: Command, state: &mut ClientState) -> Result<(), ApplyError> {
    let code = command.code();
    match command {
        Command::SpawnThing(spawn) => {
            let actor = Actor::new(spawn.kind, spawn.position);
            match spawn.id {
                Some(id) => {
                    state.world.insert(id, actor);
                    state.last_positions.insert(id, spawn.position);
                }
                None => state.world.spawn_unnamed(actor),
            }
        }
        Command::SpawnMissile {
            id,
            kind,
            position,
            velocity,
            ..
        } => {
            let mut actor = Actor::new(kind, position);
            actor.velocity = velocity;
            state.world.insert(id, actor);
            state.last_positions.insert(id, position);
        }
        Command::MoveThing(mv) => {
            let known = state.last_positions.get(&mv.id).copied();
            let actor = actor_mut(state, code, mv.id)?;
            let previous = known.unwrap_or(actor.position).to_array();

            let incoming = mv.position.to_array();
            let mut position = actor.position.to_array();
            for axis in 0..3 {
                if mv.bits.contains(MoveBits::AXES[axis]) {
                    position[axis] = incoming[axis];
                } else if mv.bits.contains(MoveBits::REUSE[axis]) {
                    position[axis] = previous[axis];
                }
            }
            actor.position = IVec3::from_array(position);

            let incoming = mv.velocity.to_array();
            let mut velocity = actor.velocity.to_array();
            for (axis, bit) in [MoveBits::VELX, MoveBits::VELY, MoveBits::VELZ]
                .iter()
                .enumerate()
            {
                if mv.bits.contains(*bit) {
                    velocity[axis] = incoming[axis];
                }
            }
            actor.velocity = IVec3::from_array(velocity);

            if mv.bits.contains(MoveBits::ANGLE) {
                actor.angle = mv.angle;
            }
            if mv.bits.contains(MoveBits::PITCH) {
                actor.pitch = mv.pitch;
            }
            if mv.bits.contains(MoveBits::MOVEDIR) {
                actor.movedir = mv.movedir;
            }

            let position = actor.position;
            state.last_positions.insert(mv.id, position);
        }
        Command::KillThing { id, health, .. } => {
            let actor = actor_mut(state, code, id)?;
            actor.health = health;
            actor.state = ActorState::Death;
        }
        Command::SetThingState { id, state: next } => {
            let actor = actor_mut(state, code, id)?;
            actor.state = next;
            actor.frame = None;
        }
        Command::SetThingFrame { id, frame } => actor_mut(state, code, id)?.frame = Some(frame),
        Command::DestroyThing { id } => {
            state
                .world
                .destroy(id)
                .ok_or(ApplyError::UnknownActor { command: code, id })?;
            state.last_positions.remove(&id);
        }
        Command::SetThingAngle { id, angle } => actor_mut(state, code, id)?.angle = angle,
        Command::SetThingFlags { id, flags } => actor_mut(state, code, id)?.flags = flags,
        Command::SetThingArguments { id, args } => actor_mut(state, code, id)?.args = args,
        Command::SetThingTid { id, tid } => actor_mut(state, code, id)?.tid = tid,
        Command::SetThingTranslation { id, translation } => {
            actor_mut(state, code, id)?.translation = translation
        }
        Command::SetThingSpawnPoint { id, point } => {
            actor_mut(state, code, id)?.spawn_point = point
        }
        Command::SetThingWaterLevel { id, level } => {
            actor_mut(state, code, id)?.water_level = level
        }
        Command::SetThingProperty { id, property } => {
            let properties = &mut actor_mut(state, code, id)?.properties;
            match property {
                ThingProperty::Speed(speed) => properties.speed = speed,
                ThingProperty::RenderStyle(style) => properties.render_style = style,
                ThingProperty::Alpha(alpha) => properties.alpha = alpha,
            }
        }
        Command::SetThingHealth { id, health } => actor_mut(state, code, id)?.health = health,
        Command::SetThingReactionTime { id, time } => {
            actor_mut(state, code, id)?.reaction_time = time
        }
        Command::ThingIsCorpse { id } => {
            let actor = actor_mut(state, code, id)?;
            actor.flags |= ActorFlags::CORPSE;
            actor.state = ActorState::Death;
            actor.health = actor.health.min(0);
        }
        Command::HideThing { id } => {
            actor_mut(state, code, id)?.net_flags |= NetFlags::HIDDEN_INDEFINITELY
        }
        other => return Err(ApplyError::Unhandled(other.code())),
    }
    Ok(())
}

pub(super) fn apply_sector(command: Command, state: &mut ClientState) -> Result<(), ApplyError> {
    let code = command.code();
    let index = match &command {
        Command::SetSectorFloorPlane { sector, .. }
        | Command::SetSectorCeilingPlane { sector, .. }
        | Command::SetSectorFlat { sector, .. }
        | Command::SetSectorPanning { sector, .. }
        | Command::SetSectorRotation { sector, .. }
        | Command::SetSectorScale { sector, .. }
        | Command::SetSectorColor { sector, .. }
        | Command::SetSectorFade { sector, .. }
        | Command::SetSectorFriction { sector, .. }
        | Command::SetSectorGravity { sector, .. }
        | Command::SetSectorLightLevel { sector, .. }
        | Command::SetSectorReflection { sector, .. }
        | Command::StartLightEffect { sector, .. }
        | Command::StopLightEffect { sector }
        | Command::StartSectorMover { sector, .. }
        | Command::FinishSectorMover { sector } => *sector,
        other => return Err(ApplyError::Unhandled(other.code())),
    };

    let level = &mut state.world.level;
    let sector = level.sector_mut(index).ok_or(ApplyError::UnknownIndex {
        command: code,
        what: "sector",
        index,
    })?;

    match command {
        Command::SetSectorFloorPlane { height, .. } => sector.floor_height = height,
        Command::SetSectorCeilingPlane { height, .. } => sector.ceiling_height = height,
        Command::SetSectorFlat { ceiling, floor, .. } => {
            sector.ceiling_flat = ceiling;
            sector.floor_flat = floor;
        }
        Command::SetSectorPanning { ceiling, floor, .. } => {
            sector.ceiling_panning = ceiling;
            sector.floor_panning = floor;
        }
        Command::SetSectorRotation { ceiling, floor, .. } => {
            sector.ceiling_rotation = ceiling;
            sector.floor_rotation = floor;
        }
        Command::SetSectorScale { ceiling, floor, .. } => {
            sector.ceiling_scale = ceiling;
            sector.floor_scale = floor;
        }
        Command::SetSectorColor {
            color,
            desaturation,
            ..
        } => {
            sector.color = color;
            sector.desaturation = desaturation;
        }
        Command::SetSectorFade { fade, .. } => sector.fade = fade,
        Command::SetSectorFriction {
            friction,
            move_factor,
            ..
        } => {
            sector.friction = friction;
            sector.move_factor = move_factor;
        }
        Command::SetSectorGravity { gravity, .. } => sector.gravity = gravity,
        Command::SetSectorLightLevel { level: light, .. } => sector.light_level = light,
        Command::SetSectorReflection { ceiling, floor, .. } => {
            sector.ceiling_reflection = ceiling;
            sector.floor_reflection = floor;
        }
        Command::StartLightEffect { effect, .. } => sector.light_effect = Some(effect),
        Command::StopLightEffect { .. } => sector.light_effect = None,
        Command::StartSectorMover { mover, .. } => {
            level.movers.insert(index, mover);
        }
        Command::FinishSectorMover { .. } => {
            level.movers.remove(&index);
        }
        other => return Err(ApplyError::Unhandled(other.code())),
    }
    Ok(())
}

pub(super) fn apply_level(command: Command, state: &mut ClientState) -> Result<(), ApplyError> {
    let code = command.code();
    let level = &mut state.world.level;
    let missing = |what: &'static str, index: u16| ApplyError::UnknownIndex {
        command: code,
        what,
        index,
    };

    match command {
        Command::SetLineAlpha { line, alpha } => {
            level.line_mut(line).ok_or(missing("line", line))?.alpha = alpha
        }
        Command::SetLineTexture {
            line,
            side,
            position,
            texture,
        } => {
            let index = level.line_side(line, side).ok_or(missing("line", line))?;
            let side = level.side_mut(index).ok_or(missing("side", index))?;
            side.textures[position as usize] = texture;
        }
        Command::SetSomeLineFlags { line, flags } => {
            level.line_mut(line).ok_or(missing("line", line))?.flags = flags
        }
        Command::SetSideFlags { side, flags } => {
            level.side_mut(side).ok_or(missing("side", side))?.flags = flags
        }
        Command::SetPolyobjPosition { poly, position } => {
            level
                .polyobject_mut(poly)
                .ok_or(missing("polyobject", poly))?
                .position = position
        }
        Command::SetPolyobjRotation { poly, angle } => {
            level
                .polyobject_mut(poly)
                .ok_or(missing("polyobject", poly))?
                .angle = angle
        }
        Command::SetTeamScore { team, score } => {
            let entry = state
                .world
                .team_scores
                .get_mut(team as usize)
                .ok_or(missing("team", team as u16))?;
            *entry = score;
        }
        other => return Err(ApplyError::Unhandled(other.code())),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandRegistry, ThingMove, ThingSpawn};
    use crate::world::FRACUNIT;

    fn state_with_imp() -> (ClientState, NetId) {
        let mut state = ClientState::new();
        let id = NetId(40);
        apply_thing(
            Command::SpawnThing(ThingSpawn {
                id: Some(id),
                kind: catalog::IMP,
                position: IVec3::new(FRACUNIT, 2 * FRACUNIT, 0),
                exact: true,
            }),
            &mut state,
        )
        .unwrap();
        (state, id)
    }

    #[test]
    fn test_reuse_bits_take_the_last_known_value() {
        let (mut state, id) = state_with_imp();

        let mut mv = ThingMove::new(id, MoveBits::X | MoveBits::REUSE_Y);
        mv.position = IVec3::new(10 * FRACUNIT, 0, 0);
        apply_thing(Command::MoveThing(mv), &mut state).unwrap();

        let actor = state.world.actor(id).unwrap();
        assert_eq!(actor.position, IVec3::new(10 * FRACUNIT, 2 * FRACUNIT, 0));
        assert_eq!(state.last_positions[&id], actor.position);
    }

    #[test]
    fn test_unknown_actor_is_reported() {
        let mut state = ClientState::new();
        let err = apply_thing(
            Command::SetThingHealth {
                id: NetId(9),
                health: 5,
            },
            &mut state,
        )
        .unwrap_err();
        assert!(matches!(err, ApplyError::UnknownActor { id: NetId(9), .. }));
    }

    #[test]
    fn test_player_commands_need_a_player() {
        let mut state = ClientState::new();
        let err = apply_player(Command::SetPlayerFrags { slot: 2, frags: 1 }, &mut state)
            .unwrap_err();
        assert!(matches!(err, ApplyError::UnknownPlayer { slot: 2, .. }));

        apply_player(
            Command::SpawnPlayer {
                slot: 2,
                body: NetId(100),
                position: IVec3::ZERO,
                angle: 0,
                spectating: false,
            },
            &mut state,
        )
        .unwrap();
        apply_player(Command::SetPlayerFrags { slot: 2, frags: 1 }, &mut state).unwrap();
        assert_eq!(state.world.player(2).unwrap().frags, 1);
        assert_eq!(state.world.actor(NetId(100)).unwrap().player, Some(2));
    }

    #[test]
    fn test_sector_and_line_changes_land_in_the_level() {
        let registry = CommandRegistry::new().unwrap();
        let mut state = ClientState::new();
        state.world.change_level(Level::generate("MAP01"));

        registry
            .apply(
                Command::SetSectorLightLevel {
                    sector: 0,
                    level: 96,
                },
                &mut state,
            )
            .unwrap();
        assert_eq!(state.world.level.sectors[0].light_level, 96);
        assert!(state.world.level.is_modified());

        let err = registry
            .apply(Command::SetLineAlpha { line: 60000, alpha: 0 }, &mut state)
            .unwrap_err();
        assert!(matches!(err, ApplyError::UnknownIndex { what: "line", .. }));
    }

    #[test]
    fn test_destroy_forgets_the_tracked_position() {
        let (mut state, id) = state_with_imp();
        apply_thing(Command::DestroyThing { id }, &mut state).unwrap();
        assert!(!state.world.contains(id));
        assert!(!state.last_positions.contains_key(&id));
    }

    #[test]
    fn test_idless_effects_fade_on_the_client() {
        let mut state = ClientState::new();
        for _ in 0..10_000 {
            apply_thing(
                Command::SpawnThing(ThingSpawn {
                    id: None,
                    kind: catalog::BULLET_PUFF,
                    position: IVec3::ZERO,
                    exact: false,
                }),
                &mut state,
            )
            .unwrap();
        }
        assert_eq!(state.world.unnamed_count(), crate::world::MAX_UNNAMED);

        for _ in 0..crate::world::UNNAMED_LIFETIME {
            state.advance();
        }
        assert_eq!(state.world.unnamed_count(), 0);
    }
}
