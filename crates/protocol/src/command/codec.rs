use glam::{IVec2, IVec3};

use super::{
    Command, CommandCode, ExtendedOpcode, MoveBits, Opcode, PrintLevel, ThingMove, ThingProperty,
    ThingSpawn,
};
use crate::net::{ConnectionError, PacketBuffer, PacketReader};
use crate::world::{
    ActorFlags, ActorKind, ActorState, FrameOverride, GameMode, LightEffect, LineSide,
    MoverKind, NO_TEAM, NetId, RenderStyle, SectorMover, TexturePosition, UserInfo, UserInfoFlags,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    #[error("unknown extended opcode {0}")]
    UnknownExtendedOpcode(u8),
    #[error("{0} is truncated")]
    Truncated(CommandCode),
    #[error("{command} carries an invalid {field}")]
    InvalidField {
        command: CommandCode,
        field: &'static str,
    },
    #[error("no handler registered for {0}")]
    Unregistered(CommandCode),
}

/// Checked field reads over a `PacketReader`. The raw reader answers
/// past-the-end reads with a sentinel; a command must not, so every read
/// first checks the remaining length.
pub(crate) struct Fields<'r, 'a> {
    reader: &'r mut PacketReader<'a>,
    code: CommandCode,
}

impl<'r, 'a> Fields<'r, 'a> {
    pub(crate) fn new(reader: &'r mut PacketReader<'a>, code: CommandCode) -> Self {
        Self { reader, code }
    }

    pub(crate) fn code(&self) -> CommandCode {
        self.code
    }

    fn need(&self, size: usize) -> Result<(), DecodeError> {
        if self.reader.remaining() < size {
            return Err(DecodeError::Truncated(self.code));
        }
        Ok(())
    }

    pub(crate) fn invalid(&self, field: &'static str) -> DecodeError {
        DecodeError::InvalidField {
            command: self.code,
            field,
        }
    }

    pub(crate) fn byte(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        Ok(self.reader.read_byte() as u8)
    }

    pub(crate) fn bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.byte()? != 0)
    }

    pub(crate) fn short(&mut self) -> Result<i16, DecodeError> {
        self.need(2)?;
        Ok(self.reader.read_short() as i16)
    }

    /// Unsigned 16-bit index sent as a short.
    pub(crate) fn index(&mut self) -> Result<u16, DecodeError> {
        Ok(self.short()? as u16)
    }

    pub(crate) fn long(&mut self) -> Result<i32, DecodeError> {
        self.need(4)?;
        Ok(self.reader.read_long())
    }

    pub(crate) fn float(&mut self) -> Result<f32, DecodeError> {
        self.need(4)?;
        Ok(self.reader.read_float())
    }

    pub(crate) fn string(&mut self) -> Result<String, DecodeError> {
        self.need(1)?;
        Ok(self.reader.read_string())
    }

    pub(crate) fn net_id(&mut self) -> Result<NetId, DecodeError> {
        let raw = self.short()?;
        NetId::from_wire(raw as i32).ok_or_else(|| self.invalid("net id"))
    }

    pub(crate) fn optional_net_id(&mut self) -> Result<Option<NetId>, DecodeError> {
        Ok(NetId::from_wire(self.short()? as i32))
    }

    pub(crate) fn long_vec3(&mut self) -> Result<IVec3, DecodeError> {
        Ok(IVec3::new(self.long()?, self.long()?, self.long()?))
    }

    pub(crate) fn long_vec2(&mut self) -> Result<IVec2, DecodeError> {
        Ok(IVec2::new(self.long()?, self.long()?))
    }

    /// Whole map units sent as shorts, widened back to 16.16.
    pub(crate) fn coarse(&mut self) -> Result<i32, DecodeError> {
        Ok((self.short()? as i32) << 16)
    }

    fn rgb(&mut self) -> Result<[u8; 3], DecodeError> {
        Ok([self.byte()?, self.byte()?, self.byte()?])
    }
}

/// Drops the fractional part the way a coarse (short) coordinate does.
pub fn coarse(value: i32) -> i32 {
    (value >> 16) << 16
}

fn write_coarse(buf: &mut PacketBuffer, value: i32) {
    buf.write_short((value >> 16) as i16);
}

fn write_vec3(buf: &mut PacketBuffer, value: IVec3) {
    buf.write_long(value.x);
    buf.write_long(value.y);
    buf.write_long(value.z);
}

fn write_vec2(buf: &mut PacketBuffer, value: IVec2) {
    buf.write_long(value.x);
    buf.write_long(value.y);
}

fn write_index(buf: &mut PacketBuffer, index: u16) {
    buf.write_short(index as i16);
}

fn write_id(buf: &mut PacketBuffer, id: NetId) {
    buf.write_short(NetId::to_wire(Some(id)));
}

/// Writes the userinfo fields selected by `flags`, preceded by the flags.
/// Shared by `SetPlayerUserInfo` and the client's userinfo messages.
pub fn write_userinfo(buf: &mut PacketBuffer, flags: UserInfoFlags, info: &UserInfo) {
    buf.write_short(flags.bits() as i16);
    if flags.contains(UserInfoFlags::NAME) {
        buf.write_string(&info.name);
    }
    if flags.contains(UserInfoFlags::GENDER) {
        buf.write_byte(info.gender);
    }
    if flags.contains(UserInfoFlags::COLOR) {
        buf.write_long(info.color);
    }
    if flags.contains(UserInfoFlags::AIM_DISTANCE) {
        buf.write_long(info.aim_distance);
    }
    if flags.contains(UserInfoFlags::SKIN) {
        buf.write_string(&info.skin);
    }
    if flags.contains(UserInfoFlags::RAIL_COLOR) {
        buf.write_long(info.rail_color);
    }
    if flags.contains(UserInfoFlags::HANDICAP) {
        buf.write_byte(info.handicap);
    }
    if flags.contains(UserInfoFlags::PLAYER_CLASS) {
        buf.write_string(&info.player_class);
    }
}

/// Reads a userinfo block. Fields absent from the flags keep their defaults.
pub(crate) fn read_userinfo(
    fields: &mut Fields<'_, '_>,
) -> Result<(UserInfoFlags, UserInfo), DecodeError> {
    let flags = UserInfoFlags::from_bits_truncate(fields.short()? as u16);
    let mut info = UserInfo::default();
    if flags.contains(UserInfoFlags::NAME) {
        info.name = fields.string()?;
    }
    if flags.contains(UserInfoFlags::GENDER) {
        info.gender = fields.byte()?;
    }
    if flags.contains(UserInfoFlags::COLOR) {
        info.color = fields.long()?;
    }
    if flags.contains(UserInfoFlags::AIM_DISTANCE) {
        info.aim_distance = fields.long()?;
    }
    if flags.contains(UserInfoFlags::SKIN) {
        info.skin = fields.string()?;
    }
    if flags.contains(UserInfoFlags::RAIL_COLOR) {
        info.rail_color = fields.long()?;
    }
    if flags.contains(UserInfoFlags::HANDICAP) {
        info.handicap = fields.byte()?;
    }
    if flags.contains(UserInfoFlags::PLAYER_CLASS) {
        info.player_class = fields.string()?;
    }
    Ok((flags, info))
}

/// Reads a userinfo block straight from a client message. The block has the
/// `SetPlayerUserInfo` layout minus the slot.
pub fn decode_userinfo(
    reader: &mut PacketReader<'_>,
) -> Result<(UserInfoFlags, UserInfo), DecodeError> {
    let code = CommandCode::Base(Opcode::SetPlayerUserInfo);
    read_userinfo(&mut Fields::new(reader, code))
}

/// Reads the opcode (and extended opcode) that starts the next command.
pub fn read_code(reader: &mut PacketReader<'_>) -> Result<Option<CommandCode>, DecodeError> {
    if reader.is_exhausted() {
        return Ok(None);
    }
    let byte = reader.read_byte() as u8;
    let op = Opcode::from_byte(byte).ok_or(DecodeError::UnknownOpcode(byte))?;
    if op != Opcode::Extended {
        return Ok(Some(CommandCode::Base(op)));
    }
    if reader.is_exhausted() {
        return Err(DecodeError::Truncated(CommandCode::Base(Opcode::Extended)));
    }
    let byte = reader.read_byte() as u8;
    ExtendedOpcode::from_byte(byte)
        .map(|op| Some(CommandCode::Extended(op)))
        .ok_or(DecodeError::UnknownExtendedOpcode(byte))
}

impl Command {
    /// Appends opcode and fields to `buf`.
    pub fn encode(&self, buf: &mut PacketBuffer) {
        match self.code() {
            CommandCode::Base(op) => buf.write_byte(op as u8),
            CommandCode::Extended(op) => {
                buf.write_byte(Opcode::Extended as u8);
                buf.write_byte(op as u8);
            }
        }

        match self {
            Self::ConnectError(error) => {
                buf.write_byte(error.code());
                match error {
                    ConnectionError::WrongVersion { server_version } => {
                        buf.write_string(server_version)
                    }
                    ConnectionError::Banned { reason, expires } => {
                        buf.write_string(reason);
                        buf.write_long(*expires);
                    }
                    _ => {}
                }
            }
            Self::Authenticate { map } => buf.write_string(map),
            Self::MapLoad { game_mode } => buf.write_byte(*game_mode as u8),
            Self::Ping { time } => buf.write_long(*time),
            Self::Nothing | Self::BeginSnapshot | Self::EndSnapshot | Self::FullUpdateCompleted => {}
            Self::Print { level, text } => {
                buf.write_byte(*level as u8);
                buf.write_string(text);
            }
            Self::PrintMotd { text } => buf.write_string(text),
            Self::SetConsolePlayer { slot } => buf.write_byte(*slot),
            Self::SetGameMode { mode } => buf.write_byte(*mode as u8),
            Self::SetMapTime { time } => buf.write_long(*time as i32),
            Self::ConsolePlayerKicked { reason, reconnect } => {
                buf.write_string(reason);
                buf.write_bool(*reconnect);
            }

            Self::SpawnPlayer {
                slot,
                body,
                position,
                angle,
                spectating,
            } => {
                buf.write_byte(*slot);
                write_id(buf, *body);
                write_vec3(buf, *position);
                buf.write_long(*angle as i32);
                buf.write_bool(*spectating);
            }
            Self::MovePlayer {
                slot,
                position,
                velocity,
                angle,
                pitch,
            } => {
                buf.write_byte(*slot);
                write_vec3(buf, *position);
                write_vec3(buf, *velocity);
                buf.write_long(*angle as i32);
                buf.write_long(*pitch);
            }
            Self::MoveLocalPlayer {
                tick,
                position,
                velocity,
            } => {
                buf.write_long(*tick as i32);
                write_vec3(buf, *position);
                write_vec3(buf, *velocity);
            }
            Self::DamagePlayer {
                slot,
                health,
                armor,
            } => {
                buf.write_byte(*slot);
                buf.write_short(*health as i16);
                buf.write_short(*armor as i16);
            }
            Self::KillPlayer {
                slot,
                source,
                health,
            } => {
                buf.write_byte(*slot);
                buf.write_short(NetId::to_wire(*source));
                buf.write_short(*health as i16);
            }
            Self::SetPlayerHealth { slot, health } => {
                buf.write_byte(*slot);
                buf.write_short(*health as i16);
            }
            Self::SetPlayerMaxHealth { slot, max_health } => {
                buf.write_byte(*slot);
                buf.write_short(*max_health as i16);
            }
            Self::SetPlayerUserInfo { slot, flags, info } => {
                buf.write_byte(*slot);
                write_userinfo(buf, *flags, info);
            }
            Self::SetPlayerFrags { slot, frags: value }
            | Self::SetPlayerPoints {
                slot,
                points: value,
            }
            | Self::SetPlayerWins { slot, wins: value } => {
                buf.write_byte(*slot);
                buf.write_long(*value);
            }
            Self::SetPlayerTeam { slot, team } => {
                buf.write_byte(*slot);
                buf.write_byte(team.unwrap_or(NO_TEAM));
            }
            Self::SetPlayerLaggingStatus { slot, lagging } => {
                buf.write_byte(*slot);
                buf.write_bool(*lagging);
            }
            Self::UpdatePlayerPing { slot, ping } => {
                buf.write_byte(*slot);
                buf.write_short(*ping as i16);
            }
            Self::DisconnectPlayer { slot } => buf.write_byte(*slot),
            Self::PlayerIsSpectator {
                slot,
                dead_spectator,
            } => {
                buf.write_byte(*slot);
                buf.write_bool(*dead_spectator);
            }
            Self::GivePowerup { slot, name, ticks } => {
                buf.write_byte(*slot);
                buf.write_string(name);
                buf.write_long(*ticks);
            }
            Self::GiveInventory { slot, name, amount } => {
                buf.write_byte(*slot);
                buf.write_string(name);
                buf.write_long(*amount);
            }
            Self::WeaponChange { slot, weapon } => {
                buf.write_byte(*slot);
                buf.write_string(weapon);
            }

            Self::SpawnThing(spawn) => encode_spawn(buf, spawn),
            Self::SpawnMissile {
                id,
                kind,
                position,
                velocity,
                target,
            } => {
                write_vec3(buf, *position);
                write_vec3(buf, *velocity);
                buf.write_short(kind.0 as i16);
                write_id(buf, *id);
                buf.write_short(NetId::to_wire(*target));
            }
            Self::MoveThing(mv) => encode_move(buf, mv),
            Self::KillThing { id, health, source } => {
                write_id(buf, *id);
                buf.write_short(*health as i16);
                buf.write_short(NetId::to_wire(*source));
            }
            Self::SetThingState { id, state } => {
                write_id(buf, *id);
                buf.write_byte(*state as u8);
            }
            Self::SetThingFrame { id, frame } => {
                write_id(buf, *id);
                buf.write_string(&frame.label);
                buf.write_byte(frame.offset);
            }
            Self::DestroyThing { id } | Self::ThingIsCorpse { id } | Self::HideThing { id } => {
                write_id(buf, *id)
            }
            Self::SetThingAngle { id, angle } => {
                write_id(buf, *id);
                buf.write_long(*angle as i32);
            }
            Self::SetThingFlags { id, flags } => {
                write_id(buf, *id);
                buf.write_long(flags.bits() as i32);
            }
            Self::SetThingArguments { id, args } => {
                write_id(buf, *id);
                for arg in args {
                    buf.write_long(*arg);
                }
            }
            Self::SetThingTid { id, tid: value }
            | Self::SetThingTranslation {
                id,
                translation: value,
            }
            | Self::SetThingHealth { id, health: value } => {
                write_id(buf, *id);
                buf.write_long(*value);
            }
            Self::SetThingSpawnPoint { id, point } => {
                write_id(buf, *id);
                write_vec3(buf, *point);
            }
            Self::SetThingWaterLevel { id, level } => {
                write_id(buf, *id);
                buf.write_byte(*level);
            }
            Self::SetThingProperty { id, property } => {
                write_id(buf, *id);
                match property {
                    ThingProperty::Speed(speed) => {
                        buf.write_byte(0);
                        buf.write_long(*speed);
                    }
                    ThingProperty::RenderStyle(style) => {
                        buf.write_byte(1);
                        buf.write_byte(*style as u8);
                    }
                    ThingProperty::Alpha(alpha) => {
                        buf.write_byte(2);
                        buf.write_long(*alpha);
                    }
                }
            }
            Self::SetThingReactionTime { id, time } => {
                write_id(buf, *id);
                buf.write_short(*time as i16);
            }

            Self::SetSectorFloorPlane { sector, height }
            | Self::SetSectorCeilingPlane { sector, height } => {
                write_index(buf, *sector);
                buf.write_long(*height);
            }
            Self::SetSectorFlat {
                sector,
                ceiling,
                floor,
            } => {
                write_index(buf, *sector);
                buf.write_string(ceiling);
                buf.write_string(floor);
            }
            Self::SetSectorPanning {
                sector,
                ceiling,
                floor,
            }
            | Self::SetSectorScale {
                sector,
                ceiling,
                floor,
            } => {
                write_index(buf, *sector);
                write_vec2(buf, *ceiling);
                write_vec2(buf, *floor);
            }
            Self::SetSectorRotation {
                sector,
                ceiling,
                floor,
            }
            | Self::SetSectorFriction {
                sector,
                friction: ceiling,
                move_factor: floor,
            } => {
                write_index(buf, *sector);
                buf.write_long(*ceiling);
                buf.write_long(*floor);
            }
            Self::SetSectorColor {
                sector,
                color,
                desaturation,
            } => {
                write_index(buf, *sector);
                for channel in color {
                    buf.write_byte(*channel);
                }
                buf.write_byte(*desaturation);
            }
            Self::SetSectorFade { sector, fade } => {
                write_index(buf, *sector);
                for channel in fade {
                    buf.write_byte(*channel);
                }
            }
            Self::SetSectorGravity { sector, gravity } => {
                write_index(buf, *sector);
                buf.write_float(*gravity);
            }
            Self::SetSectorLightLevel { sector, level } => {
                write_index(buf, *sector);
                buf.write_short(*level);
            }
            Self::SetSectorReflection {
                sector,
                ceiling,
                floor,
            } => {
                write_index(buf, *sector);
                buf.write_float(*ceiling);
                buf.write_float(*floor);
            }
            Self::StartLightEffect { sector, effect } => {
                write_index(buf, *sector);
                encode_light(buf, effect);
            }
            Self::StopLightEffect { sector } | Self::FinishSectorMover { sector } => {
                write_index(buf, *sector)
            }
            Self::StartSectorMover { sector, mover } => {
                write_index(buf, *sector);
                buf.write_byte(mover.kind as u8);
                buf.write_byte(mover.direction as u8);
                buf.write_long(mover.speed);
                buf.write_long(mover.destination);
            }

            Self::SetLineAlpha { line, alpha } => {
                write_index(buf, *line);
                buf.write_long(*alpha);
            }
            Self::SetLineTexture {
                line,
                side,
                position,
                texture,
            } => {
                write_index(buf, *line);
                buf.write_byte(*side as u8);
                buf.write_byte(*position as u8);
                buf.write_string(texture);
            }
            Self::SetSomeLineFlags { line, flags } => {
                write_index(buf, *line);
                write_index(buf, *flags);
            }
            Self::SetSideFlags { side, flags } => {
                write_index(buf, *side);
                buf.write_byte(*flags);
            }
            Self::SetPolyobjPosition { poly, position } => {
                write_index(buf, *poly);
                write_vec2(buf, *position);
            }
            Self::SetPolyobjRotation { poly, angle } => {
                write_index(buf, *poly);
                buf.write_long(*angle);
            }
            Self::SetTeamScore { team, score } => {
                buf.write_byte(*team);
                buf.write_long(*score);
            }
        }
    }

    /// Size of the encoded command in bytes.
    pub fn encoded_len(&self) -> usize {
        let mut buf = PacketBuffer::new(crate::net::MAX_UDP_PACKET);
        self.encode(&mut buf);
        buf.len()
    }
}

fn encode_spawn(buf: &mut PacketBuffer, spawn: &ThingSpawn) {
    if spawn.exact {
        write_vec3(buf, spawn.position);
    } else {
        write_coarse(buf, spawn.position.x);
        write_coarse(buf, spawn.position.y);
        write_coarse(buf, spawn.position.z);
    }
    buf.write_short(spawn.kind.0 as i16);
    if let Some(id) = spawn.id {
        write_id(buf, id);
    }
}

fn encode_move(buf: &mut PacketBuffer, mv: &ThingMove) {
    write_id(buf, mv.id);
    buf.write_short(mv.bits.bits() as i16);

    let write = |buf: &mut PacketBuffer, value: i32| {
        if mv.exact {
            buf.write_long(value);
        } else {
            write_coarse(buf, value);
        }
    };

    let position = mv.position.to_array();
    for (axis, bit) in MoveBits::AXES.iter().enumerate() {
        if mv.bits.contains(*bit) {
            write(buf, position[axis]);
        }
    }
    if mv.bits.contains(MoveBits::ANGLE) {
        buf.write_long(mv.angle as i32);
    }
    let velocity = mv.velocity.to_array();
    for (axis, bit) in [MoveBits::VELX, MoveBits::VELY, MoveBits::VELZ]
        .iter()
        .enumerate()
    {
        if mv.bits.contains(*bit) {
            write(buf, velocity[axis]);
        }
    }
    if mv.bits.contains(MoveBits::PITCH) {
        buf.write_long(mv.pitch);
    }
    if mv.bits.contains(MoveBits::MOVEDIR) {
        buf.write_byte(mv.movedir);
    }
}

fn encode_light(buf: &mut PacketBuffer, effect: &LightEffect) {
    match *effect {
        LightEffect::FireFlicker { max, min }
        | LightEffect::Flicker { max, min }
        | LightEffect::Flash { max, min }
        | LightEffect::Glow { max, min } => {
            buf.write_short(max);
            buf.write_short(min);
        }
        LightEffect::Strobe {
            dark_ticks,
            bright_ticks,
            max,
            min,
        } => {
            buf.write_short(dark_ticks);
            buf.write_short(bright_ticks);
            buf.write_short(max);
            buf.write_short(min);
        }
        LightEffect::Glow2 {
            start,
            end,
            ticks,
            one_shot,
        } => {
            buf.write_short(start);
            buf.write_short(end);
            buf.write_short(ticks);
            buf.write_bool(one_shot);
        }
        LightEffect::Phased { base, phase } => {
            buf.write_short(base);
            buf.write_byte(phase);
        }
    }
}

fn game_mode(fields: &mut Fields<'_, '_>) -> Result<GameMode, DecodeError> {
    let byte = fields.byte()?;
    GameMode::from_byte(byte).ok_or_else(|| fields.invalid("game mode"))
}

fn kind(fields: &mut Fields<'_, '_>) -> Result<ActorKind, DecodeError> {
    let raw = fields.index()?;
    if !crate::world::catalog::is_known(ActorKind(raw)) {
        return Err(fields.invalid("actor kind"));
    }
    Ok(ActorKind(raw))
}

pub(super) fn decode_session(fields: &mut Fields<'_, '_>) -> Result<Command, DecodeError> {
    use CommandCode::{Base, Extended};
    Ok(match fields.code() {
        Base(Opcode::ConnectError) => {
            let code = fields.byte()?;
            Command::ConnectError(match code {
                0 => ConnectionError::WrongPassword,
                1 => ConnectionError::WrongVersion {
                    server_version: fields.string()?,
                },
                2 => ConnectionError::WrongProtocolVersion,
                3 => ConnectionError::Banned {
                    reason: fields.string()?,
                    expires: fields.long()?,
                },
                4 => ConnectionError::AuthenticationFailed,
                5 => ConnectionError::FailedToSendUserInfo,
                6 => ConnectionError::TooManyConnectionsFromIp,
                7 => ConnectionError::ServerIsFull,
                _ => return Err(fields.invalid("error code")),
            })
        }
        Base(Opcode::Authenticate) => Command::Authenticate {
            map: fields.string()?,
        },
        Base(Opcode::MapLoad) => Command::MapLoad {
            game_mode: game_mode(fields)?,
        },
        Base(Opcode::Ping) => Command::Ping {
            time: fields.long()?,
        },
        Base(Opcode::Nothing) => Command::Nothing,
        Base(Opcode::BeginSnapshot) => Command::BeginSnapshot,
        Base(Opcode::EndSnapshot) => Command::EndSnapshot,
        Extended(ExtendedOpcode::FullUpdateCompleted) => Command::FullUpdateCompleted,
        Base(Opcode::Print) => {
            let byte = fields.byte()?;
            let level = PrintLevel::from_byte(byte).ok_or_else(|| fields.invalid("print level"))?;
            Command::Print {
                level,
                text: fields.string()?,
            }
        }
        Base(Opcode::PrintMotd) => Command::PrintMotd {
            text: fields.string()?,
        },
        Base(Opcode::SetConsolePlayer) => Command::SetConsolePlayer {
            slot: fields.byte()?,
        },
        Base(Opcode::SetGameMode) => Command::SetGameMode {
            mode: game_mode(fields)?,
        },
        Base(Opcode::SetMapTime) => Command::SetMapTime {
            time: fields.long()? as u32,
        },
        Base(Opcode::ConsolePlayerKicked) => Command::ConsolePlayerKicked {
            reason: fields.string()?,
            reconnect: fields.bool()?,
        },
        other => return Err(DecodeError::Unregistered(other)),
    })
}

pub(super) fn decode_player(fields: &mut Fields<'_, '_>) -> Result<Command, DecodeError> {
    use CommandCode::Base;
    let code = fields.code();
    if code == Base(Opcode::MoveLocalPlayer) {
        return Ok(Command::MoveLocalPlayer {
            tick: fields.long()? as u32,
            position: fields.long_vec3()?,
            velocity: fields.long_vec3()?,
        });
    }

    let slot = fields.byte()?;
    Ok(match code {
        Base(Opcode::SpawnPlayer) => Command::SpawnPlayer {
            slot,
            body: fields.net_id()?,
            position: fields.long_vec3()?,
            angle: fields.long()? as u32,
            spectating: fields.bool()?,
        },
        Base(Opcode::MovePlayer) => Command::MovePlayer {
            slot,
            position: fields.long_vec3()?,
            velocity: fields.long_vec3()?,
            angle: fields.long()? as u32,
            pitch: fields.long()?,
        },
        Base(Opcode::DamagePlayer) => Command::DamagePlayer {
            slot,
            health: fields.short()? as i32,
            armor: fields.short()? as i32,
        },
        Base(Opcode::KillPlayer) => Command::KillPlayer {
            slot,
            source: fields.optional_net_id()?,
            health: fields.short()? as i32,
        },
        Base(Opcode::SetPlayerHealth) => Command::SetPlayerHealth {
            slot,
            health: fields.short()? as i32,
        },
        Base(Opcode::SetPlayerMaxHealth) => Command::SetPlayerMaxHealth {
            slot,
            max_health: fields.short()? as i32,
        },
        Base(Opcode::SetPlayerUserInfo) => {
            let (flags, info) = read_userinfo(fields)?;
            Command::SetPlayerUserInfo { slot, flags, info }
        }
        Base(Opcode::SetPlayerFrags) => Command::SetPlayerFrags {
            slot,
            frags: fields.long()?,
        },
        Base(Opcode::SetPlayerPoints) => Command::SetPlayerPoints {
            slot,
            points: fields.long()?,
        },
        Base(Opcode::SetPlayerWins) => Command::SetPlayerWins {
            slot,
            wins: fields.long()?,
        },
        Base(Opcode::SetPlayerTeam) => {
            let team = fields.byte()?;
            Command::SetPlayerTeam {
                slot,
                team: (team != NO_TEAM).then_some(team),
            }
        }
        Base(Opcode::SetPlayerLaggingStatus) => Command::SetPlayerLaggingStatus {
            slot,
            lagging: fields.bool()?,
        },
        Base(Opcode::UpdatePlayerPing) => Command::UpdatePlayerPing {
            slot,
            ping: fields.index()?,
        },
        Base(Opcode::DisconnectPlayer) => Command::DisconnectPlayer { slot },
        Base(Opcode::PlayerIsSpectator) => Command::PlayerIsSpectator {
            slot,
            dead_spectator: fields.bool()?,
        },
        Base(Opcode::GivePowerup) => Command::GivePowerup {
            slot,
            name: fields.string()?,
            ticks: fields.long()?,
        },
        Base(Opcode::GiveInventory) => Command::GiveInventory {
            slot,
            name: fields.string()?,
            amount: fields.long()?,
        },
        Base(Opcode::WeaponChange) => Command::WeaponChange {
            slot,
            weapon: fields.string()?,
        },
        other => return Err(DecodeError::Unregistered(other)),
    })
}

fn decode_spawn(
    fields: &mut Fields<'_, '_>,
    exact: bool,
    with_id: bool,
) -> Result<Command, DecodeError> {
    let position = if exact {
        fields.long_vec3()?
    } else {
        IVec3::new(fields.coarse()?, fields.coarse()?, fields.coarse()?)
    };
    let kind = kind(fields)?;
    let id = if with_id {
        Some(fields.net_id()?)
    } else {
        None
    };
    Ok(Command::SpawnThing(ThingSpawn {
        id,
        kind,
        position,
        exact,
    }))
}

fn axis_value(fields: &mut Fields<'_, '_>, exact: bool) -> Result<i32, DecodeError> {
    if exact {
        fields.long()
    } else {
        fields.coarse()
    }
}

fn decode_move(fields: &mut Fields<'_, '_>, exact: bool) -> Result<Command, DecodeError> {
    let id = fields.net_id()?;
    let bits = MoveBits::from_bits_truncate(fields.short()? as u16);
    let mut mv = ThingMove::new(id, bits);
    mv.exact = exact;

    let mut position = [0; 3];
    for (axis, bit) in MoveBits::AXES.iter().enumerate() {
        if bits.contains(*bit) {
            position[axis] = axis_value(fields, exact)?;
        }
    }
    mv.position = IVec3::from_array(position);
    if bits.contains(MoveBits::ANGLE) {
        mv.angle = fields.long()? as u32;
    }
    let mut velocity = [0; 3];
    for (axis, bit) in [MoveBits::VELX, MoveBits::VELY, MoveBits::VELZ]
        .iter()
        .enumerate()
    {
        if bits.contains(*bit) {
            velocity[axis] = axis_value(fields, exact)?;
        }
    }
    mv.velocity = IVec3::from_array(velocity);
    if bits.contains(MoveBits::PITCH) {
        mv.pitch = fields.long()?;
    }
    if bits.contains(MoveBits::MOVEDIR) {
        mv.movedir = fields.byte()?;
    }
    Ok(Command::MoveThing(mv))
}

pub(super) fn decode_thing(fields: &mut Fields<'_, '_>) -> Result<Command, DecodeError> {
    use CommandCode::{Base, Extended};
    match fields.code() {
        Base(Opcode::SpawnThing) => return decode_spawn(fields, false, true),
        Base(Opcode::SpawnThingNoNetId) => return decode_spawn(fields, false, false),
        Base(Opcode::SpawnThingExact) => return decode_spawn(fields, true, true),
        Base(Opcode::SpawnThingExactNoNetId) => return decode_spawn(fields, true, false),
        Base(Opcode::MoveThing) => return decode_move(fields, false),
        Base(Opcode::MoveThingExact) => return decode_move(fields, true),
        Base(Opcode::SpawnMissile) => {
            let position = fields.long_vec3()?;
            let velocity = fields.long_vec3()?;
            let kind = kind(fields)?;
            return Ok(Command::SpawnMissile {
                id: fields.net_id()?,
                kind,
                position,
                velocity,
                target: fields.optional_net_id()?,
            });
        }
        _ => {}
    }

    let id = fields.net_id()?;
    Ok(match fields.code() {
        Base(Opcode::KillThing) => Command::KillThing {
            id,
            health: fields.short()? as i32,
            source: fields.optional_net_id()?,
        },
        Base(Opcode::SetThingState) => {
            let byte = fields.byte()?;
            Command::SetThingState {
                id,
                state: ActorState::from_byte(byte).ok_or_else(|| fields.invalid("state"))?,
            }
        }
        Base(Opcode::SetThingFrame) => Command::SetThingFrame {
            id,
            frame: FrameOverride {
                label: fields.string()?,
                offset: fields.byte()?,
            },
        },
        Base(Opcode::DestroyThing) => Command::DestroyThing { id },
        Base(Opcode::SetThingAngle) => Command::SetThingAngle {
            id,
            angle: fields.long()? as u32,
        },
        Base(Opcode::SetThingFlags) => Command::SetThingFlags {
            id,
            flags: ActorFlags::from_bits_truncate(fields.long()? as u32),
        },
        Base(Opcode::SetThingArguments) => {
            let mut args = [0; 5];
            for arg in &mut args {
                *arg = fields.long()?;
            }
            Command::SetThingArguments { id, args }
        }
        Base(Opcode::SetThingTid) => Command::SetThingTid {
            id,
            tid: fields.long()?,
        },
        Base(Opcode::SetThingTranslation) => Command::SetThingTranslation {
            id,
            translation: fields.long()?,
        },
        Base(Opcode::SetThingSpawnPoint) => Command::SetThingSpawnPoint {
            id,
            point: fields.long_vec3()?,
        },
        Base(Opcode::SetThingWaterLevel) => Command::SetThingWaterLevel {
            id,
            level: fields.byte()?,
        },
        Base(Opcode::SetThingProperty) => {
            let property = match fields.byte()? {
                0 => ThingProperty::Speed(fields.long()?),
                1 => {
                    let byte = fields.byte()?;
                    ThingProperty::RenderStyle(
                        RenderStyle::from_byte(byte)
                            .ok_or_else(|| fields.invalid("render style"))?,
                    )
                }
                2 => ThingProperty::Alpha(fields.long()?),
                _ => return Err(fields.invalid("property")),
            };
            Command::SetThingProperty { id, property }
        }
        Base(Opcode::SetThingHealth) => Command::SetThingHealth {
            id,
            health: fields.long()?,
        },
        Extended(ExtendedOpcode::SetThingReactionTime) => Command::SetThingReactionTime {
            id,
            time: fields.short()? as i32,
        },
        Base(Opcode::ThingIsCorpse) => Command::ThingIsCorpse { id },
        Base(Opcode::HideThing) => Command::HideThing { id },
        other => return Err(DecodeError::Unregistered(other)),
    })
}

fn decode_light(fields: &mut Fields<'_, '_>, op: Opcode) -> Result<LightEffect, DecodeError> {
    Ok(match op {
        Opcode::DoSectorLightFireFlicker => LightEffect::FireFlicker {
            max: fields.short()?,
            min: fields.short()?,
        },
        Opcode::DoSectorLightFlicker => LightEffect::Flicker {
            max: fields.short()?,
            min: fields.short()?,
        },
        Opcode::DoSectorLightFlash => LightEffect::Flash {
            max: fields.short()?,
            min: fields.short()?,
        },
        Opcode::DoSectorLightGlow => LightEffect::Glow {
            max: fields.short()?,
            min: fields.short()?,
        },
        Opcode::DoSectorLightStrobe => LightEffect::Strobe {
            dark_ticks: fields.short()?,
            bright_ticks: fields.short()?,
            max: fields.short()?,
            min: fields.short()?,
        },
        Opcode::DoSectorLightGlow2 => LightEffect::Glow2 {
            start: fields.short()?,
            end: fields.short()?,
            ticks: fields.short()?,
            one_shot: fields.bool()?,
        },
        Opcode::DoSectorLightPhased => LightEffect::Phased {
            base: fields.short()?,
            phase: fields.byte()?,
        },
        other => return Err(DecodeError::Unregistered(CommandCode::Base(other))),
    })
}

pub(super) fn decode_sector(fields: &mut Fields<'_, '_>) -> Result<Command, DecodeError> {
    let CommandCode::Base(op) = fields.code() else {
        return Err(DecodeError::Unregistered(fields.code()));
    };
    let sector = fields.index()?;
    Ok(match op {
        Opcode::SetSectorFloorPlane => Command::SetSectorFloorPlane {
            sector,
            height: fields.long()?,
        },
        Opcode::SetSectorCeilingPlane => Command::SetSectorCeilingPlane {
            sector,
            height: fields.long()?,
        },
        Opcode::SetSectorFlat => Command::SetSectorFlat {
            sector,
            ceiling: fields.string()?,
            floor: fields.string()?,
        },
        Opcode::SetSectorPanning => Command::SetSectorPanning {
            sector,
            ceiling: fields.long_vec2()?,
            floor: fields.long_vec2()?,
        },
        Opcode::SetSectorRotation => Command::SetSectorRotation {
            sector,
            ceiling: fields.long()?,
            floor: fields.long()?,
        },
        Opcode::SetSectorScale => Command::SetSectorScale {
            sector,
            ceiling: fields.long_vec2()?,
            floor: fields.long_vec2()?,
        },
        Opcode::SetSectorColor => Command::SetSectorColor {
            sector,
            color: fields.rgb()?,
            desaturation: fields.byte()?,
        },
        Opcode::SetSectorFade => Command::SetSectorFade {
            sector,
            fade: fields.rgb()?,
        },
        Opcode::SetSectorFriction => Command::SetSectorFriction {
            sector,
            friction: fields.long()?,
            move_factor: fields.long()?,
        },
        Opcode::SetSectorGravity => Command::SetSectorGravity {
            sector,
            gravity: fields.float()?,
        },
        Opcode::SetSectorLightLevel => Command::SetSectorLightLevel {
            sector,
            level: fields.short()?,
        },
        Opcode::SetSectorReflection => Command::SetSectorReflection {
            sector,
            ceiling: fields.float()?,
            floor: fields.float()?,
        },
        Opcode::StopSectorLightEffect => Command::StopLightEffect { sector },
        Opcode::StartSectorMover => {
            let byte = fields.byte()?;
            let kind = MoverKind::from_byte(byte).ok_or_else(|| fields.invalid("mover kind"))?;
            Command::StartSectorMover {
                sector,
                mover: SectorMover {
                    kind,
                    direction: fields.byte()? as i8,
                    speed: fields.long()?,
                    destination: fields.long()?,
                },
            }
        }
        Opcode::FinishSectorMover => Command::FinishSectorMover { sector },
        light => Command::StartLightEffect {
            sector,
            effect: decode_light(fields, light)?,
        },
    })
}

pub(super) fn decode_level(fields: &mut Fields<'_, '_>) -> Result<Command, DecodeError> {
    let CommandCode::Base(op) = fields.code() else {
        return Err(DecodeError::Unregistered(fields.code()));
    };
    if op == Opcode::SetTeamScore {
        return Ok(Command::SetTeamScore {
            team: fields.byte()?,
            score: fields.long()?,
        });
    }

    let index = fields.index()?;
    Ok(match op {
        Opcode::SetLineAlpha => Command::SetLineAlpha {
            line: index,
            alpha: fields.long()?,
        },
        Opcode::SetLineTexture => {
            let side = match fields.byte()? {
                0 => LineSide::Front,
                1 => LineSide::Back,
                _ => return Err(fields.invalid("line side")),
            };
            let byte = fields.byte()?;
            let position =
                TexturePosition::from_byte(byte).ok_or_else(|| fields.invalid("texture position"))?;
            Command::SetLineTexture {
                line: index,
                side,
                position,
                texture: fields.string()?,
            }
        }
        Opcode::SetSomeLineFlags => Command::SetSomeLineFlags {
            line: index,
            flags: fields.index()?,
        },
        Opcode::SetSideFlags => Command::SetSideFlags {
            side: index,
            flags: fields.byte()?,
        },
        Opcode::SetPolyobjPosition => Command::SetPolyobjPosition {
            poly: index,
            position: fields.long_vec2()?,
        },
        Opcode::SetPolyobjRotation => Command::SetPolyobjRotation {
            poly: index,
            angle: fields.long()?,
        },
        other => return Err(DecodeError::Unregistered(CommandCode::Base(other))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::FRACUNIT;

    fn decode_one(bytes: &[u8]) -> Result<Command, DecodeError> {
        let registry = crate::command::CommandRegistry::new().unwrap();
        let mut reader = PacketReader::new(bytes);
        registry.decode_next(&mut reader).map(|cmd| cmd.unwrap())
    }

    fn encoded(command: &Command) -> Vec<u8> {
        let mut buf = PacketBuffer::new(1024);
        command.encode(&mut buf);
        buf.as_bytes().to_vec()
    }

    #[test]
    fn test_coarse_spawn_drops_fraction() {
        let spawn = Command::SpawnThing(ThingSpawn {
            id: Some(NetId(12)),
            kind: crate::world::catalog::IMP,
            position: IVec3::new(100 * FRACUNIT + 1234, -3 * FRACUNIT, 0),
            exact: false,
        });
        let bytes = encoded(&spawn);
        // opcode + 3 shorts + kind + id
        assert_eq!(bytes.len(), 1 + 6 + 2 + 2);

        let Command::SpawnThing(decoded) = decode_one(&bytes).unwrap() else {
            panic!("wrong command");
        };
        assert_eq!(decoded.position, IVec3::new(100 * FRACUNIT, -3 * FRACUNIT, 0));
        assert_eq!(decoded.id, Some(NetId(12)));
    }

    #[test]
    fn test_id_less_spawn_uses_its_own_opcode() {
        let spawn = Command::SpawnThing(ThingSpawn {
            id: None,
            kind: crate::world::catalog::BULLET_PUFF,
            position: IVec3::ZERO,
            exact: true,
        });
        let bytes = encoded(&spawn);
        assert_eq!(bytes[0], Opcode::SpawnThingExactNoNetId as u8);
        assert_eq!(decode_one(&bytes).unwrap(), spawn);
    }

    #[test]
    fn test_move_only_carries_flagged_fields() {
        let mut mv = ThingMove::new(NetId(3), MoveBits::X | MoveBits::REUSE_Y | MoveBits::ANGLE);
        mv.position = IVec3::new(5 * FRACUNIT, 99, 99);
        mv.angle = 0x4000_0000;
        let command = Command::MoveThing(mv);
        let bytes = encoded(&command);
        // opcode, id, bits, x short, angle long
        assert_eq!(bytes.len(), 1 + 2 + 2 + 2 + 4);

        let Command::MoveThing(decoded) = decode_one(&bytes).unwrap() else {
            panic!("wrong command");
        };
        assert_eq!(decoded.position.x, 5 * FRACUNIT);
        assert_eq!(decoded.position.y, 0);
        assert!(decoded.bits.contains(MoveBits::REUSE_Y));
        assert_eq!(decoded.angle, 0x4000_0000);
    }

    #[test]
    fn test_extended_opcode_prefix() {
        let command = Command::SetThingReactionTime {
            id: NetId(7),
            time: 18,
        };
        let bytes = encoded(&command);
        assert_eq!(bytes[0], Opcode::Extended as u8);
        assert_eq!(bytes[1], ExtendedOpcode::SetThingReactionTime as u8);
        assert_eq!(decode_one(&bytes).unwrap(), command);
    }

    #[test]
    fn test_truncated_command_is_an_error() {
        let bytes = encoded(&Command::SetPlayerFrags { slot: 1, frags: 20 });
        let err = decode_one(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated(CommandCode::Base(Opcode::SetPlayerFrags))
        );
    }

    #[test]
    fn test_invalid_fields_are_rejected() {
        assert!(matches!(
            decode_one(&[Opcode::MapLoad as u8, 42]),
            Err(DecodeError::InvalidField { field: "game mode", .. })
        ));
        assert!(matches!(
            decode_one(&[Opcode::DestroyThing as u8, 0xff, 0xff]),
            Err(DecodeError::InvalidField { field: "net id", .. })
        ));
        assert_eq!(decode_one(&[200]), Err(DecodeError::UnknownOpcode(200)));
    }

    #[test]
    fn test_userinfo_block_respects_flags() {
        let info = UserInfo {
            name: "Doomguy".into(),
            handicap: 20,
            ..Default::default()
        };
        let command = Command::SetPlayerUserInfo {
            slot: 4,
            flags: UserInfoFlags::NAME | UserInfoFlags::HANDICAP,
            info: info.clone(),
        };
        let bytes = encoded(&command);
        // opcode, slot, flags, "Doomguy\0", handicap
        assert_eq!(bytes.len(), 1 + 1 + 2 + 8 + 1);

        let Command::SetPlayerUserInfo { info: decoded, .. } = decode_one(&bytes).unwrap() else {
            panic!("wrong command");
        };
        assert_eq!(decoded.name, "Doomguy");
        assert_eq!(decoded.handicap, 20);
        assert_eq!(decoded.skin, UserInfo::default().skin);
    }

    #[test]
    fn test_connect_errors_carry_details() {
        for error in [
            ConnectionError::WrongVersion {
                server_version: "1.2".into(),
            },
            ConnectionError::Banned {
                reason: "griefing".into(),
                expires: 1_700_000_000,
            },
            ConnectionError::ServerIsFull,
        ] {
            let command = Command::ConnectError(error);
            assert_eq!(decode_one(&encoded(&command)).unwrap(), command);
        }
    }

    #[test]
    fn test_light_effects_pick_their_opcode() {
        let command = Command::StartLightEffect {
            sector: 9,
            effect: LightEffect::Glow2 {
                start: 100,
                end: 200,
                ticks: 35,
                one_shot: true,
            },
        };
        let bytes = encoded(&command);
        assert_eq!(bytes[0], Opcode::DoSectorLightGlow2 as u8);
        assert_eq!(decode_one(&bytes).unwrap(), command);
    }
}
