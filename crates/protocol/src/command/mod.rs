mod apply;
mod bus;
mod codec;
mod opcode;
mod registry;

use bitflags::bitflags;
use glam::{IVec2, IVec3};

pub use apply::ApplyError;
pub use bus::{BusStats, CommandBus, Target};
pub use codec::{DecodeError, coarse, decode_userinfo, read_code, write_userinfo};
pub use opcode::{CommandCode, ExtendedOpcode, Opcode};
pub use registry::{CommandRegistry, RegistryError};

use crate::net::ConnectionError;
use crate::world::{
    ActorFlags, ActorKind, ActorState, FrameOverride, GameMode, LightEffect, LineSide, NetId,
    RenderStyle, SectorMover, TexturePosition, UserInfo, UserInfoFlags,
};

bitflags! {
    /// Fields present in a `MoveThing`. `REUSE_*` replaces the axis value with
    /// the last one the receiver got for that actor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MoveBits: u16 {
        const X = 1 << 0;
        const Y = 1 << 1;
        const Z = 1 << 2;
        const ANGLE = 1 << 3;
        const VELX = 1 << 4;
        const VELY = 1 << 5;
        const VELZ = 1 << 6;
        const PITCH = 1 << 7;
        const MOVEDIR = 1 << 8;
        const REUSE_X = 1 << 9;
        const REUSE_Y = 1 << 10;
        const REUSE_Z = 1 << 11;
    }
}

impl MoveBits {
    pub const POSITION: MoveBits = MoveBits::X.union(MoveBits::Y).union(MoveBits::Z);
    pub const VELOCITY: MoveBits = MoveBits::VELX.union(MoveBits::VELY).union(MoveBits::VELZ);
    pub const AXES: [MoveBits; 3] = [MoveBits::X, MoveBits::Y, MoveBits::Z];
    pub const REUSE: [MoveBits; 3] = [MoveBits::REUSE_X, MoveBits::REUSE_Y, MoveBits::REUSE_Z];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PrintLevel {
    Low = 0,
    #[default]
    Medium = 1,
    High = 2,
    Chat = 3,
    TeamChat = 4,
}

impl PrintLevel {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::Low,
            1 => Self::Medium,
            2 => Self::High,
            3 => Self::Chat,
            4 => Self::TeamChat,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThingProperty {
    Speed(i32),
    RenderStyle(RenderStyle),
    Alpha(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThingSpawn {
    /// `None` selects the id-less opcode; the receiver keeps the actor local.
    pub id: Option<NetId>,
    pub kind: ActorKind,
    pub position: IVec3,
    /// Full 16.16 coordinates instead of whole map units.
    pub exact: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThingMove {
    pub id: NetId,
    pub bits: MoveBits,
    pub position: IVec3,
    pub velocity: IVec3,
    pub angle: u32,
    pub pitch: i32,
    pub movedir: u8,
    pub exact: bool,
}

impl ThingMove {
    pub fn new(id: NetId, bits: MoveBits) -> Self {
        Self {
            id,
            bits,
            position: IVec3::ZERO,
            velocity: IVec3::ZERO,
            angle: 0,
            pitch: 0,
            movedir: 0,
            exact: false,
        }
    }
}

/// Every server-to-client state change, one variant per wire command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ConnectError(ConnectionError),
    Authenticate { map: String },
    MapLoad { game_mode: GameMode },
    Ping { time: i32 },
    Nothing,
    BeginSnapshot,
    EndSnapshot,
    FullUpdateCompleted,
    Print { level: PrintLevel, text: String },
    PrintMotd { text: String },
    SetConsolePlayer { slot: u8 },
    SetGameMode { mode: GameMode },
    SetMapTime { time: u32 },
    /// Sent to the kicked client only. `reconnect` asks it to start over
    /// with a fresh connection.
    ConsolePlayerKicked { reason: String, reconnect: bool },

    SpawnPlayer { slot: u8, body: NetId, position: IVec3, angle: u32, spectating: bool },
    MovePlayer { slot: u8, position: IVec3, velocity: IVec3, angle: u32, pitch: i32 },
    MoveLocalPlayer { tick: u32, position: IVec3, velocity: IVec3 },
    DamagePlayer { slot: u8, health: i32, armor: i32 },
    KillPlayer { slot: u8, source: Option<NetId>, health: i32 },
    SetPlayerHealth { slot: u8, health: i32 },
    SetPlayerMaxHealth { slot: u8, max_health: i32 },
    SetPlayerUserInfo { slot: u8, flags: UserInfoFlags, info: UserInfo },
    SetPlayerFrags { slot: u8, frags: i32 },
    SetPlayerPoints { slot: u8, points: i32 },
    SetPlayerWins { slot: u8, wins: i32 },
    SetPlayerTeam { slot: u8, team: Option<u8> },
    SetPlayerLaggingStatus { slot: u8, lagging: bool },
    UpdatePlayerPing { slot: u8, ping: u16 },
    DisconnectPlayer { slot: u8 },
    PlayerIsSpectator { slot: u8, dead_spectator: bool },
    GivePowerup { slot: u8, name: String, ticks: i32 },
    GiveInventory { slot: u8, name: String, amount: i32 },
    WeaponChange { slot: u8, weapon: String },

    SpawnThing(ThingSpawn),
    SpawnMissile { id: NetId, kind: ActorKind, position: IVec3, velocity: IVec3, target: Option<NetId> },
    MoveThing(ThingMove),
    KillThing { id: NetId, health: i32, source: Option<NetId> },
    SetThingState { id: NetId, state: ActorState },
    SetThingFrame { id: NetId, frame: FrameOverride },
    DestroyThing { id: NetId },
    SetThingAngle { id: NetId, angle: u32 },
    SetThingFlags { id: NetId, flags: ActorFlags },
    SetThingArguments { id: NetId, args: [i32; 5] },
    SetThingTid { id: NetId, tid: i32 },
    SetThingTranslation { id: NetId, translation: i32 },
    SetThingSpawnPoint { id: NetId, point: IVec3 },
    SetThingWaterLevel { id: NetId, level: u8 },
    SetThingProperty { id: NetId, property: ThingProperty },
    SetThingHealth { id: NetId, health: i32 },
    SetThingReactionTime { id: NetId, time: i32 },
    ThingIsCorpse { id: NetId },
    HideThing { id: NetId },

    SetSectorFloorPlane { sector: u16, height: i32 },
    SetSectorCeilingPlane { sector: u16, height: i32 },
    SetSectorFlat { sector: u16, ceiling: String, floor: String },
    SetSectorPanning { sector: u16, ceiling: IVec2, floor: IVec2 },
    SetSectorRotation { sector: u16, ceiling: i32, floor: i32 },
    SetSectorScale { sector: u16, ceiling: IVec2, floor: IVec2 },
    SetSectorColor { sector: u16, color: [u8; 3], desaturation: u8 },
    SetSectorFade { sector: u16, fade: [u8; 3] },
    SetSectorFriction { sector: u16, friction: i32, move_factor: i32 },
    SetSectorGravity { sector: u16, gravity: f32 },
    SetSectorLightLevel { sector: u16, level: i16 },
    SetSectorReflection { sector: u16, ceiling: f32, floor: f32 },
    StartLightEffect { sector: u16, effect: LightEffect },
    StopLightEffect { sector: u16 },
    StartSectorMover { sector: u16, mover: SectorMover },
    FinishSectorMover { sector: u16 },

    SetLineAlpha { line: u16, alpha: i32 },
    SetLineTexture { line: u16, side: LineSide, position: TexturePosition, texture: String },
    SetSomeLineFlags { line: u16, flags: u16 },
    SetSideFlags { side: u16, flags: u8 },
    SetPolyobjPosition { poly: u16, position: IVec2 },
    SetPolyobjRotation { poly: u16, angle: i32 },
    SetTeamScore { team: u8, score: i32 },
}

impl Command {
    pub fn code(&self) -> CommandCode {
        use CommandCode::{Base, Extended};
        match self {
            Self::ConnectError(_) => Base(Opcode::ConnectError),
            Self::Authenticate { .. } => Base(Opcode::Authenticate),
            Self::MapLoad { .. } => Base(Opcode::MapLoad),
            Self::Ping { .. } => Base(Opcode::Ping),
            Self::Nothing => Base(Opcode::Nothing),
            Self::BeginSnapshot => Base(Opcode::BeginSnapshot),
            Self::EndSnapshot => Base(Opcode::EndSnapshot),
            Self::FullUpdateCompleted => Extended(ExtendedOpcode::FullUpdateCompleted),
            Self::Print { .. } => Base(Opcode::Print),
            Self::PrintMotd { .. } => Base(Opcode::PrintMotd),
            Self::SetConsolePlayer { .. } => Base(Opcode::SetConsolePlayer),
            Self::SetGameMode { .. } => Base(Opcode::SetGameMode),
            Self::SetMapTime { .. } => Base(Opcode::SetMapTime),
            Self::ConsolePlayerKicked { .. } => Base(Opcode::ConsolePlayerKicked),

            Self::SpawnPlayer { .. } => Base(Opcode::SpawnPlayer),
            Self::MovePlayer { .. } => Base(Opcode::MovePlayer),
            Self::MoveLocalPlayer { .. } => Base(Opcode::MoveLocalPlayer),
            Self::DamagePlayer { .. } => Base(Opcode::DamagePlayer),
            Self::KillPlayer { .. } => Base(Opcode::KillPlayer),
            Self::SetPlayerHealth { .. } => Base(Opcode::SetPlayerHealth),
            Self::SetPlayerMaxHealth { .. } => Base(Opcode::SetPlayerMaxHealth),
            Self::SetPlayerUserInfo { .. } => Base(Opcode::SetPlayerUserInfo),
            Self::SetPlayerFrags { .. } => Base(Opcode::SetPlayerFrags),
            Self::SetPlayerPoints { .. } => Base(Opcode::SetPlayerPoints),
            Self::SetPlayerWins { .. } => Base(Opcode::SetPlayerWins),
            Self::SetPlayerTeam { .. } => Base(Opcode::SetPlayerTeam),
            Self::SetPlayerLaggingStatus { .. } => Base(Opcode::SetPlayerLaggingStatus),
            Self::UpdatePlayerPing { .. } => Base(Opcode::UpdatePlayerPing),
            Self::DisconnectPlayer { .. } => Base(Opcode::DisconnectPlayer),
            Self::PlayerIsSpectator { .. } => Base(Opcode::PlayerIsSpectator),
            Self::GivePowerup { .. } => Base(Opcode::GivePowerup),
            Self::GiveInventory { .. } => Base(Opcode::GiveInventory),
            Self::WeaponChange { .. } => Base(Opcode::WeaponChange),

            Self::SpawnThing(spawn) => Base(match (spawn.exact, spawn.id.is_some()) {
                (false, true) => Opcode::SpawnThing,
                (false, false) => Opcode::SpawnThingNoNetId,
                (true, true) => Opcode::SpawnThingExact,
                (true, false) => Opcode::SpawnThingExactNoNetId,
            }),
            Self::SpawnMissile { .. } => Base(Opcode::SpawnMissile),
            Self::MoveThing(mv) => Base(if mv.exact {
                Opcode::MoveThingExact
            } else {
                Opcode::MoveThing
            }),
            Self::KillThing { .. } => Base(Opcode::KillThing),
            Self::SetThingState { .. } => Base(Opcode::SetThingState),
            Self::SetThingFrame { .. } => Base(Opcode::SetThingFrame),
            Self::DestroyThing { .. } => Base(Opcode::DestroyThing),
            Self::SetThingAngle { .. } => Base(Opcode::SetThingAngle),
            Self::SetThingFlags { .. } => Base(Opcode::SetThingFlags),
            Self::SetThingArguments { .. } => Base(Opcode::SetThingArguments),
            Self::SetThingTid { .. } => Base(Opcode::SetThingTid),
            Self::SetThingTranslation { .. } => Base(Opcode::SetThingTranslation),
            Self::SetThingSpawnPoint { .. } => Base(Opcode::SetThingSpawnPoint),
            Self::SetThingWaterLevel { .. } => Base(Opcode::SetThingWaterLevel),
            Self::SetThingProperty { .. } => Base(Opcode::SetThingProperty),
            Self::SetThingHealth { .. } => Base(Opcode::SetThingHealth),
            Self::SetThingReactionTime { .. } => Extended(ExtendedOpcode::SetThingReactionTime),
            Self::ThingIsCorpse { .. } => Base(Opcode::ThingIsCorpse),
            Self::HideThing { .. } => Base(Opcode::HideThing),

            Self::SetSectorFloorPlane { .. } => Base(Opcode::SetSectorFloorPlane),
            Self::SetSectorCeilingPlane { .. } => Base(Opcode::SetSectorCeilingPlane),
            Self::SetSectorFlat { .. } => Base(Opcode::SetSectorFlat),
            Self::SetSectorPanning { .. } => Base(Opcode::SetSectorPanning),
            Self::SetSectorRotation { .. } => Base(Opcode::SetSectorRotation),
            Self::SetSectorScale { .. } => Base(Opcode::SetSectorScale),
            Self::SetSectorColor { .. } => Base(Opcode::SetSectorColor),
            Self::SetSectorFade { .. } => Base(Opcode::SetSectorFade),
            Self::SetSectorFriction { .. } => Base(Opcode::SetSectorFriction),
            Self::SetSectorGravity { .. } => Base(Opcode::SetSectorGravity),
            Self::SetSectorLightLevel { .. } => Base(Opcode::SetSectorLightLevel),
            Self::SetSectorReflection { .. } => Base(Opcode::SetSectorReflection),
            Self::StartLightEffect { effect, .. } => Base(match effect {
                LightEffect::FireFlicker { .. } => Opcode::DoSectorLightFireFlicker,
                LightEffect::Flicker { .. } => Opcode::DoSectorLightFlicker,
                LightEffect::Flash { .. } => Opcode::DoSectorLightFlash,
                LightEffect::Strobe { .. } => Opcode::DoSectorLightStrobe,
                LightEffect::Glow { .. } => Opcode::DoSectorLightGlow,
                LightEffect::Glow2 { .. } => Opcode::DoSectorLightGlow2,
                LightEffect::Phased { .. } => Opcode::DoSectorLightPhased,
            }),
            Self::StopLightEffect { .. } => Base(Opcode::StopSectorLightEffect),
            Self::StartSectorMover { .. } => Base(Opcode::StartSectorMover),
            Self::FinishSectorMover { .. } => Base(Opcode::FinishSectorMover),

            Self::SetLineAlpha { .. } => Base(Opcode::SetLineAlpha),
            Self::SetLineTexture { .. } => Base(Opcode::SetLineTexture),
            Self::SetSomeLineFlags { .. } => Base(Opcode::SetSomeLineFlags),
            Self::SetSideFlags { .. } => Base(Opcode::SetSideFlags),
            Self::SetPolyobjPosition { .. } => Base(Opcode::SetPolyobjPosition),
            Self::SetPolyobjRotation { .. } => Base(Opcode::SetPolyobjRotation),
            Self::SetTeamScore { .. } => Base(Opcode::SetTeamScore),
        }
    }

    /// The actor the command addresses, if any.
    pub fn subject(&self) -> Option<NetId> {
        match self {
            Self::SpawnThing(spawn) => spawn.id,
            Self::MoveThing(mv) => Some(mv.id),
            Self::SpawnPlayer { body, .. } => Some(*body),
            Self::SpawnMissile { id, .. }
            | Self::KillThing { id, .. }
            | Self::SetThingState { id, .. }
            | Self::SetThingFrame { id, .. }
            | Self::DestroyThing { id }
            | Self::SetThingAngle { id, .. }
            | Self::SetThingFlags { id, .. }
            | Self::SetThingArguments { id, .. }
            | Self::SetThingTid { id, .. }
            | Self::SetThingTranslation { id, .. }
            | Self::SetThingSpawnPoint { id, .. }
            | Self::SetThingWaterLevel { id, .. }
            | Self::SetThingProperty { id, .. }
            | Self::SetThingHealth { id, .. }
            | Self::SetThingReactionTime { id, .. }
            | Self::ThingIsCorpse { id }
            | Self::HideThing { id } => Some(*id),
            _ => None,
        }
    }

    /// The player slot the command describes. The target's own slot
    /// (`SetConsolePlayer`) and departures (`DisconnectPlayer`) do not count.
    pub fn player_subject(&self) -> Option<u8> {
        match self {
            Self::SpawnPlayer { slot, .. }
            | Self::MovePlayer { slot, .. }
            | Self::DamagePlayer { slot, .. }
            | Self::KillPlayer { slot, .. }
            | Self::SetPlayerHealth { slot, .. }
            | Self::SetPlayerMaxHealth { slot, .. }
            | Self::SetPlayerUserInfo { slot, .. }
            | Self::SetPlayerFrags { slot, .. }
            | Self::SetPlayerPoints { slot, .. }
            | Self::SetPlayerWins { slot, .. }
            | Self::SetPlayerTeam { slot, .. }
            | Self::SetPlayerLaggingStatus { slot, .. }
            | Self::UpdatePlayerPing { slot, .. }
            | Self::PlayerIsSpectator { slot, .. }
            | Self::GivePowerup { slot, .. }
            | Self::GiveInventory { slot, .. }
            | Self::WeaponChange { slot, .. } => Some(*slot),
            _ => None,
        }
    }

    /// Loss-tolerant commands that go out on the unreliable channel.
    pub fn is_unreliable(&self) -> bool {
        matches!(
            self,
            Self::Ping { .. } | Self::MovePlayer { .. } | Self::MoveLocalPlayer { .. }
        )
    }

    pub fn name(&self) -> String {
        self.code().to_string()
    }
}
