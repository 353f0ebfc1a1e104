/// Server-to-client command opcodes. `Extended` is followed by an
/// `ExtendedOpcode` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Opcode {
    ConnectError = 1,
    Authenticate = 2,
    MapLoad = 3,
    Ping = 4,
    Nothing = 5,
    BeginSnapshot = 6,
    EndSnapshot = 7,
    Print = 8,
    PrintMotd = 9,
    SetConsolePlayer = 10,
    SetGameMode = 11,
    SetMapTime = 12,
    ConsolePlayerKicked = 13,

    SpawnPlayer = 20,
    MovePlayer = 21,
    MoveLocalPlayer = 22,
    DamagePlayer = 23,
    KillPlayer = 24,
    SetPlayerHealth = 25,
    SetPlayerMaxHealth = 26,
    SetPlayerUserInfo = 27,
    SetPlayerFrags = 28,
    SetPlayerPoints = 29,
    SetPlayerWins = 30,
    SetPlayerTeam = 31,
    SetPlayerLaggingStatus = 32,
    UpdatePlayerPing = 33,
    DisconnectPlayer = 34,
    PlayerIsSpectator = 35,
    GivePowerup = 36,
    GiveInventory = 37,
    WeaponChange = 38,

    SpawnThing = 50,
    SpawnThingNoNetId = 51,
    SpawnThingExact = 52,
    SpawnThingExactNoNetId = 53,
    SpawnMissile = 54,
    MoveThing = 55,
    MoveThingExact = 56,
    KillThing = 57,
    SetThingState = 58,
    SetThingFrame = 59,
    DestroyThing = 60,
    SetThingAngle = 61,
    SetThingFlags = 62,
    SetThingArguments = 63,
    SetThingTid = 64,
    SetThingTranslation = 65,
    SetThingSpawnPoint = 66,
    SetThingWaterLevel = 67,
    SetThingProperty = 68,
    ThingIsCorpse = 69,
    HideThing = 70,
    SetThingHealth = 71,

    SetSectorFloorPlane = 80,
    SetSectorCeilingPlane = 81,
    SetSectorFlat = 82,
    SetSectorPanning = 83,
    SetSectorRotation = 84,
    SetSectorScale = 85,
    SetSectorColor = 86,
    SetSectorFade = 87,
    SetSectorFriction = 88,
    SetSectorGravity = 89,
    SetSectorLightLevel = 90,
    SetSectorReflection = 91,
    DoSectorLightFireFlicker = 92,
    DoSectorLightFlicker = 93,
    DoSectorLightFlash = 94,
    DoSectorLightStrobe = 95,
    DoSectorLightGlow = 96,
    DoSectorLightGlow2 = 97,
    DoSectorLightPhased = 98,
    StopSectorLightEffect = 99,
    StartSectorMover = 100,
    FinishSectorMover = 101,

    SetLineAlpha = 110,
    SetLineTexture = 111,
    SetSomeLineFlags = 112,
    SetSideFlags = 113,
    SetPolyobjPosition = 114,
    SetPolyobjRotation = 115,
    SetTeamScore = 116,

    Extended = 255,
}

impl Opcode {
    pub const ALL: [Opcode; 84] = [
        Self::ConnectError,
        Self::Authenticate,
        Self::MapLoad,
        Self::Ping,
        Self::Nothing,
        Self::BeginSnapshot,
        Self::EndSnapshot,
        Self::Print,
        Self::PrintMotd,
        Self::SetConsolePlayer,
        Self::SetGameMode,
        Self::SetMapTime,
        Self::ConsolePlayerKicked,
        Self::SpawnPlayer,
        Self::MovePlayer,
        Self::MoveLocalPlayer,
        Self::DamagePlayer,
        Self::KillPlayer,
        Self::SetPlayerHealth,
        Self::SetPlayerMaxHealth,
        Self::SetPlayerUserInfo,
        Self::SetPlayerFrags,
        Self::SetPlayerPoints,
        Self::SetPlayerWins,
        Self::SetPlayerTeam,
        Self::SetPlayerLaggingStatus,
        Self::UpdatePlayerPing,
        Self::DisconnectPlayer,
        Self::PlayerIsSpectator,
        Self::GivePowerup,
        Self::GiveInventory,
        Self::WeaponChange,
        Self::SpawnThing,
        Self::SpawnThingNoNetId,
        Self::SpawnThingExact,
        Self::SpawnThingExactNoNetId,
        Self::SpawnMissile,
        Self::MoveThing,
        Self::MoveThingExact,
        Self::KillThing,
        Self::SetThingState,
        Self::SetThingFrame,
        Self::DestroyThing,
        Self::SetThingAngle,
        Self::SetThingFlags,
        Self::SetThingArguments,
        Self::SetThingTid,
        Self::SetThingTranslation,
        Self::SetThingSpawnPoint,
        Self::SetThingWaterLevel,
        Self::SetThingProperty,
        Self::ThingIsCorpse,
        Self::HideThing,
        Self::SetThingHealth,
        Self::SetSectorFloorPlane,
        Self::SetSectorCeilingPlane,
        Self::SetSectorFlat,
        Self::SetSectorPanning,
        Self::SetSectorRotation,
        Self::SetSectorScale,
        Self::SetSectorColor,
        Self::SetSectorFade,
        Self::SetSectorFriction,
        Self::SetSectorGravity,
        Self::SetSectorLightLevel,
        Self::SetSectorReflection,
        Self::DoSectorLightFireFlicker,
        Self::DoSectorLightFlicker,
        Self::DoSectorLightFlash,
        Self::DoSectorLightStrobe,
        Self::DoSectorLightGlow,
        Self::DoSectorLightGlow2,
        Self::DoSectorLightPhased,
        Self::StopSectorLightEffect,
        Self::StartSectorMover,
        Self::FinishSectorMover,
        Self::SetLineAlpha,
        Self::SetLineTexture,
        Self::SetSomeLineFlags,
        Self::SetSideFlags,
        Self::SetPolyobjPosition,
        Self::SetPolyobjRotation,
        Self::SetTeamScore,
        Self::Extended,
    ];

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| *op as u8 == byte)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ExtendedOpcode {
    FullUpdateCompleted = 0,
    SetThingReactionTime = 1,
}

impl ExtendedOpcode {
    pub const ALL: [ExtendedOpcode; 2] = [Self::FullUpdateCompleted, Self::SetThingReactionTime];

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| *op as u8 == byte)
    }
}

/// Full identity of a command on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandCode {
    Base(Opcode),
    Extended(ExtendedOpcode),
}

impl CommandCode {
    /// Dense index: base opcodes use their byte, extended ones follow at 256.
    pub fn index(self) -> usize {
        match self {
            Self::Base(op) => op as usize,
            Self::Extended(op) => 256 + op as usize,
        }
    }

    /// Every code that must have a registered handler.
    pub fn all() -> impl Iterator<Item = CommandCode> {
        Opcode::ALL
            .iter()
            .filter(|op| **op != Opcode::Extended)
            .map(|op| Self::Base(*op))
            .chain(ExtendedOpcode::ALL.iter().map(|op| Self::Extended(*op)))
    }
}

impl std::fmt::Display for CommandCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Base(op) => write!(f, "{:?}", op),
            Self::Extended(op) => write!(f, "{:?}", op),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_opcode_bytes_are_unique() {
        let bytes: HashSet<u8> = Opcode::ALL.iter().map(|op| *op as u8).collect();
        assert_eq!(bytes.len(), Opcode::ALL.len());
    }

    #[test]
    fn test_from_byte_round_trips() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_byte(op as u8), Some(op));
        }
        assert_eq!(Opcode::from_byte(0), None);
        assert_eq!(ExtendedOpcode::from_byte(1), Some(ExtendedOpcode::SetThingReactionTime));
    }

    #[test]
    fn test_command_indices_do_not_collide() {
        let indices: HashSet<usize> = CommandCode::all().map(CommandCode::index).collect();
        assert_eq!(indices.len(), CommandCode::all().count());
    }
}
