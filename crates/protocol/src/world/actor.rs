use bitflags::bitflags;
use glam::IVec3;

use super::catalog::{self, ActorKind};

/// One unit in 16.16 fixed point.
pub const FRACUNIT: i32 = 1 << 16;

pub const MAX_NET_ID: u16 = 32767;

/// Network handle for a replicated actor. `-1` on the wire means "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NetId(pub u16);

impl NetId {
    pub fn to_wire(id: Option<NetId>) -> i16 {
        id.map_or(-1, |id| id.0 as i16)
    }

    /// `None` for the "no actor" marker and for anything out of range.
    pub fn from_wire(value: i32) -> Option<NetId> {
        if (0..=MAX_NET_ID as i32).contains(&value) {
            Some(NetId(value as u16))
        } else {
            None
        }
    }
}

impl std::fmt::Display for NetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ActorFlags: u32 {
        const SOLID = 1 << 0;
        const SHOOTABLE = 1 << 1;
        const NOGRAVITY = 1 << 2;
        const DROPOFF = 1 << 3;
        const PICKUP = 1 << 4;
        const NOCLIP = 1 << 5;
        const FLOAT = 1 << 6;
        const MISSILE = 1 << 7;
        const DROPPED = 1 << 8;
        const SHADOW = 1 << 9;
        const NOBLOOD = 1 << 10;
        const CORPSE = 1 << 11;
        const COUNTKILL = 1 << 12;
        const COUNTITEM = 1 << 13;
        const SPECIAL = 1 << 14;
        const FRIENDLY = 1 << 15;
        const INVISIBLE = 1 << 16;
        const DORMANT = 1 << 17;
    }
}

bitflags! {
    /// Replication markers, never sent as part of `ActorFlags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NetFlags: u8 {
        /// Recreated locally by clients; never part of a full update.
        const ALLOW_CLIENT_SPAWN = 1 << 0;
        const SERVER_SIDE_ONLY = 1 << 1;
        const HIDDEN_INDEFINITELY = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ActorState {
    #[default]
    Spawn = 0,
    See = 1,
    Pain = 2,
    Melee = 3,
    Missile = 4,
    Death = 5,
    XDeath = 6,
    Raise = 7,
    Heal = 8,
    Idle = 9,
}

impl ActorState {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::Spawn,
            1 => Self::See,
            2 => Self::Pain,
            3 => Self::Melee,
            4 => Self::Missile,
            5 => Self::Death,
            6 => Self::XDeath,
            7 => Self::Raise,
            8 => Self::Heal,
            9 => Self::Idle,
            _ => return None,
        })
    }

    pub fn is_dead(self) -> bool {
        matches!(self, Self::Death | Self::XDeath)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum RenderStyle {
    #[default]
    Normal = 0,
    Fuzzy = 1,
    Translucent = 2,
    Add = 3,
    None = 4,
}

impl RenderStyle {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::Normal,
            1 => Self::Fuzzy,
            2 => Self::Translucent,
            3 => Self::Add,
            4 => Self::None,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorProperties {
    pub speed: i32,
    pub render_style: RenderStyle,
    /// 16.16, `FRACUNIT` is opaque.
    pub alpha: i32,
}

/// A state jump that is not the start of a state sequence, e.g. a door
/// switch halfway through its animation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameOverride {
    pub label: String,
    pub offset: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub net_id: Option<NetId>,
    pub kind: ActorKind,
    pub position: IVec3,
    pub velocity: IVec3,
    /// Binary angle, full circle is 2^32.
    pub angle: u32,
    pub pitch: i32,
    pub movedir: u8,
    pub spawn_point: IVec3,
    pub health: i32,
    pub state: ActorState,
    pub frame: Option<FrameOverride>,
    pub flags: ActorFlags,
    pub net_flags: NetFlags,
    pub args: [i32; 5],
    pub tid: i32,
    pub translation: i32,
    pub water_level: u8,
    pub reaction_time: i32,
    pub properties: ActorProperties,
    /// Set while the actor sits in someone's inventory.
    pub owner: Option<NetId>,
    /// Slot of the player this actor is the body of.
    pub player: Option<u8>,
}

impl Actor {
    pub fn new(kind: ActorKind, position: IVec3) -> Self {
        let class = catalog::class(kind);
        let mut net_flags = NetFlags::empty();
        if class.client_spawned() {
            net_flags |= NetFlags::ALLOW_CLIENT_SPAWN;
        }

        Self {
            net_id: None,
            kind,
            position,
            velocity: IVec3::ZERO,
            angle: 0,
            pitch: 0,
            movedir: 0,
            spawn_point: position,
            health: class.health,
            state: ActorState::Spawn,
            frame: None,
            flags: class.flags,
            net_flags,
            args: [0; 5],
            tid: 0,
            translation: 0,
            water_level: 0,
            reaction_time: 0,
            properties: class.properties(),
            owner: None,
            player: None,
        }
    }

    pub fn class_name(&self) -> &'static str {
        catalog::class(self.kind).name
    }

    pub fn is_dead(&self) -> bool {
        self.health <= 0 || self.state.is_dead()
    }

    pub fn is_corpse(&self) -> bool {
        self.flags.contains(ActorFlags::CORPSE)
    }

    pub fn is_missile(&self) -> bool {
        self.flags.contains(ActorFlags::MISSILE)
    }

    pub fn is_hidden(&self) -> bool {
        self.net_flags.contains(NetFlags::HIDDEN_INDEFINITELY)
    }

    pub fn is_client_spawned(&self) -> bool {
        self.net_flags.contains(NetFlags::ALLOW_CLIENT_SPAWN)
    }

    /// Flags that differ from what a fresh spawn of this kind would carry.
    pub fn has_custom_flags(&self) -> bool {
        self.flags != catalog::class(self.kind).flags
    }

    pub fn has_custom_properties(&self) -> bool {
        self.properties != catalog::class(self.kind).properties()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_net_id_wire_values() {
        assert_eq!(NetId::to_wire(None), -1);
        assert_eq!(NetId::to_wire(Some(NetId(12))), 12);
        assert_eq!(NetId::from_wire(-1), None);
        assert_eq!(NetId::from_wire(32767), Some(NetId(32767)));
        assert_eq!(NetId::from_wire(40000), None);
    }

    #[test]
    fn test_new_actor_takes_class_defaults() {
        let actor = Actor::new(catalog::IMP, IVec3::new(FRACUNIT, 0, 0));
        assert_eq!(actor.class_name(), "DoomImp");
        assert_eq!(actor.health, 60);
        assert_eq!(actor.spawn_point, actor.position);
        assert!(!actor.has_custom_flags());
        assert!(!actor.is_client_spawned());

        let puff = Actor::new(catalog::BULLET_PUFF, IVec3::ZERO);
        assert!(puff.is_client_spawned());
    }
}
