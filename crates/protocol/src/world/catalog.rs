use bitflags::bitflags;

use super::actor::{ActorFlags, ActorProperties, FRACUNIT, RenderStyle};

/// Index into the class table. Both ends share the table, so a spawn only
/// needs to carry this index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActorKind(pub u16);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClassTraits: u8 {
        const PLAYER = 1 << 0;
        const MISSILE = 1 << 1;
        const INVENTORY = 1 << 2;
        /// Leaves a corpse instead of disappearing.
        const CORPSE = 1 << 3;
        const CLIENT_SPAWN = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ActorClass {
    pub name: &'static str,
    pub health: i32,
    pub speed: i32,
    pub render_style: RenderStyle,
    pub alpha: i32,
    pub flags: ActorFlags,
    pub traits: ClassTraits,
}

impl ActorClass {
    pub fn properties(&self) -> ActorProperties {
        ActorProperties {
            speed: self.speed,
            render_style: self.render_style,
            alpha: self.alpha,
        }
    }

    pub fn client_spawned(&self) -> bool {
        self.traits.contains(ClassTraits::CLIENT_SPAWN)
    }

    pub fn is_missile(&self) -> bool {
        self.traits.contains(ClassTraits::MISSILE)
    }

    pub fn is_inventory(&self) -> bool {
        self.traits.contains(ClassTraits::INVENTORY)
    }
}

pub const PLAYER: ActorKind = ActorKind(0);
pub const ZOMBIEMAN: ActorKind = ActorKind(1);
pub const IMP: ActorKind = ActorKind(2);
pub const DEMON: ActorKind = ActorKind(3);
pub const IMP_BALL: ActorKind = ActorKind(4);
pub const ROCKET: ActorKind = ActorKind(5);
pub const BULLET_PUFF: ActorKind = ActorKind(6);
pub const BLOOD: ActorKind = ActorKind(7);
pub const CLIP: ActorKind = ActorKind(8);
pub const MEDIKIT: ActorKind = ActorKind(9);
pub const BARREL: ActorKind = ActorKind(10);
pub const TELEPORT_FOG: ActorKind = ActorKind(11);
pub const TECH_COLUMN: ActorKind = ActorKind(12);
pub const BLUE_ARMOR: ActorKind = ActorKind(13);

const MONSTER: ActorFlags = ActorFlags::SOLID
    .union(ActorFlags::SHOOTABLE)
    .union(ActorFlags::COUNTKILL);
const PROJECTILE: ActorFlags = ActorFlags::NOGRAVITY
    .union(ActorFlags::DROPOFF)
    .union(ActorFlags::MISSILE);
const PICKUP_ITEM: ActorFlags = ActorFlags::SPECIAL;
const EFFECT: ActorFlags = ActorFlags::NOGRAVITY.union(ActorFlags::NOBLOOD);

const fn define(
    name: &'static str,
    health: i32,
    speed: i32,
    flags: ActorFlags,
    traits: ClassTraits,
) -> ActorClass {
    ActorClass {
        name,
        health,
        speed,
        render_style: RenderStyle::Normal,
        alpha: FRACUNIT,
        flags,
        traits,
    }
}

static CLASSES: [ActorClass; 14] = [
    define(
        "DoomPlayer",
        100,
        FRACUNIT,
        ActorFlags::SOLID
            .union(ActorFlags::SHOOTABLE)
            .union(ActorFlags::DROPOFF)
            .union(ActorFlags::PICKUP),
        ClassTraits::PLAYER.union(ClassTraits::CORPSE),
    ),
    define("ZombieMan", 20, 8, MONSTER, ClassTraits::CORPSE),
    define("DoomImp", 60, 8, MONSTER, ClassTraits::CORPSE),
    define("Demon", 150, 10, MONSTER, ClassTraits::CORPSE),
    define(
        "DoomImpBall",
        1000,
        10 * FRACUNIT,
        PROJECTILE,
        ClassTraits::MISSILE,
    ),
    define(
        "Rocket",
        1000,
        20 * FRACUNIT,
        PROJECTILE,
        ClassTraits::MISSILE,
    ),
    define("BulletPuff", 1000, 0, EFFECT, ClassTraits::CLIENT_SPAWN),
    define("Blood", 1000, 0, ActorFlags::NOBLOOD, ClassTraits::CLIENT_SPAWN),
    define("Clip", 1000, 0, PICKUP_ITEM, ClassTraits::INVENTORY),
    define("Medikit", 1000, 0, PICKUP_ITEM, ClassTraits::INVENTORY),
    define(
        "ExplosiveBarrel",
        20,
        0,
        ActorFlags::SOLID
            .union(ActorFlags::SHOOTABLE)
            .union(ActorFlags::NOBLOOD),
        ClassTraits::CORPSE,
    ),
    define("TeleportFog", 1000, 0, EFFECT, ClassTraits::CLIENT_SPAWN),
    define("TechPillar", 1000, 0, ActorFlags::SOLID, ClassTraits::empty()),
    define("BlueArmor", 1000, 0, PICKUP_ITEM, ClassTraits::INVENTORY),
];

/// Class for `kind`. Unknown kinds fall back to the player class; decoding
/// rejects them before they get here.
pub fn class(kind: ActorKind) -> &'static ActorClass {
    CLASSES.get(kind.0 as usize).unwrap_or(&CLASSES[0])
}

pub fn is_known(kind: ActorKind) -> bool {
    (kind.0 as usize) < CLASSES.len()
}

pub fn find(name: &str) -> Option<ActorKind> {
    CLASSES
        .iter()
        .position(|class| class.name.eq_ignore_ascii_case(name))
        .map(|index| ActorKind(index as u16))
}

pub fn kinds() -> impl Iterator<Item = ActorKind> {
    (0..CLASSES.len() as u16).map(ActorKind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_names_are_unique() {
        let mut names: Vec<_> = kinds().map(|kind| class(kind).name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), CLASSES.len());
    }

    #[test]
    fn test_find_by_name() {
        assert_eq!(find("doomimp"), Some(IMP));
        assert_eq!(find("Cyberdemon"), None);
        assert!(class(ROCKET).is_missile());
        assert!(class(BULLET_PUFF).client_spawned());
        assert!(!is_known(ActorKind(500)));
    }
}
