mod actor;
pub mod catalog;
mod level;
mod player;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use glam::IVec3;

pub use actor::{
    Actor, ActorFlags, ActorProperties, ActorState, FRACUNIT, FrameOverride, MAX_NET_ID, NetFlags,
    NetId, RenderStyle,
};
pub use catalog::{ActorClass, ActorKind, ClassTraits};
pub use level::{
    Level, LevelChecksums, LightEffect, Line, LineSide, MoverKind, Polyobject, Sector,
    SectorMover, Side, TexturePosition,
};
pub use player::{
    InventoryItem, MAX_HANDICAP, MAX_PLAYER_NAME, NO_TEAM, Player, Powerup, UserInfo,
    UserInfoFlags, clean_player_name,
};

use crate::net::{MAX_CLIENTS, TICRATE};

pub const MAX_TEAMS: usize = 4;
/// Ticks an id-less effect (puff, blood) stays in the world.
pub const UNNAMED_LIFETIME: u32 = TICRATE;
/// Id-less effects kept at once; the oldest goes first.
pub const MAX_UNNAMED: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum GameMode {
    #[default]
    Cooperative = 0,
    Survival = 1,
    Deathmatch = 2,
    TeamPlay = 3,
    Duel = 4,
    LastManStanding = 5,
    TeamLastManStanding = 6,
    CaptureTheFlag = 7,
}

impl GameMode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::Cooperative,
            1 => Self::Survival,
            2 => Self::Deathmatch,
            3 => Self::TeamPlay,
            4 => Self::Duel,
            5 => Self::LastManStanding,
            6 => Self::TeamLastManStanding,
            7 => Self::CaptureTheFlag,
            _ => return None,
        })
    }

    pub fn uses_teams(self) -> bool {
        matches!(
            self,
            Self::TeamPlay | Self::TeamLastManStanding | Self::CaptureTheFlag
        )
    }

    pub fn uses_wins(self) -> bool {
        matches!(
            self,
            Self::Duel | Self::LastManStanding | Self::TeamLastManStanding
        )
    }

    pub fn uses_points(self) -> bool {
        matches!(self, Self::CaptureTheFlag)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Cooperative => "cooperative",
            Self::Survival => "survival",
            Self::Deathmatch => "deathmatch",
            Self::TeamPlay => "team deathmatch",
            Self::Duel => "duel",
            Self::LastManStanding => "last man standing",
            Self::TeamLastManStanding => "team last man standing",
            Self::CaptureTheFlag => "capture the flag",
        }
    }
}

/// Hands out `NetId`s. Searches forward from the last id handed out so a
/// freed id is not reused right away.
#[derive(Debug, Clone, Default)]
pub struct NetIdAllocator {
    used: BTreeSet<u16>,
    cursor: u16,
}

impl NetIdAllocator {
    pub fn allocate(&mut self) -> Option<NetId> {
        let mut candidate = self.cursor;
        for _ in 0..MAX_NET_ID {
            candidate = if candidate >= MAX_NET_ID { 1 } else { candidate + 1 };
            if self.used.insert(candidate) {
                self.cursor = candidate;
                return Some(NetId(candidate));
            }
        }
        None
    }

    /// Marks an id chosen elsewhere (the server) as taken.
    pub fn claim(&mut self, id: NetId) {
        self.used.insert(id.0);
    }

    pub fn release(&mut self, id: NetId) {
        self.used.remove(&id.0);
    }

    pub fn in_use(&self) -> usize {
        self.used.len()
    }

    pub fn clear(&mut self) {
        self.used.clear();
        self.cursor = 0;
    }
}

/// Everything replication can observe: level state, actors with and without
/// `NetId`s, and the player slots.
#[derive(Debug, Clone)]
pub struct World {
    pub level: Level,
    pub game_mode: GameMode,
    pub map_time: u32,
    pub team_scores: [i32; MAX_TEAMS],
    actors: BTreeMap<NetId, Actor>,
    /// Id-less actors with the ticks they have left.
    unnamed: VecDeque<(Actor, u32)>,
    players: Vec<Option<Player>>,
    net_ids: NetIdAllocator,
}

impl World {
    pub fn new(level: Level, game_mode: GameMode) -> Self {
        Self {
            level,
            game_mode,
            map_time: 0,
            team_scores: [0; MAX_TEAMS],
            actors: BTreeMap::new(),
            unnamed: VecDeque::new(),
            players: vec![None; MAX_CLIENTS + 1],
            net_ids: NetIdAllocator::default(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Level::generate(""), GameMode::default())
    }

    /// Switches to `level`, dropping all actors and resetting scores.
    /// Player records survive without their bodies.
    pub fn change_level(&mut self, level: Level) {
        self.level = level;
        self.map_time = 0;
        self.team_scores = [0; MAX_TEAMS];
        self.actors.clear();
        self.unnamed.clear();
        self.net_ids.clear();
        for player in self.players.iter_mut().flatten() {
            player.body = None;
        }
    }

    /// Spawns an actor with a fresh `NetId`. Returns `None` when ids ran out.
    pub fn spawn(&mut self, kind: ActorKind, position: IVec3) -> Option<NetId> {
        let id = self.net_ids.allocate()?;
        let mut actor = Actor::new(kind, position);
        actor.net_id = Some(id);
        self.actors.insert(id, actor);
        Some(id)
    }

    /// Inserts an actor under an id chosen by the server. Replaces any actor
    /// already holding it.
    pub fn insert(&mut self, id: NetId, mut actor: Actor) {
        actor.net_id = Some(id);
        self.net_ids.claim(id);
        self.actors.insert(id, actor);
    }

    pub fn spawn_unnamed(&mut self, actor: Actor) {
        if self.unnamed.len() == MAX_UNNAMED {
            self.unnamed.pop_front();
        }
        self.unnamed.push_back((actor, UNNAMED_LIFETIME));
    }

    /// Ages id-less actors by one tick and drops the expired ones.
    pub fn expire_unnamed(&mut self) {
        self.unnamed.retain_mut(|(_, left)| {
            *left = left.saturating_sub(1);
            *left > 0
        });
    }

    pub fn destroy(&mut self, id: NetId) -> Option<Actor> {
        let actor = self.actors.remove(&id)?;
        self.net_ids.release(id);
        if let Some(slot) = actor.player {
            if let Some(player) = self.player_mut(slot) {
                if player.body == Some(id) {
                    player.body = None;
                }
            }
        }
        Some(actor)
    }

    pub fn actor(&self, id: NetId) -> Option<&Actor> {
        self.actors.get(&id)
    }

    pub fn actor_mut(&mut self, id: NetId) -> Option<&mut Actor> {
        self.actors.get_mut(&id)
    }

    pub fn contains(&self, id: NetId) -> bool {
        self.actors.contains_key(&id)
    }

    /// Actors with ids, in id order.
    pub fn actors(&self) -> impl Iterator<Item = &Actor> {
        self.actors.values()
    }

    pub fn actors_mut(&mut self) -> impl Iterator<Item = &mut Actor> {
        self.actors.values_mut()
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    pub fn unnamed_count(&self) -> usize {
        self.unnamed.len()
    }

    pub fn player(&self, slot: u8) -> Option<&Player> {
        self.players.get(slot as usize)?.as_ref()
    }

    pub fn player_mut(&mut self, slot: u8) -> Option<&mut Player> {
        self.players.get_mut(slot as usize)?.as_mut()
    }

    pub fn set_player(&mut self, player: Player) {
        let slot = player.slot as usize;
        if let Some(entry) = self.players.get_mut(slot) {
            *entry = Some(player);
        }
    }

    /// Clears the slot and destroys the player's body.
    pub fn remove_player(&mut self, slot: u8) -> Option<Player> {
        let player = self.players.get_mut(slot as usize)?.take()?;
        if let Some(body) = player.body {
            self.destroy(body);
        }
        Some(player)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().flatten()
    }

    pub fn player_count(&self) -> usize {
        self.players().count()
    }

    /// Spawns (or respawns) the body of the player in `slot`.
    pub fn spawn_player_body(&mut self, slot: u8, position: IVec3) -> Option<NetId> {
        if let Some(old) = self.player(slot)?.body {
            self.destroy(old);
        }
        let id = self.spawn(catalog::PLAYER, position)?;
        if let Some(actor) = self.actor_mut(id) {
            actor.player = Some(slot);
        }
        let max_health = self.player(slot).map_or(100, |p| p.max_health);
        if let Some(player) = self.player_mut(slot) {
            player.body = Some(id);
            player.health = max_health;
        }
        Some(id)
    }

    pub fn advance(&mut self) {
        self.map_time = self.map_time.wrapping_add(1);
        self.expire_unnamed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_net_ids_are_not_reused_immediately() {
        let mut world = World::empty();
        let a = world.spawn(catalog::IMP, IVec3::ZERO).unwrap();
        world.destroy(a);
        let b = world.spawn(catalog::IMP, IVec3::ZERO).unwrap();
        assert_ne!(a, b);
        assert!(!world.contains(a));
        assert!(world.contains(b));
    }

    #[test]
    fn test_allocator_wraps_and_skips_used_ids() {
        let mut ids = NetIdAllocator::default();
        ids.claim(NetId(1));
        ids.cursor = MAX_NET_ID - 1;
        assert_eq!(ids.allocate(), Some(NetId(MAX_NET_ID)));
        assert_eq!(ids.allocate(), Some(NetId(2)));
    }

    #[test]
    fn test_player_body_lifecycle() {
        let mut world = World::empty();
        world.set_player(Player::new(3, UserInfo::default()));

        let body = world.spawn_player_body(3, IVec3::ZERO).unwrap();
        assert_eq!(world.actor(body).unwrap().player, Some(3));
        assert_eq!(world.player(3).unwrap().body, Some(body));

        let respawned = world.spawn_player_body(3, IVec3::ZERO).unwrap();
        assert!(!world.contains(body));

        world.remove_player(3);
        assert!(!world.contains(respawned));
        assert_eq!(world.player_count(), 0);
    }

    #[test]
    fn test_change_level_drops_actors() {
        let mut world = World::new(Level::generate("MAP01"), GameMode::Deathmatch);
        world.set_player(Player::new(0, UserInfo::default()));
        world.spawn_player_body(0, IVec3::ZERO);
        world.spawn(catalog::DEMON, IVec3::ZERO);

        world.change_level(Level::generate("MAP02"));
        assert_eq!(world.actor_count(), 0);
        assert_eq!(world.player(0).unwrap().body, None);
        assert_eq!(world.level.name, "MAP02");
    }

    #[test]
    fn test_unnamed_actors_expire() {
        let mut world = World::empty();
        for _ in 0..(MAX_UNNAMED + 50) {
            world.spawn_unnamed(Actor::new(catalog::BULLET_PUFF, IVec3::ZERO));
        }
        assert_eq!(world.unnamed_count(), MAX_UNNAMED);

        for _ in 0..UNNAMED_LIFETIME - 1 {
            world.advance();
        }
        world.spawn_unnamed(Actor::new(catalog::BLOOD, IVec3::ZERO));
        world.advance();
        assert_eq!(world.unnamed_count(), 1);
    }
}
