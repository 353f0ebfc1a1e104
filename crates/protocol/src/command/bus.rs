use std::collections::HashMap;

use glam::IVec3;

use super::codec::coarse;
use super::{Command, MoveBits, ThingMove, ThingSpawn};
use crate::net::{MAX_UDP_PACKET, PacketBuffer};
use crate::session::{Connection, ConnectionState, ConnectionTable};
use crate::world::{NetId, World};

/// Who receives a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every spawned client.
    All,
    /// Every spawned client except this slot.
    AllBut(u8),
    /// One client, as soon as it is connected.
    Only(u8),
}

impl Target {
    pub fn includes(self, slot: u8, state: ConnectionState) -> bool {
        match self {
            Self::All => state == ConnectionState::Spawned,
            Self::AllBut(skip) => state == ConnectionState::Spawned && slot != skip,
            Self::Only(only) => slot == only && state >= ConnectionState::Connected,
        }
    }
}

/// What one client was last told about one actor's position.
#[derive(Debug, Clone, Copy, Default)]
struct AxisTrack {
    last: [Option<i32>; 3],
    sent_at: [Option<u32>; 3],
}

impl AxisTrack {
    fn record(&mut self, position: IVec3, tick: u32) {
        for (axis, value) in position.to_array().into_iter().enumerate() {
            self.last[axis] = Some(value);
            self.sent_at[axis] = Some(tick);
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BusStats {
    pub delivered: u64,
    pub dropped: u64,
    pub rerouted: u64,
    pub axes_skipped: u64,
    pub axes_reused: u64,
}

/// Validates commands against the world and fans them out to the channels
/// of the connections a `Target` selects.
#[derive(Debug)]
pub struct CommandBus {
    tracking: HashMap<(u8, NetId), AxisTrack>,
    stats: BusStats,
    scratch: PacketBuffer,
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBus {
    pub fn new() -> Self {
        Self {
            tracking: HashMap::new(),
            stats: BusStats::default(),
            scratch: PacketBuffer::new(MAX_UDP_PACKET),
        }
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    /// Checks the command's subject against the world. Returns the command to
    /// send (possibly rerouted to an id-less form) or `None` to drop it.
    pub fn validate(&mut self, world: &World, command: Command) -> Option<Command> {
        if let Command::SpawnThing(spawn) = &command {
            if let Some(id) = spawn.id {
                match world.actor(id) {
                    Some(actor) if actor.is_client_spawned() => {
                        self.stats.rerouted += 1;
                        return Some(Command::SpawnThing(ThingSpawn { id: None, ..*spawn }));
                    }
                    Some(_) => {}
                    None => {
                        log::debug!("Dropping {} for missing actor {}", command.name(), id);
                        self.stats.dropped += 1;
                        return None;
                    }
                }
            }
        }

        if let Some(id) = command.subject() {
            match world.actor(id) {
                None => {
                    log::debug!("Dropping {} for missing actor {}", command.name(), id);
                    self.stats.dropped += 1;
                    return None;
                }
                // Clients only ever saw the id-less spawn of this actor.
                Some(actor) if actor.is_client_spawned() => {
                    log::debug!("Dropping {} for client-side actor {}", command.name(), id);
                    self.stats.dropped += 1;
                    return None;
                }
                Some(_) => {}
            }
        }

        if let Some(slot) = command.player_subject() {
            if world.player(slot).is_none() {
                log::debug!("Dropping {} for empty slot {}", command.name(), slot);
                self.stats.dropped += 1;
                return None;
            }
        }

        Some(command)
    }

    /// Validates `command` and appends it to every selected connection.
    /// Returns the number of connections it went to.
    pub fn send(
        &mut self,
        world: &World,
        table: &mut ConnectionTable,
        tick: u32,
        target: Target,
        command: Command,
    ) -> usize {
        let Some(command) = self.validate(world, command) else {
            return 0;
        };

        self.scratch.clear();
        command.encode(&mut self.scratch);
        let shared = self.scratch.as_bytes().to_vec();

        let mut recipients = 0;
        for conn in table.iter_mut() {
            if !target.includes(conn.slot, conn.state()) {
                continue;
            }
            if self.deliver(conn, tick, &command, &shared) {
                recipients += 1;
            }
        }

        if let Command::DestroyThing { id } = command {
            self.forget_actor(id);
        }
        self.stats.delivered += recipients as u64;
        recipients
    }

    fn deliver(&mut self, conn: &mut Connection, tick: u32, command: &Command, shared: &[u8]) -> bool {
        let slot = conn.slot;
        match command {
            Command::MoveThing(mv) => {
                let Some(mv) = self.track_move(slot, tick, mv) else {
                    return false;
                };
                self.scratch.clear();
                Command::MoveThing(mv).encode(&mut self.scratch);
                conn.channel.push_reliable(self.scratch.as_bytes());
                return true;
            }
            Command::SpawnThing(ThingSpawn {
                id: Some(id),
                position,
                exact,
                ..
            }) => {
                let position = if *exact {
                    *position
                } else {
                    IVec3::from_array(position.to_array().map(coarse))
                };
                self.tracking
                    .entry((slot, *id))
                    .or_default()
                    .record(position, tick);
            }
            Command::SpawnMissile { id, position, .. } => {
                self.tracking
                    .entry((slot, *id))
                    .or_default()
                    .record(*position, tick);
            }
            Command::SpawnPlayer { body, position, .. } => {
                self.tracking
                    .entry((slot, *body))
                    .or_default()
                    .record(*position, tick);
            }
            _ => {}
        }

        if command.is_unreliable() {
            conn.channel.push_unreliable(shared);
        } else {
            conn.channel.push_reliable(shared);
        }
        true
    }

    /// Rewrites a move for one recipient: axes already sent this tick with
    /// the same value are left out, axes equal to the last value sent become
    /// reuse bits. Returns `None` when nothing is left to send.
    fn track_move(&mut self, slot: u8, tick: u32, mv: &ThingMove) -> Option<ThingMove> {
        let track = self.tracking.entry((slot, mv.id)).or_default();
        let mut out = *mv;
        let position = mv.position.to_array();

        for axis in 0..3 {
            let bit = MoveBits::AXES[axis];
            if !mv.bits.contains(bit) {
                continue;
            }
            let value = if mv.exact {
                position[axis]
            } else {
                coarse(position[axis])
            };

            if track.last[axis] == Some(value) {
                out.bits.remove(bit);
                if track.sent_at[axis] == Some(tick) {
                    self.stats.axes_skipped += 1;
                } else {
                    out.bits.insert(MoveBits::REUSE[axis]);
                    self.stats.axes_reused += 1;
                }
            }
            track.last[axis] = Some(value);
            track.sent_at[axis] = Some(tick);
        }

        (!out.bits.is_empty()).then_some(out)
    }

    /// Drops everything tracked for a client; a reconnecting client starts
    /// with nothing known.
    pub fn forget_client(&mut self, slot: u8) {
        self.tracking.retain(|(s, _), _| *s != slot);
    }

    pub fn forget_actor(&mut self, id: NetId) {
        self.tracking.retain(|(_, a), _| *a != id);
    }

    pub fn tracked(&self) -> usize {
        self.tracking.len()
    }
}
