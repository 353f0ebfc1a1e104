use glam::IVec3;

use super::{DisconnectReason, Server};
use crate::command::{Command, Target};
use crate::net::TICRATE;
use crate::session::ConnectionState;

const MOVE_INTERVAL: u32 = 3;
const SPECTATOR_KEEPALIVE: u32 = 3 * TICRATE;
const PING_BROADCAST: u32 = 4 * TICRATE;
const MAP_TIME_BROADCAST: u32 = 60 * TICRATE;

struct BodyMove {
    slot: u8,
    position: IVec3,
    velocity: IVec3,
    angle: u32,
    pitch: i32,
}

impl Server {
    /// Periodic traffic that keeps clients in sync without anything having
    /// changed.
    pub(super) fn send_heartbeats(&mut self) {
        let tick = self.tick;
        if tick % TICRATE == 0 {
            self.send_pings();
        }
        if tick % MOVE_INTERVAL == 0 {
            self.send_player_moves();
        }
        if tick % SPECTATOR_KEEPALIVE == 0 {
            let spectators: Vec<u8> = self
                .world
                .players()
                .filter(|p| p.spectating)
                .map(|p| p.slot)
                .collect();
            for slot in spectators {
                if self.connection_state(slot) == ConnectionState::Spawned {
                    self.send(Target::Only(slot), Command::Nothing);
                }
            }
        }
        if tick % PING_BROADCAST == 0 {
            let pings: Vec<(u8, u16)> = self.world.players().map(|p| (p.slot, p.ping)).collect();
            for (slot, ping) in pings {
                self.send(Target::All, Command::UpdatePlayerPing { slot, ping });
            }
        }
        if tick % MAP_TIME_BROADCAST == 0 {
            let time = self.world.map_time;
            self.send(Target::All, Command::SetMapTime { time });
        }
    }

    fn send_pings(&mut self) {
        let time = self.clock_ms();
        for slot in self.connections.slots() {
            let Some(conn) = self.connections.get_mut(slot) else {
                continue;
            };
            if conn.state() < ConnectionState::Connected {
                continue;
            }
            conn.ping.last_sent_ms = Some(time);
            self.send(Target::Only(slot), Command::Ping { time });
        }
    }

    /// Every spawned client hears where the other players are, and where
    /// the server thinks it is.
    fn send_player_moves(&mut self) {
        let moves: Vec<BodyMove> = self
            .world
            .players()
            .filter(|p| !p.spectating)
            .filter_map(|p| {
                let body = self.world.actor(p.body?)?;
                Some(BodyMove {
                    slot: p.slot,
                    position: body.position,
                    velocity: body.velocity,
                    angle: body.angle,
                    pitch: body.pitch,
                })
            })
            .collect();
        if moves.is_empty() {
            return;
        }

        let tick = self.tick;
        for receiver in self.connections.slots() {
            if self.connection_state(receiver) != ConnectionState::Spawned {
                continue;
            }
            for mv in &moves {
                let command = if mv.slot == receiver {
                    Command::MoveLocalPlayer {
                        tick,
                        position: mv.position,
                        velocity: mv.velocity,
                    }
                } else {
                    Command::MovePlayer {
                        slot: mv.slot,
                        position: mv.position,
                        velocity: mv.velocity,
                        angle: mv.angle,
                        pitch: mv.pitch,
                    }
                };
                self.send(Target::Only(receiver), command);
            }
        }
    }

    /// Drops silent clients and flags the ones going quiet.
    pub(super) fn check_timeouts(&mut self) {
        let config = self.options.config();
        let (timeout, lagging_after) = (config.timeout_ticks, config.lagging_ticks);

        let mut timed_out = Vec::new();
        let mut lag_changes = Vec::new();
        for conn in self.connections.iter_mut() {
            let silent = conn.silent_for(self.tick);
            if silent >= timeout {
                timed_out.push(conn.slot);
                continue;
            }
            let lagging = silent >= lagging_after;
            if lagging != conn.lagging {
                conn.lagging = lagging;
                lag_changes.push((conn.slot, lagging));
            }
        }

        for slot in timed_out {
            log::info!("Client {} timed out", slot);
            self.disconnect(slot, DisconnectReason::Timeout);
        }
        for (slot, lagging) in lag_changes {
            let Some(player) = self.world.player_mut(slot) else {
                continue;
            };
            player.lagging = lagging;
            self.send(Target::All, Command::SetPlayerLaggingStatus { slot, lagging });
        }
    }
}
