use glam::IVec3;

use super::{DisconnectReason, Server, ServerEvent};
use crate::command::{Command, PrintLevel, Target, decode_userinfo};
use crate::net::{ClientOpcode, END_OF_MISSING_LIST, PacketReader};
use crate::session::ConnectionState;
use crate::world::{UserInfoFlags, clean_player_name};

/// Bytes in a `ClientMove`: three position longs and the angle.
const CLIENT_MOVE_SIZE: usize = 16;

impl Server {
    /// Runs every command in a datagram from a client that holds a slot.
    pub(super) fn handle_client_packet(&mut self, slot: u8, payload: &[u8]) {
        let Some(conn) = self.connections.get_mut(slot) else {
            return;
        };
        conn.touch(self.tick);
        let addr = conn.addr;
        let id = conn.id();

        let mut reader = PacketReader::new(payload);
        while !reader.is_exhausted() {
            let byte = reader.read_byte();
            let Some(opcode) = u8::try_from(byte).ok().and_then(ClientOpcode::from_byte) else {
                log::warn!("Client {} sent unknown command {}", slot, byte);
                self.kick_client(slot, "Unknown client command.", false);
                return;
            };

            let state = self.connection_state(slot);
            if state == ConnectionState::AuthenticatedButOutdatedMap
                && !matches!(
                    opcode,
                    ClientOpcode::AttemptAuthentication
                        | ClientOpcode::RequestSnapshot
                        | ClientOpcode::MissingPacket
                        | ClientOpcode::Pong
                        | ClientOpcode::Quit
                )
            {
                reader.drain();
                return;
            }

            match opcode {
                ClientOpcode::AttemptConnection => {
                    // Starting over from the same address.
                    self.disconnect(slot, DisconnectReason::Graceful);
                    self.attempt_connection(addr, &mut reader);
                    return;
                }
                ClientOpcode::AttemptAuthentication => self.authenticate(slot, &mut reader),
                ClientOpcode::RequestSnapshot => self.request_snapshot(slot, &mut reader),
                ClientOpcode::UserInfo => self.change_userinfo(slot, &mut reader),
                ClientOpcode::Quit => {
                    self.disconnect(slot, DisconnectReason::Graceful);
                    return;
                }
                ClientOpcode::ClientMove => self.client_move(slot, &mut reader),
                ClientOpcode::MissingPacket => self.missing_packets(slot, &mut reader),
                ClientOpcode::Pong => self.pong(slot, &mut reader),
                ClientOpcode::LauncherChallenge => {
                    self.answer_launcher(addr, &mut reader, false);
                    return;
                }
            }

            // The command may have freed the slot, or handed it to someone new.
            if self.connections.resolve(id).is_none() {
                return;
            }
        }
    }

    fn change_userinfo(&mut self, slot: u8, reader: &mut PacketReader<'_>) {
        let (flags, mut info) = match decode_userinfo(reader) {
            Ok(userinfo) => userinfo,
            Err(e) => {
                log::warn!("Client {} sent bad userinfo: {}", slot, e);
                self.kick_client(slot, "Malformed userinfo.", false);
                return;
            }
        };
        if self.world.player(slot).is_none() {
            return;
        }

        let flooding = self
            .connections
            .get_mut(slot)
            .is_some_and(|c| c.userinfo_flood.record(self.tick));
        if flooding {
            self.kick_client(slot, "Userinfo flooding.", false);
            return;
        }

        let mut flags = flags;
        if flags.contains(UserInfoFlags::NAME) {
            info.name = clean_player_name(&info.name);
            if info.name.is_empty() {
                flags.remove(UserInfoFlags::NAME);
            }
        }

        let Some(player) = self.world.player_mut(slot) else {
            return;
        };
        let old_name = player.userinfo.name.clone();
        player.userinfo.merge(flags, &info);
        let merged = player.userinfo.clone();

        self.send(
            Target::All,
            Command::SetPlayerUserInfo {
                slot,
                flags,
                info: merged.clone(),
            },
        );
        if merged.name != old_name {
            self.send(
                Target::All,
                Command::Print {
                    level: PrintLevel::Medium,
                    text: format!("{} is now known as {}", old_name, merged.name),
                },
            );
        }
    }

    fn client_move(&mut self, slot: u8, reader: &mut PacketReader<'_>) {
        if reader.remaining() < CLIENT_MOVE_SIZE {
            self.kick_client(slot, "Malformed movement.", false);
            return;
        }
        let position = IVec3::new(reader.read_long(), reader.read_long(), reader.read_long());
        let angle = reader.read_long() as u32;

        if self.connection_state(slot) != ConnectionState::Spawned {
            return;
        }
        let Some(body) = self.world.player(slot).and_then(|p| p.body) else {
            return;
        };
        if let Some(actor) = self.world.actor_mut(body) {
            actor.velocity = position.wrapping_sub(actor.position);
            actor.position = position;
            actor.angle = angle;
        }
    }

    /// Resends reliable packets the client says it never got. The whole
    /// list is checked before anything goes out.
    fn missing_packets(&mut self, slot: u8, reader: &mut PacketReader<'_>) {
        let mut sequences: Vec<i32> = Vec::new();
        let mut valid = true;
        loop {
            if reader.remaining() < 4 {
                valid = false;
                break;
            }
            let sequence = reader.read_long();
            if sequence == END_OF_MISSING_LIST {
                break;
            }
            if sequence < 0 || sequences.last().is_some_and(|last| sequence <= *last) {
                valid = false;
            }
            sequences.push(sequence);
        }

        let tick = self.tick;
        let Some(conn) = self.connections.get_mut(slot) else {
            return;
        };
        if !conn.missing_request_allowed(tick) {
            log::debug!("Client {} asked for missing packets too often", slot);
            return;
        }
        if !valid {
            log::warn!("Client {} sent invalid missing list {:?}", slot, sequences);
            self.kick_client(slot, "Invalid missing packet request.", false);
            return;
        }
        if let Some(lost) = sequences
            .iter()
            .find(|s| !conn.channel.ring().contains(**s))
        {
            log::warn!("Client {} needs packet {} which is gone", slot, lost);
            self.kick_client(slot, "Too many missed packets.", true);
            return;
        }

        for sequence in &sequences {
            conn.channel.resend(*sequence);
        }
        conn.last_missing_request = Some(tick);

        if !sequences.is_empty() {
            log::debug!("Resent {:?} to client {}", sequences, slot);
            self.pending_events.push_back(ServerEvent::PacketsResent {
                slot,
                count: sequences.len(),
            });
        }
    }

    fn pong(&mut self, slot: u8, reader: &mut PacketReader<'_>) {
        if reader.remaining() < 4 {
            return;
        }
        let sent = reader.read_long();
        let sample = self.clock_ms().wrapping_sub(sent);
        if sample < 0 {
            return;
        }
        let Some(conn) = self.connections.get_mut(slot) else {
            return;
        };
        let average = conn.ping.record(sample as u32);
        if let Some(player) = self.world.player_mut(slot) {
            player.ping = average.min(u16::MAX as u32) as u16;
        }
    }
}
