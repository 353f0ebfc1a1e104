//! Datagrams from addresses without a slot, and the three steps that take a
//! client from its first packet to a spawned player.

use std::io;
use std::net::SocketAddr;

use glam::IVec3;

use super::launcher::{LauncherInfo, LauncherPlayer, read_launcher_query};
use super::{Server, ServerEvent};
use crate::command::{Command, PrintLevel, Target, decode_userinfo};
use crate::net::{
    Channel, ClientOpcode, ConnectionError, GAME_VERSION, PROTOCOL_VERSION, PacketReader,
    frame_payload, parse_client_datagram,
};
use crate::session::{ConnectionState, unix_now};
use crate::snapshot::{self, Welcome};
use crate::world::{FRACUNIT, NetId, Player, UserInfo, UserInfoFlags, clean_player_name};

/// Spacing between player spawn spots, in map units.
const SPAWN_SPACING: i32 = 64;

impl Server {
    pub(super) fn process_network(&mut self) -> io::Result<()> {
        for (data, addr) in self.endpoint.receive()? {
            self.handle_datagram(&data, addr, false);
        }

        let lan_datagrams = match self.lan.as_mut() {
            Some(lan) => lan.receive()?,
            None => Vec::new(),
        };
        for (data, addr) in lan_datagrams {
            self.handle_datagram(&data, addr, true);
        }
        Ok(())
    }

    fn handle_datagram(&mut self, data: &[u8], addr: SocketAddr, via_lan: bool) {
        let known = self.connections.find(&addr);
        let payload = match parse_client_datagram(data) {
            Ok(payload) => payload,
            Err(e) => {
                log::debug!("Malformed datagram from {}: {}", addr, e);
                if known.is_none() && !via_lan {
                    self.cooldown.add(addr.ip(), self.tick);
                }
                return;
            }
        };

        if via_lan {
            let mut reader = PacketReader::new(&payload);
            if reader.read_byte() == ClientOpcode::LauncherChallenge as i32 {
                self.answer_launcher(addr, &mut reader, true);
            }
            return;
        }

        match known {
            Some(slot) => self.handle_client_packet(slot, &payload),
            None => self.handle_connectionless(addr, &payload),
        }
    }

    fn handle_connectionless(&mut self, addr: SocketAddr, payload: &[u8]) {
        if self.cooldown.blocks(addr.ip()) {
            log::trace!("Ignoring {} (cooling down)", addr);
            return;
        }

        let mut reader = PacketReader::new(payload);
        let byte = reader.read_byte();
        match u8::try_from(byte).ok().and_then(ClientOpcode::from_byte) {
            Some(ClientOpcode::AttemptConnection) => self.attempt_connection(addr, &mut reader),
            Some(ClientOpcode::LauncherChallenge) => {
                self.answer_launcher(addr, &mut reader, false)
            }
            Some(opcode) => {
                log::debug!("Ignoring {:?} from unconnected {}", opcode, addr);
            }
            None => {
                log::warn!("Unknown connectionless command {} from {}", byte, addr);
                self.cooldown.add(addr.ip(), self.tick);
            }
        }
    }

    /// Free -> Challenge -> Connected, or a refusal.
    pub(super) fn attempt_connection(&mut self, addr: SocketAddr, reader: &mut PacketReader<'_>) {
        let version = reader.read_string();
        let password = reader.read_string();
        let spectate = reader.read_bool();
        let no_restore_frags = reader.read_bool();
        let protocol = reader.read_byte();

        self.pending_events
            .push_back(ServerEvent::ClientConnecting { addr });
        let config = self.options.config().clone();
        let ip = addr.ip();

        if self.connections.count_from_ip(ip) >= config.max_clients_per_ip {
            self.send_rejection(addr, ConnectionError::TooManyConnectionsFromIp);
            return;
        }

        let channel = Channel::new(config.max_packet_size, config.ring_size, config.compression);
        let Some(slot) = self.connections.allocate(addr, channel, self.tick) else {
            self.send_rejection(addr, ConnectionError::ServerIsFull);
            return;
        };

        let ban = if config.enforce_bans {
            self.bans.find(ip, unix_now()).cloned()
        } else {
            None
        };
        let refusal = if protocol != PROTOCOL_VERSION as i32 {
            Some(ConnectionError::WrongProtocolVersion)
        } else if version != GAME_VERSION {
            Some(ConnectionError::WrongVersion {
                server_version: GAME_VERSION.to_string(),
            })
        } else if let Some(ban) = ban {
            Some(ConnectionError::Banned {
                reason: ban.reason,
                expires: ban.expires.clamp(0, i32::MAX as i64) as i32,
            })
        } else if config.force_password && !password.eq_ignore_ascii_case(&config.password) {
            Some(ConnectionError::WrongPassword)
        } else {
            None
        };

        if let Some(error) = refusal {
            self.connections.release(slot);
            self.send_rejection(addr, error);
            return;
        }

        let Some(conn) = self.connections.get_mut(slot) else {
            return;
        };
        conn.transition(ConnectionState::Connected);
        conn.wants_spectate = spectate;
        conn.no_restore_frags = no_restore_frags;

        self.bus.forget_client(slot);
        let map = self.world.level.name.clone();
        self.send(Target::Only(slot), Command::Authenticate { map });

        log::info!("Client {} connected in slot {}", addr, slot);
        self.pending_events
            .push_back(ServerEvent::ClientConnected { slot, addr });
    }

    /// Connected -> Authenticated once the client proves it loaded the
    /// running level.
    pub(super) fn authenticate(&mut self, slot: u8, reader: &mut PacketReader<'_>) {
        let checksums: Vec<String> = (0..5).map(|_| reader.read_string()).collect();
        let state = self.connection_state(slot);
        if !matches!(
            state,
            ConnectionState::Connected | ConnectionState::AuthenticatedButOutdatedMap
        ) {
            log::debug!("Client {} re-sent authentication while {}", slot, state.name());
            return;
        }

        let expected = self.world.level.checksums().as_array();
        let valid = checksums.len() == expected.len()
            && checksums.iter().zip(expected).all(|(got, want)| got == want);
        if !valid {
            log::warn!(
                "Client {} failed to authenticate {}",
                slot,
                self.world.level.name
            );
            self.refuse_client(slot, ConnectionError::AuthenticationFailed);
            return;
        }

        if let Some(conn) = self.connections.get_mut(slot) {
            conn.transition(ConnectionState::Authenticated);
        }
        let game_mode = self.world.game_mode;
        self.send(Target::Only(slot), Command::MapLoad { game_mode });
        self.pending_events
            .push_back(ServerEvent::ClientAuthenticated { slot });
    }

    /// Authenticated -> Spawned: creates the player, sends the full update
    /// and introduces the player to everyone else.
    pub(super) fn request_snapshot(&mut self, slot: u8, reader: &mut PacketReader<'_>) {
        match self.connection_state(slot) {
            ConnectionState::Authenticated => {}
            ConnectionState::AuthenticatedButOutdatedMap => {
                reader.drain();
                let map = self.world.level.name.clone();
                self.send(Target::Only(slot), Command::Authenticate { map });
                return;
            }
            ConnectionState::Spawned => {
                reader.drain();
                self.resend_own_spawn(slot);
                return;
            }
            state => {
                reader.drain();
                log::debug!("Client {} asked for a snapshot while {}", slot, state.name());
                return;
            }
        }

        if reader.is_exhausted() {
            self.refuse_client(slot, ConnectionError::FailedToSendUserInfo);
            return;
        }
        let (flags, info) = match decode_userinfo(reader) {
            Ok(userinfo) => userinfo,
            Err(e) => {
                log::warn!("Client {} sent bad userinfo: {}", slot, e);
                self.refuse_client(slot, ConnectionError::FailedToSendUserInfo);
                return;
            }
        };

        let Some((ip, spectate, no_restore_frags)) = self
            .connections
            .get(slot)
            .map(|c| (c.addr.ip(), c.wants_spectate, c.no_restore_frags))
        else {
            return;
        };

        let mut player = match self.world.player(slot) {
            // Rejoining after a map change.
            Some(existing) => existing.clone(),
            None => Player::new(slot, UserInfo::default()),
        };
        player.userinfo.merge(flags, &info);
        player.userinfo.name = clean_player_name(&player.userinfo.name);
        if player.userinfo.name.is_empty() {
            player.userinfo.name = UserInfo::default().name;
        }
        if self.world.player(slot).is_none() && !no_restore_frags {
            let key = (ip, player.userinfo.name.clone());
            if let Some(saved) = self.saved_scores.remove(&key) {
                log::info!("Restored scores for {}", player.userinfo.name);
                player.frags = saved.frags;
                player.points = saved.points;
                player.wins = saved.wins;
            }
        }
        player.spectating = spectate;
        if self.world.game_mode.uses_teams() && player.team.is_none() {
            player.team = Some(self.smallest_team());
        }
        let name = player.userinfo.name.clone();
        self.world.set_player(player);
        let spot = IVec3::new(slot as i32 * SPAWN_SPACING * FRACUNIT, 0, 0);
        let body = self.world.spawn_player_body(slot, spot);

        let config = self.options.config();
        let commands = snapshot::full_update(
            &self.world,
            slot,
            Welcome {
                host_name: &config.host_name,
                motd: &config.motd,
            },
        );
        for command in commands {
            self.send(Target::Only(slot), command);
        }

        if let Some(body) = body {
            self.send(
                Target::AllBut(slot),
                Command::SpawnPlayer {
                    slot,
                    body,
                    position: spot,
                    angle: 0,
                    spectating: spectate,
                },
            );
        }
        let userinfo = self.world.player(slot).map(|p| (p.userinfo.clone(), p.team));
        if let Some((info, team)) = userinfo {
            self.send(
                Target::AllBut(slot),
                Command::SetPlayerUserInfo {
                    slot,
                    flags: UserInfoFlags::all(),
                    info,
                },
            );
            if self.world.game_mode.uses_teams() {
                self.send(Target::AllBut(slot), Command::SetPlayerTeam { slot, team });
            }
        }
        if spectate {
            self.send(
                Target::AllBut(slot),
                Command::PlayerIsSpectator {
                    slot,
                    dead_spectator: false,
                },
            );
        }

        if let Some(conn) = self.connections.get_mut(slot) {
            conn.transition(ConnectionState::Spawned);
        }
        self.send(
            Target::All,
            Command::Print {
                level: PrintLevel::Medium,
                text: format!("{} entered the game.", name),
            },
        );

        log::info!("{} spawned in slot {}", name, slot);
        self.pending_events
            .push_back(ServerEvent::ClientSpawned { slot, name });
    }

    /// A spawned client asking again gets its own spawn back, not a
    /// second body.
    fn resend_own_spawn(&mut self, slot: u8) {
        let Some(player) = self.world.player(slot) else {
            return;
        };
        let spectating = player.spectating;
        let Some(body) = player.body.and_then(|id| self.world.actor(id)) else {
            return;
        };
        let command = Command::SpawnPlayer {
            slot,
            body: body.net_id.unwrap_or(NetId(0)),
            position: body.position,
            angle: body.angle,
            spectating,
        };
        self.send(Target::Only(slot), command);
    }

    fn smallest_team(&self) -> u8 {
        (0..2u8)
            .min_by_key(|team| {
                self.world
                    .players()
                    .filter(|p| p.team == Some(*team))
                    .count()
            })
            .unwrap_or(0)
    }

    pub(super) fn answer_launcher(
        &mut self,
        addr: SocketAddr,
        reader: &mut PacketReader<'_>,
        via_lan: bool,
    ) {
        let Some((flags, time)) = read_launcher_query(reader) else {
            log::debug!("Short launcher query from {}", addr);
            return;
        };

        let config = self.options.config();
        let info = LauncherInfo {
            time,
            version: GAME_VERSION.to_string(),
            host_name: config.host_name.clone(),
            map: self.world.level.name.clone(),
            game_mode: self.world.game_mode,
            player_count: self.world.player_count() as u8,
            max_clients: config.max_clients as u8,
            passworded: config.force_password,
            players: self
                .world
                .players()
                .map(|p| LauncherPlayer {
                    name: p.userinfo.name.clone(),
                    frags: p.frags,
                    ping: p.ping,
                    spectating: p.spectating,
                })
                .collect(),
        };
        let reply = frame_payload(&info.encode(flags), true);

        let sent = match self.lan.as_mut() {
            Some(lan) if via_lan => lan.send_to(&reply, addr),
            _ => self.endpoint.send_to(&reply, addr),
        };
        if let Err(e) = sent {
            log::warn!("Failed to answer launcher {}: {}", addr, e);
        }
    }
}
