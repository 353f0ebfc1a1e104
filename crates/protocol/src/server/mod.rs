mod config;
mod events;
mod handshake;
mod heartbeat;
pub mod launcher;
mod messages;

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use glam::IVec3;

pub use config::{ConfigError, OptionChange, Options, ServerConfig};
pub use events::{DisconnectReason, ServerEvent};
pub use launcher::{LauncherInfo, LauncherPlayer, QUERY_PLAYERS, launcher_query};

use crate::command::{
    BusStats, Command, CommandBus, MoveBits, PrintLevel, Target, ThingMove, ThingSpawn,
};
use crate::net::{
    AddressCooldown, ConnectionError, DEFAULT_COOLDOWN_TICKS, NetworkEndpoint, NetworkStats,
    PacketBuffer, PacketLossSimulation, TICK_DURATION, TICRATE, frame_payload, reliable_datagram,
};
use crate::session::{BanEntry, BanList, ClientId, ConnectionState, ConnectionTable, unix_now};
use crate::world::{ActorKind, ActorState, FRACUNIT, Level, MAX_TEAMS, NetId, World};

/// Scores kept for a player who left, restored if they come back under the
/// same name from the same address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SavedScore {
    frags: i32,
    points: i32,
    wins: i32,
}

const COOLDOWN_CAPACITY: usize = 64;

pub struct Server {
    endpoint: NetworkEndpoint,
    lan: Option<NetworkEndpoint>,
    options: Options,
    connections: ConnectionTable,
    bus: CommandBus,
    world: World,
    bans: BanList,
    cooldown: AddressCooldown,
    saved_scores: HashMap<(IpAddr, String), SavedScore>,
    tick: u32,
    started: Instant,
    last_tick_time: Instant,
    accumulator: Duration,
    running: Arc<AtomicBool>,
    pending_events: VecDeque<ServerEvent>,
}

impl Server {
    pub fn new(config: ServerConfig) -> io::Result<Self> {
        let mut endpoint = NetworkEndpoint::bind(config.bind_addr())?;
        if let Some(loss) = config.packet_loss {
            endpoint.set_packet_loss(loss);
        }

        let lan = if config.lan_discovery {
            match NetworkEndpoint::bind_broadcast(config.lan_port) {
                Ok(lan) => Some(lan),
                Err(e) => {
                    log::warn!("LAN discovery disabled: port {}: {}", config.lan_port, e);
                    None
                }
            }
        } else {
            None
        };

        let bans = match &config.ban_file {
            Some(path) => BanList::load(path).unwrap_or_else(|e| {
                log::warn!("Starting without bans from {}: {}", path.display(), e);
                BanList::new()
            }),
            None => BanList::new(),
        };

        let mut world = World::new(Level::generate(&config.map), config.game_mode);
        populate(&mut world);

        log::info!(
            "Serving {} ({}) on {}",
            world.level.name,
            world.game_mode.name(),
            endpoint.local_addr()
        );

        let mut pending_events = VecDeque::new();
        pending_events.push_back(ServerEvent::MapChanged {
            map: world.level.name.clone(),
        });

        Ok(Self {
            endpoint,
            lan,
            connections: ConnectionTable::new(config.max_clients),
            options: Options::new(config),
            bus: CommandBus::new(),
            world,
            bans,
            cooldown: AddressCooldown::new(COOLDOWN_CAPACITY, DEFAULT_COOLDOWN_TICKS),
            saved_scores: HashMap::new(),
            tick: 0,
            started: Instant::now(),
            last_tick_time: Instant::now(),
            accumulator: Duration::ZERO,
            running: Arc::new(AtomicBool::new(true)),
            pending_events,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Direct world access. Changes made here are not replicated until a
    /// client takes a full update.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    /// The slot `id` names while its connection lasts.
    pub fn resolve(&self, id: ClientId) -> Option<u8> {
        self.connections.resolve(id)
    }

    pub fn connection_state(&self, slot: u8) -> ConnectionState {
        self.connections
            .get(slot)
            .map_or(ConnectionState::Free, |c| c.state())
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    pub fn bans(&self) -> &BanList {
        &self.bans
    }

    pub fn bans_mut(&mut self) -> &mut BanList {
        &mut self.bans
    }

    pub fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            std::thread::sleep(Duration::from_millis(1));
        }
        self.shutdown_connections();
    }

    pub fn shutdown_connections(&mut self) {
        for slot in self.connections.slots() {
            self.kick_client(slot, "Server shutting down.", false);
        }
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;
        self.accumulator += delta;

        if let Err(e) = self.process_network() {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("Network error: {}", e),
            });
        }

        while self.accumulator >= TICK_DURATION {
            self.accumulator -= TICK_DURATION;
            self.run_tick();
        }
    }

    /// Receives and runs `count` ticks back to back, ignoring wall-clock
    /// time.
    pub fn tick_n(&mut self, count: u32) {
        for _ in 0..count {
            if let Err(e) = self.process_network() {
                self.pending_events.push_back(ServerEvent::Error {
                    message: format!("Network error: {}", e),
                });
            }
            self.run_tick();
        }
    }

    fn run_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
        self.world.advance();
        self.cooldown.expire(self.tick);

        self.send_heartbeats();
        self.check_timeouts();

        if self.tick % TICRATE == 0 {
            let pruned = self.bans.prune(unix_now());
            if pruned > 0 {
                log::info!("{} ban(s) expired", pruned);
                self.save_bans();
            }
        }

        self.flush_all();
    }

    /// Milliseconds since the server started, as sent in pings.
    fn clock_ms(&self) -> i32 {
        self.started.elapsed().as_millis() as i32
    }

    /// Hands `command` to the bus for every connection `target` selects.
    pub fn send(&mut self, target: Target, command: Command) -> usize {
        self.bus
            .send(&self.world, &mut self.connections, self.tick, target, command)
    }

    fn flush_all(&mut self) {
        for conn in self.connections.iter_mut() {
            conn.channel.flush();
            for datagram in conn.channel.take_outgoing() {
                if let Err(e) = self.endpoint.send_to(&datagram, conn.addr) {
                    self.pending_events.push_back(ServerEvent::Error {
                        message: format!("Failed to send to {}: {}", conn.addr, e),
                    });
                }
            }
        }
        if let Err(e) = self.endpoint.flush_simulated() {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("Failed to flush delayed packets: {}", e),
            });
        }
    }

    /// Sends whatever one client has buffered right now.
    fn flush_client(&mut self, slot: u8) {
        let Some(conn) = self.connections.get_mut(slot) else {
            return;
        };
        conn.channel.flush();
        let addr = conn.addr;
        for datagram in conn.channel.take_outgoing() {
            if let Err(e) = self.endpoint.send_to(&datagram, addr) {
                log::warn!("Failed to send to {}: {}", addr, e);
            }
        }
    }

    /// Refuses an address that never got a slot. The refusal travels as
    /// reliable sequence 0 so the client reads it before anything else.
    fn send_rejection(&mut self, addr: SocketAddr, error: ConnectionError) {
        let mut buf = PacketBuffer::new(256);
        Command::ConnectError(error.clone()).encode(&mut buf);
        let frame = frame_payload(buf.as_bytes(), self.options.config().compression);
        if let Err(e) = self.endpoint.send_to(&reliable_datagram(0, &frame), addr) {
            log::warn!("Failed to refuse {}: {}", addr, e);
        }
        log::info!("Refused connection from {}: {}", addr, error);
        self.pending_events.push_back(ServerEvent::ConnectionDenied {
            addr,
            reason: error.to_string(),
        });
    }

    /// Refuses a client that already holds a slot and frees the slot.
    fn refuse_client(&mut self, slot: u8, error: ConnectionError) {
        let Some(addr) = self.connections.get(slot).map(|c| c.addr) else {
            return;
        };
        log::info!("Refusing client {} ({}): {}", slot, addr, error);
        self.send(Target::Only(slot), Command::ConnectError(error.clone()));
        self.flush_client(slot);
        self.pending_events.push_back(ServerEvent::ConnectionDenied {
            addr,
            reason: error.to_string(),
        });
        self.disconnect(slot, DisconnectReason::Kicked);
    }

    fn player_label(&self, slot: u8) -> String {
        match self.world.player(slot) {
            Some(player) => player.userinfo.name.clone(),
            None => self
                .connections
                .get(slot)
                .map_or_else(|| format!("slot {}", slot), |c| c.addr.to_string()),
        }
    }

    pub fn kick(&mut self, slot: u8, reason: &str) -> bool {
        self.kick_client(slot, reason, false)
    }

    /// Tells everyone, then the player (with an immediate flush so the
    /// reason arrives before the slot is freed), then disconnects.
    fn kick_client(&mut self, slot: u8, reason: &str, reconnect: bool) -> bool {
        if self.connections.get(slot).is_none() {
            return false;
        }
        let name = self.player_label(slot);
        log::info!("Kicking {} (slot {}): {}", name, slot, reason);

        self.send(
            Target::All,
            Command::Print {
                level: PrintLevel::High,
                text: format!("{} was kicked from the server! Reason: {}", name, reason),
            },
        );
        self.send(
            Target::Only(slot),
            Command::ConsolePlayerKicked {
                reason: reason.to_string(),
                reconnect,
            },
        );
        self.flush_client(slot);
        self.disconnect(slot, DisconnectReason::Kicked);
        true
    }

    /// Bans the player's address and kicks them. `expires` is unix seconds,
    /// 0 for never.
    pub fn ban(&mut self, slot: u8, reason: &str, expires: i64) -> bool {
        let Some(ip) = self.connections.get(slot).map(|c| c.addr.ip()) else {
            return false;
        };
        let Some(entry) = BanEntry::parse(&ip.to_string(), reason, expires) else {
            log::warn!("Cannot ban non-IPv4 address {}", ip);
            return false;
        };
        log::info!("Banned {} ({})", entry.pattern(), reason);
        self.bans.add(entry);
        self.save_bans();
        self.kick_client(slot, &format!("Banned: {}", reason), false)
    }

    /// Writes the ban list to the ban file, if there is one.
    pub fn save_bans(&self) {
        let Some(path) = &self.options.config().ban_file else {
            return;
        };
        if let Err(e) = self.bans.save(path) {
            log::warn!("Could not save bans to {}: {}", path.display(), e);
        }
    }

    /// Frees the slot and tells the remaining players. Anything still
    /// buffered for the client is dropped.
    fn disconnect(&mut self, slot: u8, reason: DisconnectReason) {
        let name = self.player_label(slot);
        let Some(conn) = self.connections.release(slot) else {
            return;
        };
        self.bus.forget_client(slot);

        if let Some(player) = self.world.player(slot) {
            self.saved_scores.insert(
                (conn.addr.ip(), player.userinfo.name.clone()),
                SavedScore {
                    frags: player.frags,
                    points: player.points,
                    wins: player.wins,
                },
            );
            let body = player.body;

            self.send(Target::All, Command::DisconnectPlayer { slot });
            self.world.remove_player(slot);
            if let Some(body) = body {
                self.bus.forget_actor(body);
            }

            let farewell = match reason {
                DisconnectReason::Graceful => Some(format!("{} disconnected.", name)),
                DisconnectReason::Timeout => Some(format!("{} timed out.", name)),
                DisconnectReason::Kicked => None,
            };
            if let Some(text) = farewell {
                self.send(
                    Target::All,
                    Command::Print {
                        level: PrintLevel::High,
                        text,
                    },
                );
            }

            if self.world.player_count() == 0 {
                self.world.team_scores = [0; MAX_TEAMS];
            }
        }

        log::info!("{} (slot {}, {}) {}", name, slot, conn.addr, reason.as_str());
        self.pending_events.push_back(ServerEvent::ClientDisconnected {
            slot,
            name,
            reason,
        });
    }

    /// Sets an option by name and applies it to live connections.
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        self.options.set(name, value)?;
        for change in self.options.take_changes() {
            let config = self.options.config();
            match change.name {
                "max_packet_size" => {
                    for conn in self.connections.iter_mut() {
                        conn.channel.set_max_packet_size(config.max_packet_size);
                    }
                }
                "compression" => {
                    for conn in self.connections.iter_mut() {
                        conn.channel.set_compression(config.compression);
                    }
                }
                "max_clients" => self.connections.set_max_clients(config.max_clients),
                _ => {}
            }
        }
        Ok(())
    }

    /// Switches every client to a new level. Authenticated clients must
    /// prove they loaded it before they spawn again.
    pub fn change_map(&mut self, map: &str) {
        log::info!("Changing map to {}", map);
        self.world.change_level(Level::generate(map));
        populate(&mut self.world);

        let map = self.world.level.name.clone();
        for slot in self.connections.slots() {
            self.bus.forget_client(slot);
            let Some(conn) = self.connections.get_mut(slot) else {
                continue;
            };
            if matches!(
                conn.state(),
                ConnectionState::Authenticated | ConnectionState::Spawned
            ) {
                conn.transition(ConnectionState::AuthenticatedButOutdatedMap);
            }
            self.send(Target::Only(slot), Command::Authenticate { map: map.clone() });
        }
        self.pending_events.push_back(ServerEvent::MapChanged { map });
    }

    pub fn spawn_actor(&mut self, kind: ActorKind, position: IVec3) -> Option<NetId> {
        let id = self.world.spawn(kind, position)?;
        let exact = position.to_array().iter().any(|v| v % FRACUNIT != 0);
        self.send(
            Target::All,
            Command::SpawnThing(ThingSpawn {
                id: Some(id),
                kind,
                position,
                exact,
            }),
        );
        Some(id)
    }

    pub fn spawn_missile(
        &mut self,
        kind: ActorKind,
        position: IVec3,
        velocity: IVec3,
        target: Option<NetId>,
    ) -> Option<NetId> {
        let id = self.world.spawn(kind, position)?;
        if let Some(actor) = self.world.actor_mut(id) {
            actor.velocity = velocity;
        }
        self.send(
            Target::All,
            Command::SpawnMissile {
                id,
                kind,
                position,
                velocity,
                target,
            },
        );
        Some(id)
    }

    /// Moves an actor and replicates whatever changed.
    pub fn move_actor(&mut self, id: NetId, position: IVec3, velocity: IVec3) -> bool {
        let Some(actor) = self.world.actor_mut(id) else {
            return false;
        };
        let mut bits = MoveBits::empty();
        if actor.position != position {
            bits |= MoveBits::POSITION;
        }
        if actor.velocity != velocity {
            bits |= MoveBits::VELOCITY;
        }
        actor.position = position;
        actor.velocity = velocity;
        if bits.is_empty() {
            return true;
        }

        let mut mv = ThingMove::new(id, bits);
        mv.position = position;
        mv.velocity = velocity;
        mv.exact = position.to_array().iter().any(|v| v % FRACUNIT != 0);
        self.send(Target::All, Command::MoveThing(mv));
        true
    }

    pub fn kill_actor(&mut self, id: NetId, source: Option<NetId>) -> bool {
        let Some(actor) = self.world.actor_mut(id) else {
            return false;
        };
        actor.health = 0;
        actor.state = ActorState::Death;
        self.send(
            Target::All,
            Command::KillThing {
                id,
                health: 0,
                source,
            },
        );
        true
    }

    pub fn destroy_actor(&mut self, id: NetId) -> bool {
        if !self.world.contains(id) {
            return false;
        }
        self.send(Target::All, Command::DestroyThing { id });
        self.world.destroy(id);
        true
    }

    pub fn set_sector_light(&mut self, sector: u16, level: i16) -> bool {
        let Some(s) = self.world.level.sector_mut(sector) else {
            return false;
        };
        s.light_level = level;
        self.send(Target::All, Command::SetSectorLightLevel { sector, level });
        true
    }

    pub fn set_line_alpha(&mut self, line: u16, alpha: i32) -> bool {
        let Some(l) = self.world.level.line_mut(line) else {
            return false;
        };
        l.alpha = alpha;
        self.send(Target::All, Command::SetLineAlpha { line, alpha });
        true
    }

    pub fn set_packet_loss_for(&mut self, slot: u8, sim: PacketLossSimulation) -> bool {
        let Some(addr) = self.connections.get(slot).map(|c| c.addr) else {
            return false;
        };
        self.endpoint.set_packet_loss_for(addr, sim);
        true
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            tick: self.tick,
            map: self.world.level.name.clone(),
            spawned: self.connections.count_in(ConnectionState::Spawned),
            connections: self.connections.len(),
            max_clients: self.connections.max_clients(),
            actor_count: self.world.actor_count(),
            bans: self.bans.len(),
            network_stats: self.endpoint.stats().clone(),
            bus_stats: *self.bus.stats(),
        }
    }

    pub fn client_infos(&self) -> Vec<ClientInfo> {
        self.connections
            .iter()
            .map(|c| ClientInfo {
                id: c.id(),
                slot: c.slot,
                addr: c.addr.to_string(),
                name: self.player_label(c.slot),
                state: c.state(),
                connected_secs: self.tick.wrapping_sub(c.connected_at) / TICRATE,
                ping_ms: c.ping.average(),
                lagging: c.lagging,
                next_sequence: c.channel.next_sequence(),
            })
            .collect()
    }
}

/// Places the level's map things.
fn populate(world: &mut World) {
    for (kind, position) in world.level.things.clone() {
        world.spawn(kind, position);
    }
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub tick: u32,
    pub map: String,
    pub spawned: usize,
    pub connections: usize,
    pub max_clients: usize,
    pub actor_count: usize,
    pub bans: usize,
    pub network_stats: NetworkStats,
    pub bus_stats: BusStats,
}

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: ClientId,
    pub slot: u8,
    pub addr: String,
    pub name: String,
    pub state: ConnectionState,
    pub connected_secs: u32,
    pub ping_ms: u32,
    pub lagging: bool,
    pub next_sequence: i32,
}
