//! The client half of a connection: handshake, in-order delivery of
//! reliable packets and recovery of the ones that went missing.
//!
//! ```text
//! ┌────────────┐  Authenticate   ┌────────────────┐  MapLoad   ┌─────────┐
//! │ Connecting │ ──────────────▶ │ Authenticating │ ─────────▶ │ Loading │
//! └────────────┘                 └────────────────┘            └─────────┘
//!       │ ConnectError                                              │
//!       ▼                                        FullUpdateCompleted│
//! ┌────────────┐                                                    ▼
//! │  Refused   │                                               ┌─────────┐
//! └────────────┘                                               │ Spawned │
//!                                                              └─────────┘
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use glam::IVec3;

use super::state::{ClientState, SessionNotice};
use crate::command::{Command, CommandRegistry, RegistryError, write_userinfo};
use crate::net::{
    ClientOpcode, ConnectionError, END_OF_MISSING_LIST, GAME_VERSION, NetworkEndpoint,
    NetworkStats, PROTOCOL_VERSION, PacketBuffer, PacketLossSimulation, PacketReader,
    ServerDatagram, TICRATE, client_datagram, parse_client_datagram, parse_server_datagram,
};
use crate::server::launcher::{LauncherInfo, launcher_query};
use crate::world::{UserInfo, UserInfoFlags};

/// Ticks between two missing-packet requests. One more than the server's
/// own limit so a request is never dropped for arriving early.
const MISSING_RETRY_TICKS: u32 = TICRATE / 4 + 1;
/// Ticks without an answer before the connection attempt is repeated.
const CONNECT_RETRY_TICKS: u32 = TICRATE;
const MAX_CONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Io(#[from] io::Error),
    #[error("command table: {0}")]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: SocketAddr,
    pub password: String,
    pub userinfo: UserInfo,
    pub spectate: bool,
    /// Ask the server not to hand back scores from an earlier visit.
    pub no_restore_frags: bool,
    pub compression: bool,
    /// Reconnect on its own when kicked with the reconnect flag.
    pub auto_reconnect: bool,
    pub packet_loss: Option<PacketLossSimulation>,
}

impl ClientConfig {
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            password: String::new(),
            userinfo: UserInfo::default(),
            spectate: false,
            no_restore_frags: false,
            compression: true,
            auto_reconnect: true,
            packet_loss: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.userinfo.name = name.to_string();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPhase {
    Connecting,
    Authenticating,
    Loading,
    Spawned,
    Refused(ConnectionError),
    Kicked(String),
    Disconnected,
}

impl ClientPhase {
    /// The server holds a slot for us.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Authenticating | Self::Loading | Self::Spawned)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Refused(_) | Self::Kicked(_) | Self::Disconnected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Refused(ConnectionError),
    Authenticating { map: String },
    Spawned { slot: u8 },
    Kicked { reason: String, reconnect: bool },
    Reconnecting,
    MissingRequested { sequences: Vec<i32> },
    Disconnected,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub reliable_applied: u64,
    pub unreliable_applied: u64,
    pub duplicates: u64,
    pub held_back: u64,
    pub missing_requests: u64,
    pub malformed: u64,
    pub rejected_commands: u64,
}

pub struct ClientSession {
    endpoint: NetworkEndpoint,
    config: ClientConfig,
    registry: CommandRegistry,
    state: ClientState,
    phase: ClientPhase,
    /// Next reliable sequence to apply.
    expected: i32,
    /// Reliable packets that arrived ahead of a gap.
    held: BTreeMap<i32, Vec<u8>>,
    last_missing_request: Option<u32>,
    tick: u32,
    connect_sent_at: u32,
    connect_attempts: u32,
    /// Where we want our body to be; sent with every move.
    intent: Option<(IVec3, u32)>,
    events: VecDeque<ClientEvent>,
    stats: SessionStats,
}

impl ClientSession {
    /// Binds a local socket and sends the first connection attempt.
    pub fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let bind = match config.server {
            SocketAddr::V4(addr) if addr.ip().is_loopback() => "127.0.0.1:0",
            SocketAddr::V4(_) => "0.0.0.0:0",
            SocketAddr::V6(_) => "[::]:0",
        };
        let mut endpoint = NetworkEndpoint::bind(bind)?;
        endpoint.set_remote(config.server);
        if let Some(simulation) = config.packet_loss {
            endpoint.set_packet_loss(simulation);
        }

        let mut session = Self {
            endpoint,
            config,
            registry: CommandRegistry::new()?,
            state: ClientState::new(),
            phase: ClientPhase::Connecting,
            expected: 0,
            held: BTreeMap::new(),
            last_missing_request: None,
            tick: 0,
            connect_sent_at: 0,
            connect_attempts: 0,
            intent: None,
            events: VecDeque::new(),
            stats: SessionStats::default(),
        };
        session.send_connect()?;
        Ok(session)
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn phase(&self) -> &ClientPhase {
        &self.phase
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn network_stats(&self) -> &NetworkStats {
        self.endpoint.stats()
    }

    pub fn expected_sequence(&self) -> i32 {
        self.expected
    }

    pub fn held_back(&self) -> usize {
        self.held.len()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.events.drain(..)
    }

    /// Reads everything the socket has and applies it.
    pub fn poll(&mut self) -> io::Result<()> {
        self.endpoint.flush_simulated()?;
        for (data, addr) in self.endpoint.receive()? {
            if addr != self.config.server {
                log::trace!("Ignoring datagram from {}", addr);
                continue;
            }
            match parse_server_datagram(&data) {
                Ok(ServerDatagram::Reliable { sequence, payload }) => {
                    self.receive_reliable(sequence, payload)?;
                }
                Ok(ServerDatagram::Unreliable { payload }) => {
                    self.apply_payload(&payload);
                    self.stats.unreliable_applied += 1;
                }
                Err(e) => {
                    log::debug!("Malformed datagram from server: {}", e);
                    self.stats.malformed += 1;
                }
            }
            self.handle_notices()?;
        }
        Ok(())
    }

    /// One client tick: movement, retries and missing-packet requests.
    pub fn tick(&mut self) -> io::Result<()> {
        self.tick = self.tick.wrapping_add(1);
        self.state.advance();

        if self.phase == ClientPhase::Connecting
            && self.tick.wrapping_sub(self.connect_sent_at) >= CONNECT_RETRY_TICKS
        {
            if self.connect_attempts >= MAX_CONNECT_ATTEMPTS {
                log::warn!("No answer from {}", self.config.server);
                self.set_phase(ClientPhase::Disconnected);
                self.events.push_back(ClientEvent::Disconnected);
            } else {
                self.send_connect()?;
            }
        }

        if self.phase == ClientPhase::Spawned {
            self.send_move()?;
        }
        if !self.held.is_empty() {
            self.request_missing()?;
        }
        Ok(())
    }

    /// Moves our body. The server takes it from here and echoes it back.
    pub fn move_to(&mut self, position: IVec3, angle: u32) -> io::Result<()> {
        self.intent = Some((position, angle));
        if self.phase == ClientPhase::Spawned {
            self.send_move()?;
        }
        Ok(())
    }

    /// Changes our userinfo locally and tells the server which fields changed.
    pub fn set_userinfo(&mut self, flags: UserInfoFlags, info: &UserInfo) -> io::Result<()> {
        self.config.userinfo.merge(flags, info);
        if !self.phase.is_connected() {
            return Ok(());
        }
        let mut buf = PacketBuffer::new(256);
        buf.write_byte(ClientOpcode::UserInfo as u8);
        write_userinfo(&mut buf, flags, &self.config.userinfo);
        self.send_payload(buf.as_bytes())
    }

    pub fn quit(&mut self) -> io::Result<()> {
        if self.phase.is_connected() {
            self.send_payload(&[ClientOpcode::Quit as u8])?;
        }
        self.set_phase(ClientPhase::Disconnected);
        self.events.push_back(ClientEvent::Disconnected);
        Ok(())
    }

    /// Sends raw client commands. The payload starts with an opcode.
    pub fn send_payload(&mut self, payload: &[u8]) -> io::Result<()> {
        let datagram = client_datagram(payload, self.config.compression);
        self.endpoint.send(&datagram)?;
        Ok(())
    }

    fn set_phase(&mut self, phase: ClientPhase) {
        if self.phase != phase {
            log::debug!("Client phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    fn send_connect(&mut self) -> io::Result<()> {
        let mut buf = PacketBuffer::new(128);
        buf.write_byte(ClientOpcode::AttemptConnection as u8);
        buf.write_string(GAME_VERSION);
        buf.write_string(&self.config.password);
        buf.write_bool(self.config.spectate);
        buf.write_bool(self.config.no_restore_frags);
        buf.write_byte(PROTOCOL_VERSION);
        self.connect_sent_at = self.tick;
        self.connect_attempts += 1;
        log::info!(
            "Connecting to {} (attempt {})",
            self.config.server,
            self.connect_attempts
        );
        self.send_payload(buf.as_bytes())
    }

    fn send_move(&mut self) -> io::Result<()> {
        let body = self
            .state
            .console()
            .and_then(|p| p.body)
            .and_then(|id| self.state.world.actor(id));
        // Until the body shows up there is nothing to report.
        let Some((position, angle)) = self
            .intent
            .or_else(|| body.map(|actor| (actor.position, actor.angle)))
        else {
            return Ok(());
        };
        let mut buf = PacketBuffer::new(32);
        buf.write_byte(ClientOpcode::ClientMove as u8);
        buf.write_long(position.x);
        buf.write_long(position.y);
        buf.write_long(position.z);
        buf.write_long(angle as i32);
        self.send_payload(buf.as_bytes())
    }

    fn receive_reliable(&mut self, sequence: i32, payload: Vec<u8>) -> io::Result<()> {
        // Refusals are sent before any channel exists and always carry
        // sequence zero. A kick can land behind a gap that will never be
        // filled. Both are applied as soon as they arrive.
        if sequence != self.expected
            && (sequence == 0 || sequence > self.expected)
            && self.ends_session(&payload)
        {
            self.apply_payload(&payload);
            return Ok(());
        }
        if sequence < self.expected {
            self.stats.duplicates += 1;
            return Ok(());
        }
        if sequence > self.expected {
            self.stats.held_back += 1;
            self.held.insert(sequence, payload);
            return self.request_missing();
        }

        self.apply_payload(&payload);
        self.stats.reliable_applied += 1;
        self.expected += 1;
        while let Some(next) = self.held.remove(&self.expected) {
            self.apply_payload(&next);
            self.stats.reliable_applied += 1;
            self.expected += 1;
        }
        Ok(())
    }

    fn ends_session(&self, payload: &[u8]) -> bool {
        self.registry.decode_all(payload).is_ok_and(|commands| {
            commands.iter().any(|c| {
                matches!(
                    c,
                    Command::ConnectError(_) | Command::ConsolePlayerKicked { .. }
                )
            })
        })
    }

    /// Asks for every sequence between the next expected one and the newest
    /// held packet that has not arrived.
    fn request_missing(&mut self) -> io::Result<()> {
        let Some(&newest) = self.held.keys().next_back() else {
            return Ok(());
        };
        if self
            .last_missing_request
            .is_some_and(|last| self.tick.wrapping_sub(last) < MISSING_RETRY_TICKS)
        {
            return Ok(());
        }
        let sequences: Vec<i32> = (self.expected..newest)
            .filter(|s| !self.held.contains_key(s))
            .collect();
        if sequences.is_empty() {
            return Ok(());
        }

        let mut buf = PacketBuffer::new(8 + sequences.len() * 4);
        buf.write_byte(ClientOpcode::MissingPacket as u8);
        for sequence in &sequences {
            buf.write_long(*sequence);
        }
        buf.write_long(END_OF_MISSING_LIST);
        self.send_payload(buf.as_bytes())?;

        log::debug!("Requested missing packets {:?}", sequences);
        self.last_missing_request = Some(self.tick);
        self.stats.missing_requests += 1;
        self.events
            .push_back(ClientEvent::MissingRequested { sequences });
        Ok(())
    }

    /// Applies commands one at a time; a bad command ends the packet but
    /// keeps what came before it.
    fn apply_payload(&mut self, payload: &[u8]) {
        let mut reader = PacketReader::new(payload);
        loop {
            match self.registry.decode_next(&mut reader) {
                Ok(Some(command)) => {
                    let name = command.name();
                    if let Err(e) = self.registry.apply(command, &mut self.state) {
                        log::warn!("Rejected {}: {}", name, e);
                        self.stats.rejected_commands += 1;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Undecodable command from server: {}", e);
                    self.stats.malformed += 1;
                    break;
                }
            }
        }
        self.state.trim_messages();
    }

    fn handle_notices(&mut self) -> io::Result<()> {
        for notice in self.state.take_notices() {
            match notice {
                SessionNotice::ConnectError(error) => {
                    log::warn!("Connection refused: {}", error);
                    self.set_phase(ClientPhase::Refused(error.clone()));
                    self.events.push_back(ClientEvent::Refused(error));
                }
                SessionNotice::Authenticate { map } => {
                    self.set_phase(ClientPhase::Authenticating);
                    let mut buf = PacketBuffer::new(256);
                    buf.write_byte(ClientOpcode::AttemptAuthentication as u8);
                    for checksum in self.state.world.level.checksums().as_array() {
                        buf.write_string(checksum);
                    }
                    self.send_payload(buf.as_bytes())?;
                    self.events.push_back(ClientEvent::Authenticating { map });
                }
                SessionNotice::MapLoaded { .. } => {
                    self.set_phase(ClientPhase::Loading);
                    let mut buf = PacketBuffer::new(256);
                    buf.write_byte(ClientOpcode::RequestSnapshot as u8);
                    write_userinfo(&mut buf, UserInfoFlags::all(), &self.config.userinfo);
                    self.send_payload(buf.as_bytes())?;
                }
                SessionNotice::Ping { time } => {
                    let mut buf = PacketBuffer::new(8);
                    buf.write_byte(ClientOpcode::Pong as u8);
                    buf.write_long(time);
                    self.send_payload(buf.as_bytes())?;
                }
                SessionNotice::Kicked { reason, reconnect } => {
                    log::warn!("Kicked: {}", reason);
                    self.events.push_back(ClientEvent::Kicked {
                        reason: reason.clone(),
                        reconnect,
                    });
                    if reconnect && self.config.auto_reconnect {
                        self.reconnect()?;
                        // Anything queued after the kick belongs to the old
                        // connection.
                        self.state.take_notices();
                        return Ok(());
                    }
                    self.set_phase(ClientPhase::Kicked(reason));
                }
                SessionNotice::SnapshotCompleted => {
                    self.set_phase(ClientPhase::Spawned);
                    if let Some(slot) = self.state.console_player {
                        log::info!("Spawned as player {}", slot);
                        self.events.push_back(ClientEvent::Spawned { slot });
                    }
                }
            }
        }
        Ok(())
    }

    fn reconnect(&mut self) -> io::Result<()> {
        self.state.reset();
        self.expected = 0;
        self.held.clear();
        self.last_missing_request = None;
        self.connect_attempts = 0;
        self.intent = None;
        self.set_phase(ClientPhase::Connecting);
        self.events.push_back(ClientEvent::Reconnecting);
        self.send_connect()
    }
}

/// Asks a server for its launcher summary and waits up to `timeout` for the
/// answer.
pub fn query_server(
    server: SocketAddr,
    flags: i32,
    timeout: Duration,
) -> io::Result<Option<LauncherInfo>> {
    let bind = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let mut endpoint = NetworkEndpoint::bind(bind)?;
    let started = Instant::now();
    let time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i32)
        .unwrap_or(0);
    endpoint.send_to(&client_datagram(&launcher_query(flags, time), true), server)?;

    while started.elapsed() < timeout {
        for (data, addr) in endpoint.receive()? {
            if addr != server {
                continue;
            }
            let Ok(payload) = parse_client_datagram(&data) else {
                continue;
            };
            if let Some(info) = LauncherInfo::decode(&payload) {
                return Ok(Some(info));
            }
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    Ok(None)
}
