use std::collections::HashMap;

use glam::IVec3;

use crate::command::PrintLevel;
use crate::net::ConnectionError;
use crate::world::{GameMode, NetId, Player, World};

const MAX_MESSAGES: usize = 128;

/// Session-level events raised while applying commands. The session acts on
/// them after each packet.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    ConnectError(ConnectionError),
    Authenticate { map: String },
    MapLoaded { game_mode: GameMode },
    Ping { time: i32 },
    Kicked { reason: String, reconnect: bool },
    SnapshotCompleted,
}

/// The client's copy of the server world, built only from received commands.
#[derive(Debug, Clone)]
pub struct ClientState {
    pub world: World,
    pub console_player: Option<u8>,
    /// Last position received per actor; `MoveThing` reuse bits refer to it.
    pub last_positions: HashMap<NetId, IVec3>,
    pub local_tick: u32,
    pub motd: Option<String>,
    pub messages: Vec<(PrintLevel, String)>,
    pub receiving_snapshot: bool,
    pub snapshot_complete: bool,
    notices: Vec<SessionNotice>,
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientState {
    pub fn new() -> Self {
        Self {
            world: World::empty(),
            console_player: None,
            last_positions: HashMap::new(),
            local_tick: 0,
            motd: None,
            messages: Vec::new(),
            receiving_snapshot: false,
            snapshot_complete: false,
            notices: Vec::new(),
        }
    }

    pub(crate) fn notify(&mut self, notice: SessionNotice) {
        self.notices.push(notice);
    }

    pub fn take_notices(&mut self) -> Vec<SessionNotice> {
        std::mem::take(&mut self.notices)
    }

    pub fn console(&self) -> Option<&Player> {
        self.world.player(self.console_player?)
    }

    /// Keeps the message log bounded.
    pub(crate) fn trim_messages(&mut self) {
        if self.messages.len() > MAX_MESSAGES {
            let excess = self.messages.len() - MAX_MESSAGES;
            self.messages.drain(..excess);
        }
    }

    /// One client tick of local upkeep. Id-less effects live only here, so
    /// the client ages them out itself.
    pub fn advance(&mut self) {
        self.world.expire_unnamed();
    }

    /// Forgets everything received; used before reconnecting.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
