use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ClientConnecting {
        addr: SocketAddr,
    },
    ClientConnected {
        slot: u8,
        addr: SocketAddr,
    },
    ClientAuthenticated {
        slot: u8,
    },
    ClientSpawned {
        slot: u8,
        name: String,
    },
    ClientDisconnected {
        slot: u8,
        name: String,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    PacketsResent {
        slot: u8,
        count: usize,
    },
    MapChanged {
        map: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Kicked,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
        }
    }
}
