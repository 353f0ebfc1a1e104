pub mod client;
pub mod command;
pub mod net;
pub mod server;
pub mod session;
pub mod snapshot;
pub mod world;

pub use client::{
    ClientConfig, ClientError, ClientEvent, ClientPhase, ClientSession, ClientState, SessionNotice,
    query_server,
};
pub use command::{Command, CommandBus, CommandCode, CommandRegistry, PrintLevel, Target};
pub use net::{
    ConnectionError, DEFAULT_PORT, NetworkEndpoint, NetworkStats, PacketLossSimulation,
    TICK_DURATION, TICRATE,
};
pub use server::{
    ClientInfo, DisconnectReason, LauncherInfo, Server, ServerConfig, ServerEvent, ServerStats,
};
pub use session::{ConnectionState, ConnectionTable};
pub use world::{Actor, ActorKind, GameMode, Level, NetId, Player, UserInfo, World};
