mod channel;
mod cooldown;
mod endpoint;
pub mod huffman;
mod protocol;
mod simulator;
mod stats;
pub mod stream;

pub use channel::{Channel, ChannelStats, RetentionRing};
pub use cooldown::{AddressCooldown, DEFAULT_COOLDOWN_TICKS};
pub use endpoint::NetworkEndpoint;
pub use huffman::{HuffmanCodec, HuffmanError};
pub use protocol::{
    ClientOpcode, ConnectionError, DEFAULT_MAX_PACKET_SIZE, DEFAULT_PORT, END_OF_MISSING_LIST,
    GAME_VERSION, LAN_BROADCAST_PORT, MAX_CLIENTS, MAX_UDP_PACKET, PACKET_RING_SIZE, PROTOCOL_VERSION,
    PacketError, PacketKind, SERVER_LAUNCHER_CHALLENGE, ServerDatagram, TICK_DURATION, TICRATE,
    client_datagram, frame_payload, parse_client_datagram, parse_server_datagram,
    reliable_datagram, unreliable_datagram,
};
pub use simulator::NetworkSimulator;
pub use stats::{NetworkStats, PacketLossSimulation};
pub use stream::{END_OF_STREAM, PacketBuffer, PacketReader};
