use std::time::Duration;

use super::huffman::{self, HuffmanCodec, HuffmanError};

/// Logical ticks per second. Wall-clock ticks are 28 ms, so the loop
/// actually runs at ~35.7 Hz.
pub const TICRATE: u32 = 35;
pub const TICK_DURATION: Duration = Duration::from_millis(28);

pub const DEFAULT_PORT: u16 = 10666;
pub const LAN_BROADCAST_PORT: u16 = 15101;

pub const MAX_UDP_PACKET: usize = 8192;
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1400;
pub const PACKET_RING_SIZE: usize = 256;
pub const MAX_CLIENTS: usize = 64;

pub const PROTOCOL_VERSION: u8 = 3;
pub const GAME_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Terminates the sequence list of a missing-packet request.
pub const END_OF_MISSING_LIST: i32 = -1;

/// Magic long at the start of a launcher reply.
pub const SERVER_LAUNCHER_CHALLENGE: i32 = 5_660_023;

/// First byte of every datagram the server sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Reliable = 0,
    Unreliable = 1,
}

impl PacketKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Reliable),
            1 => Some(Self::Unreliable),
            _ => None,
        }
    }
}

/// Commands sent by clients (and by external query tools).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientOpcode {
    AttemptConnection = 1,
    AttemptAuthentication = 2,
    RequestSnapshot = 3,
    UserInfo = 10,
    Quit = 11,
    ClientMove = 12,
    MissingPacket = 13,
    Pong = 14,
    LauncherChallenge = 199,
}

impl ClientOpcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Self::AttemptConnection,
            2 => Self::AttemptAuthentication,
            3 => Self::RequestSnapshot,
            10 => Self::UserInfo,
            11 => Self::Quit,
            12 => Self::ClientMove,
            13 => Self::MissingPacket,
            14 => Self::Pong,
            199 => Self::LauncherChallenge,
            _ => return None,
        })
    }

    /// Opcodes that may open or advance a connection.
    pub fn is_bootstrap(self) -> bool {
        matches!(
            self,
            Self::AttemptConnection | Self::AttemptAuthentication | Self::RequestSnapshot
        )
    }
}

/// Reasons a connection attempt is refused. Each maps to a one-byte wire code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("incorrect password")]
    WrongPassword,
    #[error("version mismatch (server runs {server_version})")]
    WrongVersion { server_version: String },
    #[error("protocol version mismatch")]
    WrongProtocolVersion,
    #[error("banned: {reason}")]
    Banned { reason: String, expires: i32 },
    #[error("level authentication failed")]
    AuthenticationFailed,
    #[error("failed to send userinfo")]
    FailedToSendUserInfo,
    #[error("too many connections from this address")]
    TooManyConnectionsFromIp,
    #[error("server is full")]
    ServerIsFull,
}

impl ConnectionError {
    pub fn code(&self) -> u8 {
        match self {
            Self::WrongPassword => 0,
            Self::WrongVersion { .. } => 1,
            Self::WrongProtocolVersion => 2,
            Self::Banned { .. } => 3,
            Self::AuthenticationFailed => 4,
            Self::FailedToSendUserInfo => 5,
            Self::TooManyConnectionsFromIp => 6,
            Self::ServerIsFull => 7,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("empty datagram")]
    Empty,
    #[error("unknown packet header {0}")]
    UnknownHeader(u8),
    #[error("truncated sequence number")]
    TruncatedSequence,
    #[error("invalid frame: {0}")]
    Frame(#[from] HuffmanError),
}

/// Wraps a command payload in a Huffman frame, or a stored frame when
/// compression is off.
pub fn frame_payload(payload: &[u8], compress: bool) -> Vec<u8> {
    if compress {
        huffman::encode(payload)
    } else {
        HuffmanCodec::store(payload)
    }
}

/// `[Reliable][sequence BE][frame]`
pub fn reliable_datagram(sequence: i32, frame: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(frame.len() + 5);
    data.push(PacketKind::Reliable as u8);
    data.extend_from_slice(&sequence.to_be_bytes());
    data.extend_from_slice(frame);
    data
}

/// `[Unreliable][frame]`
pub fn unreliable_datagram(frame: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(frame.len() + 1);
    data.push(PacketKind::Unreliable as u8);
    data.extend_from_slice(frame);
    data
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerDatagram {
    Reliable { sequence: i32, payload: Vec<u8> },
    Unreliable { payload: Vec<u8> },
}

pub fn parse_server_datagram(data: &[u8]) -> Result<ServerDatagram, PacketError> {
    let (&header, rest) = data.split_first().ok_or(PacketError::Empty)?;
    match PacketKind::from_byte(header) {
        Some(PacketKind::Reliable) => {
            if rest.len() < 4 {
                return Err(PacketError::TruncatedSequence);
            }
            let sequence = i32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
            let payload = huffman::decode(&rest[4..])?;
            Ok(ServerDatagram::Reliable { sequence, payload })
        }
        Some(PacketKind::Unreliable) => Ok(ServerDatagram::Unreliable {
            payload: huffman::decode(rest)?,
        }),
        None => Err(PacketError::UnknownHeader(header)),
    }
}

/// Client datagrams are a bare frame; the first decoded byte is an opcode.
pub fn client_datagram(payload: &[u8], compress: bool) -> Vec<u8> {
    frame_payload(payload, compress)
}

pub fn parse_client_datagram(data: &[u8]) -> Result<Vec<u8>, PacketError> {
    if data.is_empty() {
        return Err(PacketError::Empty);
    }
    Ok(huffman::decode(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reliable_datagram_layout() {
        let frame = frame_payload(&[4, 0, 0], true);
        let data = reliable_datagram(0x0102_0304, &frame);

        assert_eq!(data[0], PacketKind::Reliable as u8);
        assert_eq!(&data[1..5], &[1, 2, 3, 4]);
        assert_eq!(&data[5..], &frame[..]);

        match parse_server_datagram(&data).unwrap() {
            ServerDatagram::Reliable { sequence, payload } => {
                assert_eq!(sequence, 0x0102_0304);
                assert_eq!(payload, vec![4, 0, 0]);
            }
            other => panic!("unexpected datagram {:?}", other),
        }
    }

    #[test]
    fn test_unreliable_datagram_has_no_sequence() {
        let frame = frame_payload(&[9, 9], false);
        let data = unreliable_datagram(&frame);
        assert_eq!(data.len(), 1 + 1 + 2);

        assert_eq!(
            parse_server_datagram(&data).unwrap(),
            ServerDatagram::Unreliable { payload: vec![9, 9] }
        );
    }

    #[test]
    fn test_bad_datagrams_are_errors() {
        assert!(matches!(parse_server_datagram(&[]), Err(PacketError::Empty)));
        assert!(matches!(
            parse_server_datagram(&[7, 1, 2]),
            Err(PacketError::UnknownHeader(7))
        ));
        assert!(matches!(
            parse_server_datagram(&[0, 1, 2]),
            Err(PacketError::TruncatedSequence)
        ));
        assert!(parse_client_datagram(&[]).is_err());
    }

    #[test]
    fn test_opcode_lookup() {
        assert_eq!(
            ClientOpcode::from_byte(1),
            Some(ClientOpcode::AttemptConnection)
        );
        assert!(ClientOpcode::RequestSnapshot.is_bootstrap());
        assert!(!ClientOpcode::Pong.is_bootstrap());
        assert_eq!(ClientOpcode::from_byte(200), None);
    }
}
