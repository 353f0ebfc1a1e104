//! Server-browser queries. A launcher sends one connectionless datagram and
//! gets one back; neither side keeps any state.

use crate::net::{
    ClientOpcode, GAME_VERSION, PacketBuffer, PacketReader, SERVER_LAUNCHER_CHALLENGE,
};
use crate::world::GameMode;

/// Ask for the player list as well as the summary.
pub const QUERY_PLAYERS: i32 = 1 << 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherPlayer {
    pub name: String,
    pub frags: i32,
    pub ping: u16,
    pub spectating: bool,
}

/// What a server tells a launcher about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherInfo {
    /// Echo of the query's timestamp, so the launcher can measure ping.
    pub time: i32,
    pub version: String,
    pub host_name: String,
    pub map: String,
    pub game_mode: GameMode,
    pub player_count: u8,
    pub max_clients: u8,
    pub passworded: bool,
    /// Only filled when the query carried `QUERY_PLAYERS`.
    pub players: Vec<LauncherPlayer>,
}

impl LauncherInfo {
    pub fn encode(&self, flags: i32) -> Vec<u8> {
        let mut buf = PacketBuffer::new(2048);
        buf.write_long(SERVER_LAUNCHER_CHALLENGE);
        buf.write_long(self.time);
        buf.write_string(&self.version);
        buf.write_long(flags);
        buf.write_string(&self.host_name);
        buf.write_string(&self.map);
        buf.write_byte(self.game_mode as u8);
        buf.write_byte(self.player_count);
        buf.write_byte(self.max_clients);
        buf.write_bool(self.passworded);
        if flags & QUERY_PLAYERS != 0 {
            buf.write_byte(self.players.len() as u8);
            for player in &self.players {
                buf.write_string(&player.name);
                buf.write_long(player.frags);
                buf.write_short(player.ping as i16);
                buf.write_bool(player.spectating);
            }
        }
        buf.as_bytes().to_vec()
    }

    /// Reads a reply payload. `None` for anything that is not a complete
    /// launcher reply.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        let mut reader = PacketReader::new(payload);
        if reader.read_long() != SERVER_LAUNCHER_CHALLENGE {
            return None;
        }
        let time = reader.read_long();
        let version = reader.read_string();
        let flags = reader.read_long();
        let host_name = reader.read_string();
        let map = reader.read_string();
        let game_mode = GameMode::from_byte(u8::try_from(reader.read_byte()).ok()?)?;
        let player_count = u8::try_from(reader.read_byte()).ok()?;
        let max_clients = u8::try_from(reader.read_byte()).ok()?;
        if reader.remaining() < 1 {
            return None;
        }
        let passworded = reader.read_bool();

        let mut players = Vec::new();
        if flags & QUERY_PLAYERS != 0 {
            let count = u8::try_from(reader.read_byte()).ok()?;
            for _ in 0..count {
                let name = reader.read_string();
                if reader.remaining() < 7 {
                    return None;
                }
                players.push(LauncherPlayer {
                    name,
                    frags: reader.read_long(),
                    ping: reader.read_short() as u16,
                    spectating: reader.read_bool(),
                });
            }
        }

        Some(Self {
            time,
            version,
            host_name,
            map,
            game_mode,
            player_count,
            max_clients,
            passworded,
            players,
        })
    }

    pub fn is_compatible(&self) -> bool {
        self.version == GAME_VERSION
    }
}

/// The query payload a launcher sends.
pub fn launcher_query(flags: i32, time: i32) -> Vec<u8> {
    let mut buf = PacketBuffer::new(16);
    buf.write_byte(ClientOpcode::LauncherChallenge as u8);
    buf.write_bytes(&[0, 0, 0]);
    buf.write_long(flags);
    buf.write_long(time);
    buf.as_bytes().to_vec()
}

/// Reads `(flags, time)` from a query whose opcode was already consumed.
pub fn read_launcher_query(reader: &mut PacketReader<'_>) -> Option<(i32, i32)> {
    reader.read_bytes(3)?;
    if reader.remaining() < 8 {
        return None;
    }
    Some((reader.read_long(), reader.read_long()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> LauncherInfo {
        LauncherInfo {
            time: 1234,
            version: GAME_VERSION.to_string(),
            host_name: "Friday frags".into(),
            map: "MAP07".into(),
            game_mode: GameMode::Deathmatch,
            player_count: 1,
            max_clients: 8,
            passworded: false,
            players: vec![LauncherPlayer {
                name: "doomguy".into(),
                frags: 12,
                ping: 48,
                spectating: false,
            }],
        }
    }

    #[test]
    fn test_reply_without_players() {
        let decoded = LauncherInfo::decode(&info().encode(0)).unwrap();
        assert_eq!(decoded.host_name, "Friday frags");
        assert_eq!(decoded.player_count, 1);
        assert!(decoded.players.is_empty());
        assert!(decoded.is_compatible());
    }

    #[test]
    fn test_reply_with_players() {
        let decoded = LauncherInfo::decode(&info().encode(QUERY_PLAYERS)).unwrap();
        assert_eq!(decoded, info());
    }

    #[test]
    fn test_query_layout() {
        let query = launcher_query(QUERY_PLAYERS, 99);
        assert_eq!(query[0], ClientOpcode::LauncherChallenge as u8);
        assert_eq!(query.len(), 12);

        let mut reader = PacketReader::new(&query[1..]);
        assert_eq!(read_launcher_query(&mut reader), Some((QUERY_PLAYERS, 99)));
    }

    #[test]
    fn test_garbage_is_not_a_reply() {
        assert!(LauncherInfo::decode(&[1, 2, 3]).is_none());
        let mut truncated = info().encode(0);
        truncated.truncate(truncated.len() - 3);
        assert!(LauncherInfo::decode(&truncated).is_none());
    }
}
