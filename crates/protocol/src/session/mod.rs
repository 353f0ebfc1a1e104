mod ban;
mod connection;
mod table;

pub use ban::{BanEntry, BanFileError, BanList, unix_now};
pub use connection::{
    ClientId, Connection, ConnectionState, PING_RESET_MS, PING_WINDOW, PingStats, UserInfoFlood,
};
pub use table::ConnectionTable;
