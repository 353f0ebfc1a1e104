mod session;
mod state;

pub use session::{
    ClientConfig, ClientError, ClientEvent, ClientPhase, ClientSession, SessionStats, query_server,
};
pub use state::{ClientState, SessionNotice};
