use std::collections::VecDeque;
use std::net::SocketAddr;

use crate::net::{Channel, TICRATE};

/// Running ping samples kept per client.
pub const PING_WINDOW: usize = 20;
/// A sample further than this from the average (3.5 ticks) restarts the window.
pub const PING_RESET_MS: u32 = 100;

const FLOOD_WINDOWS: [u32; 3] = [7, 42, 105];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    Free,
    Challenge,
    Connected,
    Authenticated,
    /// Authenticated against a level that is no longer running. Must
    /// authenticate again before it can spawn.
    AuthenticatedButOutdatedMap,
    Spawned,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (_, Free)
                | (Free, Challenge)
                | (Challenge, Connected)
                | (Connected, Authenticated)
                | (Authenticated, Spawned)
                | (Authenticated, AuthenticatedButOutdatedMap)
                | (Spawned, AuthenticatedButOutdatedMap)
                | (AuthenticatedButOutdatedMap, Authenticated)
        )
    }

    pub fn is_authenticated(self) -> bool {
        self >= ConnectionState::Authenticated
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Challenge => "challenge",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
            Self::AuthenticatedButOutdatedMap => "outdated map",
            Self::Spawned => "spawned",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PingStats {
    samples: VecDeque<u32>,
    average: u32,
    pub last_sent_ms: Option<i32>,
}

impl PingStats {
    /// Adds a round-trip sample and returns the new average.
    pub fn record(&mut self, sample_ms: u32) -> u32 {
        if !self.samples.is_empty() && sample_ms.abs_diff(self.average) > PING_RESET_MS {
            self.samples.clear();
        }
        if self.samples.len() == PING_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(sample_ms);
        self.average = self.samples.iter().sum::<u32>() / self.samples.len() as u32;
        self.average
    }

    pub fn average(&self) -> u32 {
        self.average
    }

    pub fn samples(&self) -> usize {
        self.samples.len()
    }
}

/// Ticks of the last four userinfo changes, newest first.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserInfoFlood {
    ticks: [Option<u32>; 4],
}

impl UserInfoFlood {
    /// Records a change at `now`. Returns true when the client changed its
    /// userinfo too often: the previous change within 7 ticks, the one two
    /// back within 42, or the one three back within 105.
    pub fn record(&mut self, now: u32) -> bool {
        self.ticks.rotate_right(1);
        self.ticks[0] = Some(now);
        self.ticks[1..]
            .iter()
            .zip(FLOOD_WINDOWS)
            .any(|(tick, window)| tick.is_some_and(|t| now.wrapping_sub(t) <= window))
    }

    pub fn clear(&mut self) {
        self.ticks = [None; 4];
    }
}

/// A slot plus the allocation it belongs to. Slots are reused, so a held
/// `ClientId` stops resolving once its connection is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId {
    pub slot: u8,
    pub generation: u32,
}

#[derive(Debug)]
pub struct Connection {
    pub slot: u8,
    pub generation: u32,
    pub addr: SocketAddr,
    state: ConnectionState,
    pub channel: Channel,
    pub connected_at: u32,
    pub last_heard: u32,
    pub lagging: bool,
    pub ping: PingStats,
    pub userinfo_flood: UserInfoFlood,
    pub last_missing_request: Option<u32>,
    pub wants_spectate: bool,
    pub no_restore_frags: bool,
}

impl Connection {
    pub fn new(slot: u8, addr: SocketAddr, channel: Channel, now: u32) -> Self {
        Self {
            slot,
            generation: 0,
            addr,
            state: ConnectionState::Free,
            channel,
            connected_at: now,
            last_heard: now,
            lagging: false,
            ping: PingStats::default(),
            userinfo_flood: UserInfoFlood::default(),
            last_missing_request: None,
            wants_spectate: false,
            no_restore_frags: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn id(&self) -> ClientId {
        ClientId {
            slot: self.slot,
            generation: self.generation,
        }
    }

    /// Moves to `next` when the state machine allows it. Refused transitions
    /// leave the state alone and return false.
    pub fn transition(&mut self, next: ConnectionState) -> bool {
        if !self.state.can_transition_to(next) {
            log::warn!(
                "Client {} ({}): refused transition {} -> {}",
                self.slot,
                self.addr,
                self.state.name(),
                next.name()
            );
            return false;
        }
        self.state = next;
        true
    }

    pub fn is_spawned(&self) -> bool {
        self.state == ConnectionState::Spawned
    }

    pub fn touch(&mut self, now: u32) {
        self.last_heard = now;
    }

    pub fn silent_for(&self, now: u32) -> u32 {
        now.wrapping_sub(self.last_heard)
    }

    /// A missing-packet request is honoured at most once per quarter second.
    pub fn missing_request_allowed(&self, now: u32) -> bool {
        self.last_missing_request
            .is_none_or(|last| now.wrapping_sub(last) >= TICRATE / 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_cannot_skip_to_spawned() {
        use ConnectionState::*;
        assert!(!Challenge.can_transition_to(Spawned));
        assert!(!Connected.can_transition_to(Spawned));
        assert!(Authenticated.can_transition_to(Spawned));
        assert!(Spawned.can_transition_to(Free));
        assert!(!AuthenticatedButOutdatedMap.can_transition_to(Spawned));
    }

    #[test]
    fn test_refused_transition_keeps_state() {
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let mut conn = Connection::new(0, addr, Channel::default(), 0);
        assert!(conn.transition(ConnectionState::Challenge));
        assert!(!conn.transition(ConnectionState::Spawned));
        assert_eq!(conn.state(), ConnectionState::Challenge);
    }

    #[test]
    fn test_userinfo_flood_windows() {
        let mut flood = UserInfoFlood::default();
        assert!(!flood.record(100));
        assert!(flood.record(105));

        let mut flood = UserInfoFlood::default();
        assert!(!flood.record(0));
        assert!(!flood.record(20));
        assert!(flood.record(40));

        let mut flood = UserInfoFlood::default();
        assert!(!flood.record(0));
        assert!(!flood.record(20));
        assert!(!flood.record(50));
        assert!(flood.record(100));

        let mut flood = UserInfoFlood::default();
        for tick in [0, 50, 100, 150, 200] {
            assert!(!flood.record(tick));
        }
    }

    #[test]
    fn test_ping_average_resets_on_spike() {
        let mut ping = PingStats::default();
        ping.record(50);
        assert_eq!(ping.record(70), 60);
        assert_eq!(ping.record(400), 400);
        assert_eq!(ping.samples(), 1);
    }

    #[test]
    fn test_missing_request_rate_limit() {
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let mut conn = Connection::new(0, addr, Channel::default(), 0);
        assert!(conn.missing_request_allowed(10));
        conn.last_missing_request = Some(10);
        assert!(!conn.missing_request_allowed(15));
        assert!(conn.missing_request_allowed(10 + TICRATE / 4));
    }
}
