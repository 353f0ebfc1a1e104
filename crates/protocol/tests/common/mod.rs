#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use replica::command::{Command, CommandRegistry};
use replica::net::{
    ClientOpcode, GAME_VERSION, NetworkEndpoint, PROTOCOL_VERSION, PacketBuffer, ServerDatagram,
    client_datagram, parse_server_datagram,
};
use replica::{ClientConfig, ClientPhase, ClientSession, Server, ServerConfig, ServerEvent};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(40000);

pub fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1".to_string(),
        port: next_port(),
        host_name: "Test Server".to_string(),
        lan_discovery: false,
        ..ServerConfig::default()
    }
}

/// A server and its clients, stepped together one tick at a time.
pub struct Harness {
    pub server: Server,
    pub clients: Vec<ClientSession>,
    pub events: Vec<ServerEvent>,
}

impl Harness {
    pub fn new(config: ServerConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            server: Server::new(config).unwrap(),
            clients: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn client_config(&self, name: &str) -> ClientConfig {
        ClientConfig::new(self.server_addr()).with_name(name)
    }

    /// Adds a client; returns its index in `clients`.
    pub fn connect(&mut self, config: ClientConfig) -> usize {
        self.clients.push(ClientSession::connect(config).unwrap());
        self.clients.len() - 1
    }

    pub fn join(&mut self, name: &str) -> usize {
        let config = self.client_config(name);
        let index = self.connect(config);
        assert!(
            self.wait_for(2000, |h| *h.clients[index].phase() == ClientPhase::Spawned),
            "{} never spawned: {:?}",
            name,
            self.clients[index].phase()
        );
        index
    }

    pub fn step(&mut self) {
        self.server.tick_n(1);
        self.events.extend(self.server.drain_events());
        thread::sleep(Duration::from_millis(1));
        for client in &mut self.clients {
            client.poll().unwrap();
            client.tick().unwrap();
        }
        thread::sleep(Duration::from_millis(1));
    }

    pub fn steps(&mut self, count: u32) {
        for _ in 0..count {
            self.step();
        }
    }

    pub fn wait_for(&mut self, timeout_ms: u64, done: impl Fn(&Harness) -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if done(self) {
                return true;
            }
            self.step();
        }
        done(self)
    }
}

pub fn connect_payload(version: &str, password: &str, protocol: u8) -> Vec<u8> {
    let mut buf = PacketBuffer::new(128);
    buf.write_byte(ClientOpcode::AttemptConnection as u8);
    buf.write_string(version);
    buf.write_string(password);
    buf.write_bool(false);
    buf.write_bool(false);
    buf.write_byte(protocol);
    buf.as_bytes().to_vec()
}

pub fn valid_connect_payload() -> Vec<u8> {
    connect_payload(GAME_VERSION, "", PROTOCOL_VERSION)
}

/// A bare socket speaking the wire format by hand.
pub struct RawClient {
    pub endpoint: NetworkEndpoint,
    registry: CommandRegistry,
}

impl RawClient {
    pub fn new(server: SocketAddr) -> Self {
        let mut endpoint = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
        endpoint.set_remote(server);
        Self {
            endpoint,
            registry: CommandRegistry::new().unwrap(),
        }
    }

    pub fn send(&mut self, payload: &[u8]) {
        self.endpoint.send(&client_datagram(payload, true)).unwrap();
    }

    /// Steps the server until something arrives; returns the decoded
    /// datagrams as `(sequence, commands)`, with `None` for unreliable ones.
    pub fn exchange(
        &mut self,
        server: &mut Server,
        timeout_ms: u64,
    ) -> Vec<(Option<i32>, Vec<Command>)> {
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            server.tick_n(1);
            thread::sleep(Duration::from_millis(1));
            let received = self.endpoint.receive().unwrap();
            if !received.is_empty() {
                return received
                    .into_iter()
                    .map(|(data, _)| match parse_server_datagram(&data).unwrap() {
                        ServerDatagram::Reliable { sequence, payload } => {
                            (Some(sequence), self.registry.decode_all(&payload).unwrap())
                        }
                        ServerDatagram::Unreliable { payload } => {
                            (None, self.registry.decode_all(&payload).unwrap())
                        }
                    })
                    .collect();
            }
        }
        Vec::new()
    }
}
