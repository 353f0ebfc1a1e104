use std::path::PathBuf;

use crate::net::{
    DEFAULT_MAX_PACKET_SIZE, DEFAULT_PORT, LAN_BROADCAST_PORT, MAX_CLIENTS, MAX_UDP_PACKET,
    PACKET_RING_SIZE, PacketLossSimulation, TICRATE,
};
use crate::world::GameMode;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown option '{0}'")]
    UnknownOption(String),
    #[error("invalid value '{value}' for {name}")]
    InvalidValue { name: String, value: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub host_name: String,
    pub motd: String,
    pub map: String,
    pub game_mode: GameMode,
    pub max_clients: usize,
    pub max_clients_per_ip: usize,
    pub max_packet_size: usize,
    pub password: String,
    pub force_password: bool,
    pub enforce_bans: bool,
    /// Where bans are kept across restarts.
    pub ban_file: Option<PathBuf>,
    /// Silence (in ticks) after which a client is dropped.
    pub timeout_ticks: u32,
    /// Silence (in ticks) after which a client is shown as lagging.
    pub lagging_ticks: u32,
    pub compression: bool,
    pub ring_size: usize,
    pub lan_discovery: bool,
    pub lan_port: u16,
    pub packet_loss: Option<PacketLossSimulation>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            host_name: "Replica Server".to_string(),
            motd: String::new(),
            map: "MAP01".to_string(),
            game_mode: GameMode::Cooperative,
            max_clients: 8,
            max_clients_per_ip: 2,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            password: String::new(),
            force_password: false,
            enforce_bans: true,
            ban_file: None,
            timeout_ticks: 3 * TICRATE,
            lagging_ticks: TICRATE,
            compression: true,
            ring_size: PACKET_RING_SIZE,
            lan_discovery: true,
            lan_port: LAN_BROADCAST_PORT,
            packet_loss: None,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// A changed option, as delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionChange {
    pub name: &'static str,
    pub value: String,
}

type Observer = Box<dyn FnMut(&OptionChange) + Send>;

/// Runtime-settable view over `ServerConfig`, addressed by option name.
pub struct Options {
    config: ServerConfig,
    observers: Vec<Observer>,
    changes: Vec<OptionChange>,
}

const OPTION_NAMES: &[&str] = &[
    "host_name",
    "motd",
    "password",
    "force_password",
    "max_clients",
    "max_clients_per_ip",
    "max_packet_size",
    "compression",
    "enforce_bans",
    "timeout_ticks",
    "lagging_ticks",
];

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

impl Options {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            observers: Vec::new(),
            changes: Vec::new(),
        }
    }

    pub fn names() -> &'static [&'static str] {
        OPTION_NAMES
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn get(&self, name: &str) -> Result<String, ConfigError> {
        let c = &self.config;
        Ok(match name {
            "host_name" => c.host_name.clone(),
            "motd" => c.motd.clone(),
            "password" => c.password.clone(),
            "force_password" => c.force_password.to_string(),
            "max_clients" => c.max_clients.to_string(),
            "max_clients_per_ip" => c.max_clients_per_ip.to_string(),
            "max_packet_size" => c.max_packet_size.to_string(),
            "compression" => c.compression.to_string(),
            "enforce_bans" => c.enforce_bans.to_string(),
            "timeout_ticks" => c.timeout_ticks.to_string(),
            "lagging_ticks" => c.lagging_ticks.to_string(),
            _ => return Err(ConfigError::UnknownOption(name.to_string())),
        })
    }

    /// Parses and stores `value`, then tells every observer.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let Some(&canonical) = OPTION_NAMES.iter().find(|n| **n == name) else {
            return Err(ConfigError::UnknownOption(name.to_string()));
        };
        let invalid = || ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        };

        let c = &mut self.config;
        match canonical {
            "host_name" => c.host_name = value.to_string(),
            "motd" => c.motd = value.to_string(),
            "password" => c.password = value.to_string(),
            "force_password" => c.force_password = parse_bool(name, value)?,
            "max_clients" => {
                let max: usize = parse(name, value)?;
                if max == 0 || max > MAX_CLIENTS {
                    return Err(invalid());
                }
                c.max_clients = max;
            }
            "max_clients_per_ip" => c.max_clients_per_ip = parse(name, value)?,
            "max_packet_size" => {
                let size: usize = parse(name, value)?;
                if !(256..=MAX_UDP_PACKET).contains(&size) {
                    return Err(invalid());
                }
                c.max_packet_size = size;
            }
            "compression" => c.compression = parse_bool(name, value)?,
            "enforce_bans" => c.enforce_bans = parse_bool(name, value)?,
            "timeout_ticks" => c.timeout_ticks = parse(name, value)?,
            "lagging_ticks" => c.lagging_ticks = parse(name, value)?,
            _ => return Err(ConfigError::UnknownOption(name.to_string())),
        }

        let change = OptionChange {
            name: canonical,
            value: self.get(canonical)?,
        };
        log::info!("Option {} set to '{}'", change.name, change.value);
        for observer in &mut self.observers {
            observer(&change);
        }
        self.changes.push(change);
        Ok(())
    }

    pub fn subscribe(&mut self, observer: impl FnMut(&OptionChange) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Changes since the last call, oldest first.
    pub fn take_changes(&mut self) -> Vec<OptionChange> {
        std::mem::take(&mut self.changes)
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("config", &self.config)
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_get_and_set_by_name() {
        let mut options = Options::new(ServerConfig::default());
        options.set("max_packet_size", "1024").unwrap();
        assert_eq!(options.config().max_packet_size, 1024);
        assert_eq!(options.get("max_packet_size").unwrap(), "1024");

        options.set("compression", "off").unwrap();
        assert!(!options.config().compression);
    }

    #[test]
    fn test_every_name_can_be_read() {
        let options = Options::new(ServerConfig::default());
        for name in Options::names() {
            assert!(options.get(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_rejects_unknown_and_invalid() {
        let mut options = Options::new(ServerConfig::default());
        assert_eq!(
            options.set("gravity", "800"),
            Err(ConfigError::UnknownOption("gravity".into()))
        );
        assert!(matches!(
            options.set("max_clients", "500"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            options.set("compression", "maybe"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(options.take_changes().is_empty());
    }

    #[test]
    fn test_observers_see_changes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut options = Options::new(ServerConfig::default());
        options.subscribe(move |change| sink.lock().unwrap().push(change.clone()));

        options.set("password", "secret").unwrap();
        options.set("force_password", "true").unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].name, "password");
        assert_eq!(seen[1].value, "true");
        assert_eq!(options.take_changes().len(), 2);
    }
}
