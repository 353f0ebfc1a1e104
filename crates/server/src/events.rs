use replica::ServerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// One line for the operator, console or log pane.
pub fn describe(event: &ServerEvent) -> (Severity, String) {
    match event {
        ServerEvent::ClientConnecting { addr } => {
            (Severity::Info, format!("Connection request from {}", addr))
        }
        ServerEvent::ClientConnected { slot, addr } => (
            Severity::Info,
            format!("Client {} connected from {}", slot, addr),
        ),
        ServerEvent::ClientAuthenticated { slot } => {
            (Severity::Info, format!("Client {} authenticated", slot))
        }
        ServerEvent::ClientSpawned { slot, name } => (
            Severity::Info,
            format!("{} entered the game (slot {})", name, slot),
        ),
        ServerEvent::ClientDisconnected { slot, name, reason } => (
            Severity::Info,
            format!("{} (slot {}) {}", name, slot, reason.as_str()),
        ),
        ServerEvent::ConnectionDenied { addr, reason } => (
            Severity::Warn,
            format!("Connection denied to {}: {}", addr, reason),
        ),
        ServerEvent::PacketsResent { slot, count } => (
            Severity::Info,
            format!("Resent {} packet(s) to client {}", count, slot),
        ),
        ServerEvent::MapChanged { map } => (Severity::Info, format!("Map is now {}", map)),
        ServerEvent::Error { message } => (Severity::Error, message.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_stand_out() {
        let (severity, text) = describe(&ServerEvent::Error {
            message: "socket closed".into(),
        });
        assert_eq!(severity, Severity::Error);
        assert_eq!(text, "socket closed");
    }

    #[test]
    fn test_denials_are_warnings() {
        let (severity, text) = describe(&ServerEvent::ConnectionDenied {
            addr: "10.0.0.1:5000".parse().unwrap(),
            reason: "server is full".into(),
        });
        assert_eq!(severity, Severity::Warn);
        assert!(text.contains("10.0.0.1:5000"));
    }
}
