use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::protocol::MAX_UDP_PACKET;
use super::simulator::NetworkSimulator;
use super::stats::{NetworkStats, PacketLossSimulation};

/// Non-blocking UDP socket. Sends may pass through a `NetworkSimulator`;
/// receives drain everything currently queued by the OS.
pub struct NetworkEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    remote_addr: Option<SocketAddr>,
    stats: NetworkStats,
    simulator: NetworkSimulator,
    recv_buffer: Box<[u8; MAX_UDP_PACKET]>,
    running: Arc<AtomicBool>,
}

impl NetworkEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            remote_addr: None,
            stats: NetworkStats::default(),
            simulator: NetworkSimulator::new(),
            recv_buffer: Box::new([0u8; MAX_UDP_PACKET]),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Socket for LAN discovery queries.
    pub fn bind_broadcast(port: u16) -> io::Result<Self> {
        let endpoint = Self::bind(("0.0.0.0", port))?;
        endpoint.socket.set_broadcast(true)?;
        Ok(endpoint)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn set_remote(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn set_packet_loss(&mut self, config: PacketLossSimulation) {
        self.simulator.set_default(config);
    }

    pub fn set_packet_loss_for(&mut self, addr: SocketAddr, config: PacketLossSimulation) {
        self.simulator.set_config(addr, config);
    }

    pub fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if data.len() > MAX_UDP_PACKET {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Datagram exceeds maximum UDP packet size",
            ));
        }

        if self.simulator.is_active() {
            if self.simulator.should_drop(&addr) {
                self.stats.packets_dropped += 1;
                return Ok(data.len());
            }
            self.simulator.enqueue(data.to_vec(), addr);
            self.flush_simulated()?;
            return Ok(data.len());
        }

        self.send_raw(data, addr)
    }

    pub fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        let addr = self
            .remote_addr
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "No remote address set"))?;
        self.send_to(data, addr)
    }

    fn send_raw(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        match self.socket.send_to(data, addr) {
            Ok(bytes) => {
                self.stats.record_sent(bytes);
                Ok(bytes)
            }
            Err(e) if is_transient(&e) => {
                self.stats.packets_dropped += 1;
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    /// Sends held-back datagrams whose simulated latency has elapsed.
    pub fn flush_simulated(&mut self) -> io::Result<()> {
        for (data, addr) in self.simulator.take_due() {
            self.send_raw(&data, addr)?;
        }
        Ok(())
    }

    pub fn receive(&mut self) -> io::Result<Vec<(Vec<u8>, SocketAddr)>> {
        let mut datagrams = Vec::new();

        loop {
            match self.socket.recv_from(&mut self.recv_buffer[..]) {
                Ok((0, _)) => continue,
                Ok((size, addr)) => {
                    self.stats.record_received(size);
                    datagrams.push((self.recv_buffer[..size].to_vec(), addr));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP port unreachable from a vanished peer surfaces here on some platforms.
                Err(ref e) if is_transient(e) => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(datagrams)
    }

    pub fn reset_stats(&mut self) {
        self.stats = NetworkStats::default();
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn receive_within(endpoint: &mut NetworkEndpoint, timeout_ms: u64) -> Vec<(Vec<u8>, SocketAddr)> {
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            let datagrams = endpoint.receive().unwrap();
            if !datagrams.is_empty() {
                return datagrams;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        Vec::new()
    }

    #[test]
    fn test_loopback_send_and_receive() {
        let mut a = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
        let mut b = NetworkEndpoint::bind("127.0.0.1:0").unwrap();

        a.send_to(&[1, 2, 3], b.local_addr()).unwrap();
        let received = receive_within(&mut b, 500);

        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, vec![1, 2, 3]);
        assert_eq!(received[0].1, a.local_addr());
        assert_eq!(a.stats().packets_sent, 1);
        assert_eq!(b.stats().bytes_received, 3);
    }

    #[test]
    fn test_empty_receive_does_not_block() {
        let mut a = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
        assert!(a.receive().unwrap().is_empty());
    }

    #[test]
    fn test_simulated_loss_drops_everything() {
        let mut a = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
        let mut b = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
        a.set_packet_loss(PacketLossSimulation::lossy(100.0));

        for _ in 0..10 {
            a.send_to(&[7], b.local_addr()).unwrap();
        }

        assert!(receive_within(&mut b, 50).is_empty());
        assert_eq!(a.stats().packets_dropped, 10);
    }
}
