use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::stats::PacketLossSimulation;

#[derive(Debug)]
struct DelayedDatagram {
    release_time: Instant,
    order: u64,
    data: Vec<u8>,
    addr: SocketAddr,
}

impl PartialEq for DelayedDatagram {
    fn eq(&self, other: &Self) -> bool {
        self.release_time == other.release_time && self.order == other.order
    }
}

impl Eq for DelayedDatagram {}

impl PartialOrd for DelayedDatagram {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedDatagram {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap and we want the earliest release first.
        other
            .release_time
            .cmp(&self.release_time)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Holds outgoing datagrams back according to a per-peer (or default)
/// loss and latency profile.
#[derive(Debug, Default)]
pub struct NetworkSimulator {
    default_config: PacketLossSimulation,
    configs: HashMap<SocketAddr, PacketLossSimulation>,
    outbound_queue: BinaryHeap<DelayedDatagram>,
    next_order: u64,
}

impl NetworkSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_default(&mut self, config: PacketLossSimulation) {
        self.default_config = config;
    }

    pub fn set_config(&mut self, addr: SocketAddr, config: PacketLossSimulation) {
        if config.enabled {
            self.configs.insert(addr, config);
        } else {
            self.configs.remove(&addr);
        }
    }

    fn config_for(&self, addr: &SocketAddr) -> &PacketLossSimulation {
        self.configs.get(addr).unwrap_or(&self.default_config)
    }

    pub fn is_active(&self) -> bool {
        self.default_config.enabled || !self.configs.is_empty()
    }

    pub fn should_drop(&self, addr: &SocketAddr) -> bool {
        self.config_for(addr).should_drop()
    }

    pub fn delay_for(&self, addr: &SocketAddr) -> Duration {
        Duration::from_millis(self.config_for(addr).delay_ms() as u64)
    }

    pub fn enqueue(&mut self, data: Vec<u8>, addr: SocketAddr) {
        let release_time = Instant::now() + self.delay_for(&addr);
        let order = self.next_order;
        self.next_order += 1;
        self.outbound_queue.push(DelayedDatagram {
            release_time,
            order,
            data,
            addr,
        });
    }

    pub fn pending(&self) -> usize {
        self.outbound_queue.len()
    }

    /// Datagrams whose release time has passed, earliest first.
    pub fn take_due(&mut self) -> Vec<(Vec<u8>, SocketAddr)> {
        let now = Instant::now();
        let mut due = Vec::new();
        while self
            .outbound_queue
            .peek()
            .is_some_and(|delayed| delayed.release_time <= now)
        {
            if let Some(delayed) = self.outbound_queue.pop() {
                due.push((delayed.data, delayed.addr));
            }
        }
        due
    }
}
