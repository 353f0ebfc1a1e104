use std::collections::{BTreeSet, HashMap};
use std::net::{IpAddr, SocketAddr};

use super::connection::{ClientId, Connection, ConnectionState};
use crate::net::{Channel, MAX_CLIENTS};

/// Connection slots. Slot numbers are reused lowest-first; one slot beyond
/// `max_clients` is held back for loopback (admin) connections.
#[derive(Debug)]
pub struct ConnectionTable {
    slots: Vec<Option<Connection>>,
    free: BTreeSet<u8>,
    by_addr: HashMap<SocketAddr, u8>,
    max_clients: usize,
    generation: u32,
}

impl ConnectionTable {
    pub fn new(max_clients: usize) -> Self {
        let capacity = MAX_CLIENTS + 1;
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            free: (0..capacity as u8).collect(),
            by_addr: HashMap::new(),
            max_clients: max_clients.min(MAX_CLIENTS),
            generation: 0,
        }
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    pub fn set_max_clients(&mut self, max_clients: usize) {
        self.max_clients = max_clients.min(MAX_CLIENTS);
    }

    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }

    /// True when a regular (non-loopback) client would be refused.
    pub fn is_full(&self) -> bool {
        self.len() >= self.max_clients
    }

    /// Takes the lowest free slot for `addr`. The connection starts in
    /// `Challenge`.
    pub fn allocate(&mut self, addr: SocketAddr, channel: Channel, now: u32) -> Option<u8> {
        if self.by_addr.contains_key(&addr) {
            return None;
        }
        let limit = if addr.ip().is_loopback() {
            self.max_clients + 1
        } else {
            self.max_clients
        };
        if self.len() >= limit {
            return None;
        }

        let slot = self.free.pop_first()?;
        self.generation = self.generation.wrapping_add(1);
        let mut conn = Connection::new(slot, addr, channel, now);
        conn.generation = self.generation;
        conn.transition(ConnectionState::Challenge);
        self.slots[slot as usize] = Some(conn);
        self.by_addr.insert(addr, slot);
        Some(slot)
    }

    /// Frees `slot`. Whatever the connection had buffered goes with it.
    pub fn release(&mut self, slot: u8) -> Option<Connection> {
        let mut conn = self.slots.get_mut(slot as usize)?.take()?;
        self.by_addr.remove(&conn.addr);
        self.free.insert(slot);
        conn.transition(ConnectionState::Free);
        Some(conn)
    }

    pub fn find(&self, addr: &SocketAddr) -> Option<u8> {
        self.by_addr.get(addr).copied()
    }

    /// The slot `id` names, if that connection still holds it.
    pub fn resolve(&self, id: ClientId) -> Option<u8> {
        self.get(id.slot)
            .filter(|conn| conn.generation == id.generation)
            .map(|conn| conn.slot)
    }

    pub fn get(&self, slot: u8) -> Option<&Connection> {
        self.slots.get(slot as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, slot: u8) -> Option<&mut Connection> {
        self.slots.get_mut(slot as usize)?.as_mut()
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut Connection> {
        let slot = self.find(addr)?;
        self.get_mut(slot)
    }

    /// Occupied slots with the given IP, regardless of port.
    pub fn count_from_ip(&self, ip: IpAddr) -> usize {
        self.by_addr.keys().filter(|addr| addr.ip() == ip).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.slots.iter_mut().flatten()
    }

    pub fn slots(&self) -> Vec<u8> {
        self.iter().map(|conn| conn.slot).collect()
    }

    pub fn count_in(&self, state: ConnectionState) -> usize {
        self.iter().filter(|conn| conn.state() == state).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_slots_are_reused_lowest_first() {
        let mut table = ConnectionTable::new(8);
        let a = table.allocate(addr("10.0.0.1:1"), Channel::default(), 0).unwrap();
        let b = table.allocate(addr("10.0.0.2:1"), Channel::default(), 0).unwrap();
        assert_eq!((a, b), (0, 1));

        table.release(a).unwrap();
        let c = table.allocate(addr("10.0.0.3:1"), Channel::default(), 0).unwrap();
        assert_eq!(c, 0);
        assert_eq!(table.get(c).unwrap().state(), ConnectionState::Challenge);
        assert_eq!(table.find(&addr("10.0.0.3:1")), Some(0));
        assert_eq!(table.find(&addr("10.0.0.1:1")), None);
    }

    #[test]
    fn test_reused_slot_does_not_answer_to_an_old_id() {
        let mut table = ConnectionTable::new(8);
        let slot = table.allocate(addr("10.0.0.1:1"), Channel::default(), 0).unwrap();
        let old = table.get(slot).unwrap().id();
        assert_eq!(table.resolve(old), Some(slot));

        table.release(slot).unwrap();
        assert_eq!(table.resolve(old), None);

        let reused = table.allocate(addr("10.0.0.2:1"), Channel::default(), 0).unwrap();
        assert_eq!(reused, slot);
        assert_eq!(table.resolve(old), None);
        let new = table.get(reused).unwrap().id();
        assert_ne!(new, old);
        assert_eq!(table.resolve(new), Some(slot));
    }

    #[test]
    fn test_loopback_gets_the_extra_slot() {
        let mut table = ConnectionTable::new(1);
        assert!(table.allocate(addr("10.0.0.1:1"), Channel::default(), 0).is_some());
        assert!(table.allocate(addr("10.0.0.2:1"), Channel::default(), 0).is_none());
        assert!(table.allocate(addr("127.0.0.1:9"), Channel::default(), 0).is_some());
        assert!(table.allocate(addr("127.0.0.1:10"), Channel::default(), 0).is_none());
    }

    #[test]
    fn test_count_from_ip_ignores_ports() {
        let mut table = ConnectionTable::new(8);
        table.allocate(addr("10.0.0.1:1"), Channel::default(), 0);
        table.allocate(addr("10.0.0.1:2"), Channel::default(), 0);
        table.allocate(addr("10.0.0.2:1"), Channel::default(), 0);
        assert_eq!(table.count_from_ip("10.0.0.1".parse().unwrap()), 2);
    }

    #[test]
    fn test_release_frees_the_address() {
        let mut table = ConnectionTable::new(8);
        let slot = table.allocate(addr("10.0.0.1:1"), Channel::default(), 0).unwrap();
        let conn = table.release(slot).unwrap();
        assert_eq!(conn.state(), ConnectionState::Free);
        assert!(table.is_empty());
        assert!(table.release(slot).is_none());
    }
}
