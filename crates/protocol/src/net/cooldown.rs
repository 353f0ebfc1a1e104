use std::collections::VecDeque;
use std::net::IpAddr;

use super::protocol::TICRATE;

pub const DEFAULT_COOLDOWN_TICKS: u32 = 10 * TICRATE;
pub const DEFAULT_COOLDOWN_CAPACITY: usize = 10;

/// Addresses whose connectionless packets are ignored for a while.
///
/// When the queue is full every connectionless packet is ignored, which
/// caps the work a spoofed flood can cause.
#[derive(Debug, Clone)]
pub struct AddressCooldown {
    entries: VecDeque<(IpAddr, u32)>,
    capacity: usize,
    duration: u32,
}

impl Default for AddressCooldown {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_CAPACITY, DEFAULT_COOLDOWN_TICKS)
    }
}

impl AddressCooldown {
    pub fn new(capacity: usize, duration: u32) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            duration,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.entries.iter().any(|&(queued, _)| queued == ip)
    }

    /// True if packets from `ip` should be dropped unread.
    pub fn blocks(&self, ip: IpAddr) -> bool {
        self.is_full() || self.contains(ip)
    }

    pub fn add(&mut self, ip: IpAddr, now: u32) {
        if self.is_full() {
            return;
        }
        self.entries.push_back((ip, now + self.duration));
    }

    /// Drops entries whose cooldown has run out.
    pub fn expire(&mut self, now: u32) {
        while self.entries.front().is_some_and(|&(_, until)| until <= now) {
            self.entries.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_queued_address_is_blocked_until_expiry() {
        let mut cooldown = AddressCooldown::default();
        cooldown.add(ip(1), 100);

        assert!(cooldown.blocks(ip(1)));
        assert!(!cooldown.blocks(ip(2)));

        cooldown.expire(100 + DEFAULT_COOLDOWN_TICKS - 1);
        assert!(cooldown.blocks(ip(1)));

        cooldown.expire(100 + DEFAULT_COOLDOWN_TICKS);
        assert!(!cooldown.blocks(ip(1)));
        assert!(cooldown.is_empty());
    }

    #[test]
    fn test_full_queue_blocks_everyone() {
        let mut cooldown = AddressCooldown::new(3, 50);
        for i in 0..3 {
            cooldown.add(ip(i), 0);
        }
        assert!(cooldown.is_full());
        assert!(cooldown.blocks(ip(200)));

        cooldown.add(ip(9), 0);
        assert_eq!(cooldown.len(), 3);
    }
}
