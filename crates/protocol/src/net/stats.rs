use rand::Rng;

/// Artificial loss and latency applied to outgoing datagrams.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    /// Percentage in `0.0..=100.0`.
    pub loss_percent: f32,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
    pub jitter_ms: u32,
}

impl PacketLossSimulation {
    pub fn lossy(loss_percent: f32) -> Self {
        Self {
            enabled: true,
            loss_percent,
            ..Default::default()
        }
    }

    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rand::thread_rng().r#gen::<f32>() * 100.0 < self.loss_percent
    }

    pub fn delay_ms(&self) -> u32 {
        if !self.enabled || self.max_latency_ms == 0 {
            return 0;
        }
        let mut rng = rand::thread_rng();
        let base = self.min_latency_ms;
        let range = self.max_latency_ms.saturating_sub(self.min_latency_ms);
        let jitter = if self.jitter_ms > 0 {
            rng.gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        base + rng.gen_range(0..=range) + jitter
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub malformed: u64,
}

impl NetworkStats {
    pub fn record_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_simulation_is_transparent() {
        let sim = PacketLossSimulation::default();
        for _ in 0..100 {
            assert!(!sim.should_drop());
        }
        assert_eq!(sim.delay_ms(), 0);
    }

    #[test]
    fn test_full_loss_drops_everything() {
        let sim = PacketLossSimulation::lossy(100.0);
        for _ in 0..100 {
            assert!(sim.should_drop());
        }
    }

    #[test]
    fn test_delay_stays_in_range() {
        let sim = PacketLossSimulation {
            enabled: true,
            min_latency_ms: 20,
            max_latency_ms: 50,
            jitter_ms: 5,
            ..Default::default()
        };
        for _ in 0..100 {
            let delay = sim.delay_ms();
            assert!((20..=55).contains(&delay), "delay {} out of range", delay);
        }
    }
}
