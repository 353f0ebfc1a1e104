//! Makes a connected client look busy: the body strolls around the spot it
//! spawned at.

use glam::IVec3;
use rand::Rng;
use rand::rngs::StdRng;
use rand::SeedableRng;

use replica::ClientState;
use replica::world::FRACUNIT;

/// Ticks between steps.
pub const STEP_INTERVAL: u32 = 5;
const STEP: i32 = 24 * FRACUNIT;
const RANGE: i32 = 192 * FRACUNIT;

pub struct Wanderer {
    rng: StdRng,
    home: Option<IVec3>,
}

impl Wanderer {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            home: None,
        }
    }

    /// Where to go next, or `None` while we have no body.
    pub fn next_move(&mut self, state: &ClientState) -> Option<(IVec3, u32)> {
        let body = state.console()?.body?;
        let position = state.world.actor(body)?.position;
        let home = *self.home.get_or_insert(position);

        let direction: u32 = self.rng.gen_range(0..4);
        let step = match direction {
            0 => IVec3::new(STEP, 0, 0),
            1 => IVec3::new(0, STEP, 0),
            2 => IVec3::new(-STEP, 0, 0),
            _ => IVec3::new(0, -STEP, 0),
        };
        let mut target = position + step;
        if (target - home).abs().max_element() > RANGE {
            target = position - step;
        }
        // Binary angle: a quarter turn per direction.
        Some((target, direction << 30))
    }

    /// Forgets the spawn spot; the next body may be somewhere else.
    pub fn reset(&mut self) {
        self.home = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_body_no_move() {
        let mut wanderer = Wanderer::new();
        assert!(wanderer.next_move(&ClientState::new()).is_none());
    }
}
