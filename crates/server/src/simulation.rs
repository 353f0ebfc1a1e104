//! Background activity for an otherwise idle server: monsters wander near
//! their spawn spots and one sector's light flickers, so connected clients
//! always have something to replicate.

use glam::IVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use replica::world::{FRACUNIT, NetId, catalog};
use replica::{Server, TICRATE};

const WANDER_INTERVAL: u32 = 7;
const FLICKER_INTERVAL: u32 = 2 * TICRATE;
/// How far (in map units) a monster strays from where it spawned.
const LEASH: i32 = 256;
const FLICKER_LEVELS: [i16; 2] = [160, 96];

pub struct Activity {
    rng: StdRng,
    last_tick: u32,
    flicker: usize,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            last_tick: 0,
            flicker: 0,
        }
    }

    /// Runs once per server tick; extra calls within a tick do nothing.
    pub fn update(&mut self, server: &mut Server) {
        let tick = server.tick();
        if tick == self.last_tick {
            return;
        }
        self.last_tick = tick;

        if tick % WANDER_INTERVAL == 0 {
            self.wander(server);
        }
        if tick % FLICKER_INTERVAL == 0 {
            self.flicker = (self.flicker + 1) % FLICKER_LEVELS.len();
            server.set_sector_light(0, FLICKER_LEVELS[self.flicker]);
        }
    }

    fn wander(&mut self, server: &mut Server) {
        let monsters: Vec<(NetId, IVec3, IVec3, i32)> = server
            .world()
            .actors()
            .filter(|a| {
                matches!(a.kind, catalog::ZOMBIEMAN | catalog::IMP | catalog::DEMON)
                    && !a.is_dead()
            })
            .filter_map(|a| {
                let speed = catalog::class(a.kind).speed;
                Some((a.net_id?, a.position, a.spawn_point, speed))
            })
            .collect();

        for (id, position, home, speed) in monsters {
            let stride = speed * FRACUNIT * WANDER_INTERVAL as i32;
            let offset = position - home;
            let step = if offset.x.abs().max(offset.y.abs()) > LEASH * FRACUNIT {
                -offset.signum() * stride
            } else {
                match self.rng.gen_range(0..5) {
                    0 => IVec3::new(stride, 0, 0),
                    1 => IVec3::new(-stride, 0, 0),
                    2 => IVec3::new(0, stride, 0),
                    3 => IVec3::new(0, -stride, 0),
                    _ => IVec3::ZERO,
                }
            };
            let velocity = step / WANDER_INTERVAL as i32;
            server.move_actor(id, position + step, velocity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica::ServerConfig;

    #[test]
    fn test_monsters_stay_near_home() {
        let mut server = Server::new(ServerConfig {
            bind_address: "127.0.0.1".into(),
            port: 0,
            lan_discovery: false,
            ..ServerConfig::default()
        })
        .unwrap();
        let imp = server.spawn_actor(catalog::IMP, IVec3::ZERO).unwrap();
        let mut activity = Activity::new();

        for _ in 0..(20 * TICRATE) {
            server.tick_n(1);
            activity.update(&mut server);
        }

        let actor = server.world().actor(imp).unwrap();
        let reach = (LEASH + 8 * WANDER_INTERVAL as i32) * FRACUNIT;
        assert!(actor.position.x.abs() <= reach);
        assert!(actor.position.y.abs() <= reach);
    }
}
