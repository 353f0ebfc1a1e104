use std::collections::BTreeMap;

use glam::{IVec2, IVec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::actor::FRACUNIT;
use super::catalog::ActorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightEffect {
    FireFlicker { max: i16, min: i16 },
    Flicker { max: i16, min: i16 },
    Flash { max: i16, min: i16 },
    Strobe { dark_ticks: i16, bright_ticks: i16, max: i16, min: i16 },
    Glow { max: i16, min: i16 },
    Glow2 { start: i16, end: i16, ticks: i16, one_shot: bool },
    Phased { base: i16, phase: u8 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sector {
    pub floor_height: i32,
    pub ceiling_height: i32,
    pub floor_flat: String,
    pub ceiling_flat: String,
    pub floor_panning: IVec2,
    pub ceiling_panning: IVec2,
    pub floor_rotation: i32,
    pub ceiling_rotation: i32,
    pub floor_scale: IVec2,
    pub ceiling_scale: IVec2,
    pub color: [u8; 3],
    pub desaturation: u8,
    pub fade: [u8; 3],
    pub friction: i32,
    pub move_factor: i32,
    pub gravity: f32,
    pub light_level: i16,
    pub floor_reflection: f32,
    pub ceiling_reflection: f32,
    pub light_effect: Option<LightEffect>,
}

impl Sector {
    fn new(floor_height: i32, ceiling_height: i32, light_level: i16) -> Self {
        Self {
            floor_height,
            ceiling_height,
            floor_flat: "FLOOR4_8".to_string(),
            ceiling_flat: "CEIL3_5".to_string(),
            floor_panning: IVec2::ZERO,
            ceiling_panning: IVec2::ZERO,
            floor_rotation: 0,
            ceiling_rotation: 0,
            floor_scale: IVec2::splat(FRACUNIT),
            ceiling_scale: IVec2::splat(FRACUNIT),
            color: [255, 255, 255],
            desaturation: 0,
            fade: [0, 0, 0],
            friction: 0xe800,
            move_factor: 0x800,
            gravity: 1.0,
            light_level,
            floor_reflection: 0.0,
            ceiling_reflection: 0.0,
            light_effect: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TexturePosition {
    Top = 0,
    Mid = 1,
    Bottom = 2,
}

impl TexturePosition {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Top),
            1 => Some(Self::Mid),
            2 => Some(Self::Bottom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LineSide {
    Front = 0,
    Back = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Side {
    /// Indexed by `TexturePosition`.
    pub textures: [String; 3],
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub front: u16,
    pub back: Option<u16>,
    pub alpha: i32,
    pub flags: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polyobject {
    pub position: IVec2,
    pub angle: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MoverKind {
    Door = 0,
    Floor = 1,
    Ceiling = 2,
    Plat = 3,
}

impl MoverKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Door),
            1 => Some(Self::Floor),
            2 => Some(Self::Ceiling),
            3 => Some(Self::Plat),
            _ => None,
        }
    }
}

/// A sector plane in motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorMover {
    pub kind: MoverKind,
    /// -1 down, 0 waiting, 1 up.
    pub direction: i8,
    pub speed: i32,
    pub destination: i32,
}

/// Per-lump CRC-32 strings a client must echo to prove it loaded the same level.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LevelChecksums {
    pub vertexes: String,
    pub linedefs: String,
    pub sidedefs: String,
    pub sectors: String,
    pub behavior: String,
}

impl LevelChecksums {
    pub fn as_array(&self) -> [&str; 5] {
        [
            &self.vertexes,
            &self.linedefs,
            &self.sidedefs,
            &self.sectors,
            &self.behavior,
        ]
    }
}

fn lump_checksum(data: &[u8]) -> String {
    format!("{:08x}", crc32fast::hash(data))
}

#[derive(Debug, Clone, PartialEq)]
struct Baseline {
    sectors: Vec<Sector>,
    lines: Vec<Line>,
    sides: Vec<Side>,
    polyobjects: Vec<Polyobject>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    pub name: String,
    pub sectors: Vec<Sector>,
    pub lines: Vec<Line>,
    pub sides: Vec<Side>,
    pub polyobjects: Vec<Polyobject>,
    pub movers: BTreeMap<u16, SectorMover>,
    /// Map spawn spots, placed by the server when the level starts.
    pub things: Vec<(ActorKind, IVec3)>,
    baseline: Baseline,
    checksums: LevelChecksums,
}

impl Level {
    /// Builds the level for `name`. The same name always yields the same
    /// geometry and checksums, so both ends can load it independently.
    pub fn generate(name: &str) -> Self {
        let seed = crc32fast::hash(name.to_ascii_uppercase().as_bytes());
        let mut rng = StdRng::seed_from_u64(seed as u64);

        let sector_count = rng.gen_range(6..14);
        let mut sectors = Vec::with_capacity(sector_count);
        for _ in 0..sector_count {
            let floor = rng.gen_range(-8..8) * 16 * FRACUNIT;
            let ceiling = floor + rng.gen_range(4..16) * 16 * FRACUNIT;
            sectors.push(Sector::new(floor, ceiling, rng.gen_range(8..32) * 8));
        }

        let mut sides = Vec::new();
        let mut lines = Vec::new();
        for _ in 0..sector_count * 4 {
            let front = sides.len() as u16;
            sides.push(Side {
                textures: ["-".to_string(), "STARTAN3".to_string(), "-".to_string()],
                flags: 0,
            });
            let back = if rng.gen_bool(0.3) {
                sides.push(Side {
                    textures: ["BROWN1".to_string(), "-".to_string(), "BROWN1".to_string()],
                    flags: 0,
                });
                Some(front + 1)
            } else {
                None
            };
            lines.push(Line {
                front,
                back,
                alpha: FRACUNIT,
                flags: 0,
            });
        }

        let polyobjects: Vec<Polyobject> = (0..2)
            .map(|_| Polyobject {
                position: IVec2::new(rng.gen_range(-512..512), rng.gen_range(-512..512)) * FRACUNIT,
                angle: 0,
            })
            .collect();

        let things: Vec<(ActorKind, IVec3)> = (0..rng.gen_range(4..10))
            .map(|_| {
                let kind = ActorKind(rng.gen_range(1..4u16));
                let spot = IVec3::new(rng.gen_range(-1024..1024), rng.gen_range(-1024..1024), 0)
                    * FRACUNIT;
                (kind, spot)
            })
            .collect();

        let vertexes: Vec<u8> = (0..lines.len() * 2)
            .flat_map(|_| {
                let x: i16 = rng.r#gen();
                let y: i16 = rng.r#gen();
                [x.to_be_bytes(), y.to_be_bytes()].concat()
            })
            .collect();

        let mut level = Self {
            name: name.to_ascii_uppercase(),
            baseline: Baseline {
                sectors: sectors.clone(),
                lines: lines.clone(),
                sides: sides.clone(),
                polyobjects: polyobjects.clone(),
            },
            sectors,
            lines,
            sides,
            polyobjects,
            movers: BTreeMap::new(),
            things,
            checksums: LevelChecksums::default(),
        };
        level.checksums = level.compute_checksums(&vertexes);
        level
    }

    fn compute_checksums(&self, vertexes: &[u8]) -> LevelChecksums {
        let mut linedefs = Vec::new();
        for line in &self.baseline.lines {
            linedefs.extend_from_slice(&line.front.to_be_bytes());
            linedefs.extend_from_slice(&line.back.map_or(-1, |b| b as i32).to_be_bytes());
            linedefs.extend_from_slice(&line.flags.to_be_bytes());
        }

        let mut sidedefs = Vec::new();
        for side in &self.baseline.sides {
            for texture in &side.textures {
                sidedefs.extend_from_slice(texture.as_bytes());
                sidedefs.push(0);
            }
        }

        let mut sectors = Vec::new();
        for sector in &self.baseline.sectors {
            sectors.extend_from_slice(&sector.floor_height.to_be_bytes());
            sectors.extend_from_slice(&sector.ceiling_height.to_be_bytes());
            sectors.extend_from_slice(sector.floor_flat.as_bytes());
            sectors.extend_from_slice(sector.ceiling_flat.as_bytes());
            sectors.extend_from_slice(&sector.light_level.to_be_bytes());
        }

        LevelChecksums {
            vertexes: lump_checksum(vertexes),
            linedefs: lump_checksum(&linedefs),
            sidedefs: lump_checksum(&sidedefs),
            sectors: lump_checksum(&sectors),
            behavior: lump_checksum(self.name.as_bytes()),
        }
    }

    pub fn checksums(&self) -> &LevelChecksums {
        &self.checksums
    }

    pub fn sector(&self, index: u16) -> Option<&Sector> {
        self.sectors.get(index as usize)
    }

    pub fn sector_mut(&mut self, index: u16) -> Option<&mut Sector> {
        self.sectors.get_mut(index as usize)
    }

    pub fn line_mut(&mut self, index: u16) -> Option<&mut Line> {
        self.lines.get_mut(index as usize)
    }

    pub fn side_mut(&mut self, index: u16) -> Option<&mut Side> {
        self.sides.get_mut(index as usize)
    }

    pub fn polyobject_mut(&mut self, index: u16) -> Option<&mut Polyobject> {
        self.polyobjects.get_mut(index as usize)
    }

    /// Side index behind `side` of `line`.
    pub fn line_side(&self, line: u16, side: LineSide) -> Option<u16> {
        let line = self.lines.get(line as usize)?;
        match side {
            LineSide::Front => Some(line.front),
            LineSide::Back => line.back,
        }
    }

    pub fn default_sector(&self, index: u16) -> Option<&Sector> {
        self.baseline.sectors.get(index as usize)
    }

    pub fn default_line(&self, index: u16) -> Option<&Line> {
        self.baseline.lines.get(index as usize)
    }

    pub fn default_side(&self, index: u16) -> Option<&Side> {
        self.baseline.sides.get(index as usize)
    }

    pub fn default_polyobject(&self, index: u16) -> Option<&Polyobject> {
        self.baseline.polyobjects.get(index as usize)
    }

    /// True once anything differs from the state captured at load.
    pub fn is_modified(&self) -> bool {
        self.sectors != self.baseline.sectors
            || self.lines != self.baseline.lines
            || self.sides != self.baseline.sides
            || self.polyobjects != self.baseline.polyobjects
            || !self.movers.is_empty()
    }

    /// Puts every sector, line, side and polyobject back to its loaded state.
    pub fn reset(&mut self) {
        self.sectors = self.baseline.sectors.clone();
        self.lines = self.baseline.lines.clone();
        self.sides = self.baseline.sides.clone();
        self.polyobjects = self.baseline.polyobjects.clone();
        self.movers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_deterministic() {
        let a = Level::generate("MAP01");
        let b = Level::generate("map01");
        assert_eq!(a.checksums(), b.checksums());
        assert_eq!(a.sectors, b.sectors);
        assert!(!a.is_modified());
    }

    #[test]
    fn test_different_maps_have_different_checksums() {
        let a = Level::generate("MAP01");
        let b = Level::generate("MAP02");
        assert_ne!(a.checksums().behavior, b.checksums().behavior);
        assert_eq!(a.checksums().vertexes.len(), 8);
    }

    #[test]
    fn test_changes_are_tracked_against_baseline() {
        let mut level = Level::generate("E1M1");
        let light = level.sectors[0].light_level;
        level.sectors[0].light_level = light + 16;

        assert!(level.is_modified());
        assert_eq!(level.default_sector(0).unwrap().light_level, light);

        level.reset();
        assert!(!level.is_modified());
    }

    #[test]
    fn test_line_sides() {
        let level = Level::generate("MAP07");
        let front = level.line_side(0, LineSide::Front).unwrap();
        assert_eq!(front, level.lines[0].front);
        assert_eq!(level.line_side(60_000, LineSide::Front), None);
    }
}
