//! Deterministic terrain generation
//!
//! The map is a pure function of a seed string so that the server and any
//! client holding the same seed build the identical grid. Hand-placed feature
//! templates (forests, a river, a lake, mountain bars and clusters) are laid
//! down first, some of them gated by a coordinate noise function, and then the
//! layout is post-processed so control points and both home bands are always
//! reachable.

use crate::{CONTROL_POINTS, GRID_HEIGHT, GRID_WIDTH, HOME_COLUMNS};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of a single grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Terrain {
    Open,
    Forest,
    Water,
    Mountain,
}

impl Terrain {
    /// Water and mountains cannot be entered
    pub fn is_walkable(self) -> bool {
        matches!(self, Terrain::Open | Terrain::Forest)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TerrainError {
    #[error("cell ({x}, {y}) is outside the {width}x{height} grid")]
    OutOfBounds {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },
    #[error("noise function produced a non-finite value for seed {0}")]
    NonFiniteNoise(f64),
}

/// Row-major terrain grid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    width: i32,
    height: i32,
    cells: Vec<Terrain>,
}

impl Grid {
    pub fn filled(width: i32, height: i32, terrain: Terrain) -> Self {
        let len = (width.max(0) * height.max(0)) as usize;
        Self {
            width,
            height,
            cells: vec![terrain; len],
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }

    /// Returns the terrain at a cell, or None outside the grid
    pub fn get(&self, x: i32, y: i32) -> Option<Terrain> {
        if self.in_bounds(x, y) {
            Some(self.cells[(y * self.width + x) as usize])
        } else {
            None
        }
    }

    pub fn set(&mut self, x: i32, y: i32, terrain: Terrain) -> Result<(), TerrainError> {
        if !self.in_bounds(x, y) {
            return Err(TerrainError::OutOfBounds {
                x,
                y,
                width: self.width,
                height: self.height,
            });
        }
        let index = (y * self.width + x) as usize;
        self.cells[index] = terrain;
        Ok(())
    }

    /// Writes the cell only when it lies on the grid. Templates that may
    /// overhang an edge use this instead of `set`.
    fn set_clipped(&mut self, x: i32, y: i32, terrain: Terrain) {
        if self.in_bounds(x, y) {
            self.cells[(y * self.width + x) as usize] = terrain;
        }
    }

    /// Number of cells of each kind, in `Open, Forest, Water, Mountain` order
    pub fn distribution(&self) -> [usize; 4] {
        let mut counts = [0; 4];
        for cell in &self.cells {
            let slot = match cell {
                Terrain::Open => 0,
                Terrain::Forest => 1,
                Terrain::Water => 2,
                Terrain::Mountain => 3,
            };
            counts[slot] += 1;
        }
        counts
    }
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    x: i32,
    y: i32,
    w: i32,
    h: i32,
}

const fn rect(x: i32, y: i32, w: i32, h: i32) -> Rect {
    Rect { x, y, w, h }
}

const FOREST_AREAS: [Rect; 5] = [
    rect(12, 7, 6, 6),
    rect(3, 3, 5, 5),
    rect(22, 3, 5, 5),
    rect(3, 12, 5, 5),
    rect(22, 12, 5, 5),
];

const FOREST_PATCHES: [Rect; 4] = [
    rect(8, 8, 3, 3),
    rect(19, 8, 3, 3),
    rect(14, 15, 3, 3),
    rect(14, 2, 3, 3),
];

const MOUNTAIN_BARS: [Rect; 6] = [
    rect(7, 3, 2, 1),
    rect(21, 3, 2, 1),
    rect(7, 16, 2, 1),
    rect(21, 16, 2, 1),
    rect(13, 8, 4, 1),
    rect(13, 11, 4, 1),
];

/// (center x, center y, radius)
const MOUNTAIN_CLUSTERS: [(i32, i32, i32); 4] = [(2, 2, 2), (27, 2, 2), (2, 17, 2), (27, 17, 2)];

const LAKE: (i32, i32, i32) = (24, 16, 3);
const RIVER_WIDTH: i32 = 2;
const FOREST_AREA_CHANCE: f64 = 0.7;
const FOREST_PATCH_CHANCE: f64 = 0.6;
const MOUNTAIN_CLUSTER_CHANCE: f64 = 0.7;

/// Only this many leading characters of a seed are read as a number
const SEED_PREFIX_LEN: usize = 10;

/// Hashed seeds are folded into the range of a ten digit number
const SEED_MODULUS: u64 = 10_000_000_000;

/// Maps a seed string onto the numeric offset used by the noise function.
///
/// The leading digits of the first ten characters are read as a number,
/// so `"12345678901234"` and `"1234567890abc"` share a map. Seeds with no
/// leading digit are hashed with FNV-1a instead.
pub fn seed_value(seed: &str) -> f64 {
    let prefix: String = seed.chars().take(SEED_PREFIX_LEN).collect();
    let digits: String = prefix
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    if let Ok(n) = digits.parse::<u64>() {
        return n as f64;
    }

    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in seed.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % SEED_MODULUS) as f64
}

/// Coordinate noise in `[0, 1)`, stable for a given seed value
pub fn noise(seed: f64, x: i32, y: i32) -> f64 {
    let v = (f64::from(x) * 12.9898 + f64::from(y) * 78.233 + seed).sin() * 43758.5453;
    v - v.floor()
}

/// Builds the terrain grid for `seed`.
///
/// Never fails: if the template pass errors the simpler modulo pattern is
/// used instead. Both paths go through the same post-processing.
pub fn generate(seed: &str) -> Grid {
    let mut grid = match generate_templates(seed, GRID_WIDTH, GRID_HEIGHT) {
        Ok(grid) => grid,
        Err(e) => {
            warn!("Terrain generation for seed {:?} failed ({}), using fallback", seed, e);
            generate_fallback(GRID_WIDTH, GRID_HEIGHT)
        }
    };

    clear_control_points(&mut grid);
    clear_home_bands(&mut grid);

    let [open, forest, water, mountain] = grid.distribution();
    debug!(
        "Terrain for seed {:?}: open={} forest={} water={} mountain={}",
        seed, open, forest, water, mountain
    );
    grid
}

fn generate_templates(seed: &str, width: i32, height: i32) -> Result<Grid, TerrainError> {
    let seed = seed_value(seed);
    if !noise(seed, 0, 0).is_finite() {
        return Err(TerrainError::NonFiniteNoise(seed));
    }

    let mut grid = Grid::filled(width, height, Terrain::Open);

    for (i, area) in FOREST_AREAS.iter().enumerate() {
        for y in area.y..area.y + area.h {
            for x in area.x..area.x + area.w {
                if noise(seed, x + i as i32, y) < FOREST_AREA_CHANCE {
                    grid.set(x, y, Terrain::Forest)?;
                }
            }
        }
    }

    for (i, patch) in FOREST_PATCHES.iter().enumerate() {
        for y in patch.y..patch.y + patch.h {
            for x in patch.x..patch.x + patch.w {
                if noise(seed, x + i as i32 * 10, y + 100) < FOREST_PATCH_CHANCE {
                    grid.set(x, y, Terrain::Forest)?;
                }
            }
        }
    }

    // River meanders around the middle row
    let river_y = height / 2;
    for x in 0..width {
        let base = river_y + ((f64::from(x) * 0.5).sin() * 2.0).floor() as i32;
        for w in 0..RIVER_WIDTH {
            grid.set_clipped(x, base + w, Terrain::Water);
        }
    }

    let (lake_x, lake_y, lake_r) = LAKE;
    for y in lake_y - lake_r..=lake_y + lake_r {
        for x in lake_x - lake_r..=lake_x + lake_r {
            if distance_sq(x, y, lake_x, lake_y) <= lake_r * lake_r {
                grid.set_clipped(x, y, Terrain::Water);
            }
        }
    }

    let band_x = width - 2;
    for y in 0..height {
        if y % 5 != 0 {
            grid.set(band_x, y, Terrain::Mountain)?;
        }
    }

    for bar in &MOUNTAIN_BARS {
        for y in bar.y..bar.y + bar.h {
            for x in bar.x..bar.x + bar.w {
                if !is_control_point(x, y) {
                    grid.set(x, y, Terrain::Mountain)?;
                }
            }
        }
    }

    for (i, &(cx, cy, r)) in MOUNTAIN_CLUSTERS.iter().enumerate() {
        for y in cy - r..=cy + r {
            for x in cx - r..=cx + r {
                if !grid.in_bounds(x, y) || distance_sq(x, y, cx, cy) > r * r {
                    continue;
                }
                if noise(seed, x * 5 + i as i32, y * 7) < MOUNTAIN_CLUSTER_CHANCE
                    && !is_control_point(x, y)
                {
                    grid.set(x, y, Terrain::Mountain)?;
                }
            }
        }
    }

    Ok(grid)
}

/// Fully deterministic modulo pattern used when template generation fails
pub fn generate_fallback(width: i32, height: i32) -> Grid {
    let mut grid = Grid::filled(width, height, Terrain::Open);
    for y in 0..height {
        for x in 0..width {
            let mut cell = Terrain::Open;
            if (x + y) % 7 == 0 {
                cell = Terrain::Forest;
            }
            if (x + y) % 13 == 0 {
                cell = Terrain::Water;
            }
            if (x * y) % 29 == 0 {
                cell = Terrain::Mountain;
            }
            grid.set_clipped(x, y, cell);
        }
    }
    grid
}

fn clear_control_points(grid: &mut Grid) {
    for &(_, px, py) in &CONTROL_POINTS {
        grid.set_clipped(px, py, Terrain::Open);
        for y in py - 1..=py + 1 {
            for x in px - 1..=px + 1 {
                if matches!(grid.get(x, y), Some(Terrain::Water | Terrain::Mountain)) {
                    grid.set_clipped(x, y, Terrain::Open);
                }
            }
        }
    }
}

fn clear_home_bands(grid: &mut Grid) {
    let width = grid.width();
    for y in 0..grid.height() {
        for x in (0..HOME_COLUMNS).chain(width - HOME_COLUMNS..width) {
            grid.set_clipped(x, y, Terrain::Open);
        }
    }
}

fn is_control_point(x: i32, y: i32) -> bool {
    CONTROL_POINTS.iter().any(|&(_, px, py)| px == x && py == y)
}

fn distance_sq(x1: i32, y1: i32, x2: i32, y2: i32) -> i32 {
    (x2 - x1).pow(2) + (y2 - y1).pow(2)
}
