//! Terrain height queries.
//!
//! Terrain meshes live outside this crate; the simulation only needs heights
//! and world bounds. Server and client build the same [`HeightMap`] from the
//! level seed, so client replay and server physics agree.

use rand::{rngs::StdRng, Rng, SeedableRng};

/// Default world extent on X and Z.
pub const WORLD_SIZE: f32 = 100.0;

/// Samples per side of the generated heightmap.
pub const HEIGHTMAP_RESOLUTION: usize = 32;

/// Height lookup plus world bounds.
pub trait TerrainHeight: Send + Sync {
    fn height_at(&self, x: f32, z: f32) -> f32;

    /// World extent as `(size_x, size_z)`, starting at the origin.
    fn size(&self) -> (f32, f32);

    fn clamp_x(&self, x: f32, margin: f32) -> f32 {
        x.clamp(margin, self.size().0 - margin)
    }

    fn clamp_z(&self, z: f32, margin: f32) -> f32 {
        z.clamp(margin, self.size().1 - margin)
    }
}

/// Regular grid of heights sampled bilinearly.
#[derive(Debug, Clone)]
pub struct HeightMap {
    size_x: f32,
    size_z: f32,
    resolution: usize,
    /// Row-major by X: `heights[x * resolution + z]`.
    heights: Vec<f32>,
}

impl HeightMap {
    /// Random gentle terrain in `[-0.5, 0.5]`, reproducible from `seed`.
    pub fn generate(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let resolution = HEIGHTMAP_RESOLUTION;
        let heights = (0..resolution * resolution)
            .map(|_| rng.gen_range(-0.5f32..=0.5))
            .collect();
        Self {
            size_x: WORLD_SIZE,
            size_z: WORLD_SIZE,
            resolution,
            heights,
        }
    }

    /// Constant height everywhere.
    pub fn flat(size_x: f32, size_z: f32, height: f32) -> Self {
        let resolution = 2;
        Self {
            size_x,
            size_z,
            resolution,
            heights: vec![height; resolution * resolution],
        }
    }

    fn sample(&self, ix: usize, iz: usize) -> f32 {
        self.heights[ix * self.resolution + iz]
    }
}

impl TerrainHeight for HeightMap {
    fn height_at(&self, x: f32, z: f32) -> f32 {
        let last = (self.resolution - 1) as f32;
        let hx = (x / self.size_x * last).clamp(0.0, last);
        let hz = (z / self.size_z * last).clamp(0.0, last);
        let ix = (hx as usize).min(self.resolution - 2);
        let iz = (hz as usize).min(self.resolution - 2);
        let fx = hx - ix as f32;
        let fz = hz - iz as f32;

        let h0 = crate::math::lerp(self.sample(ix, iz), self.sample(ix + 1, iz), fx);
        let h1 = crate::math::lerp(self.sample(ix, iz + 1), self.sample(ix + 1, iz + 1), fx);
        crate::math::lerp(h0, h1, fz)
    }

    fn size(&self) -> (f32, f32) {
        (self.size_x, self.size_z)
    }
}
