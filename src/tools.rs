//! Utility routines for generating test and demo data.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Get a seeded rng
pub fn seeded_rng(seed: usize) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed as u64)
}

/// Generate uniformly distributed particle positions.
///
/// Positions are returned as flat `[x0, y0, z0, x1, ...]` triples inside the
/// box `[0, extent[0]) x [0, extent[1]) x [0, extent[2])`.
pub fn generate_random_positions<R: Rng>(
    npoints: usize,
    extent: [f64; 3],
    rng: &mut R,
) -> Vec<f64> {
    let mut positions = Vec::<f64>::with_capacity(3 * npoints);

    for _ in 0..npoints {
        for &e in &extent {
            positions.push(rng.gen::<f64>() * e);
        }
    }

    positions
}

/// Generate positions clustered around a single point.
///
/// Every coordinate is offset from `center` by at most `radius`, with offsets
/// strongly biased towards zero. Positions are clamped into
/// `[0, extent[d])` so that they stay inside the grid.
pub fn generate_clustered_positions<R: Rng>(
    npoints: usize,
    center: [f64; 3],
    radius: f64,
    extent: [f64; 3],
    rng: &mut R,
) -> Vec<f64> {
    let mut positions = Vec::<f64>::with_capacity(3 * npoints);

    for _ in 0..npoints {
        for d in 0..3 {
            let offset = rng.gen_range(-1.0..1.0_f64).powi(3) * radius;
            let upper = extent[d] * (1.0 - f64::EPSILON);
            positions.push((center[d] + offset).clamp(0.0, upper));
        }
    }

    positions
}

/// Generate `ntiles` random tile coordinates inside a grid of `tiles_per_dim` tiles.
///
/// Coordinates may repeat.
pub fn generate_random_tiles<R: Rng>(
    ntiles: usize,
    tiles_per_dim: [usize; 3],
    rng: &mut R,
) -> Vec<[usize; 3]> {
    (0..ntiles)
        .map(|_| {
            [
                rng.gen_range(0..tiles_per_dim[0]),
                rng.gen_range(0..tiles_per_dim[1]),
                rng.gen_range(0..tiles_per_dim[2]),
            ]
        })
        .collect()
}

/// Cell extents of a grid with `tiles_per_dim` tiles.
pub fn tiles_to_cells(tiles_per_dim: [usize; 3]) -> [usize; 3] {
    tiles_per_dim.map(|t| t << crate::constants::CELL_BITS_PER_TILE_DIM)
}
