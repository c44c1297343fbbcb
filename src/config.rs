//! Partitioner configuration.

use serde::{Deserialize, Serialize};

use crate::{
    constants::{CELLS_PER_TILE_DIM, CELL_BITS_PER_TILE_DIM},
    error::BalanceError,
};

/// Settings of a [SparseDimPartitioner](crate::partitioner::SparseDimPartitioner).
///
/// The struct can be read from any serde format. Missing fields take their
/// default values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionerConfig {
    /// Fraction of the particle count an imbalance may reach before a
    /// rebalance is required.
    pub max_workload_coeff: f32,
    /// Expected number of particles in the whole simulation.
    pub particle_count_estimate: usize,
    /// Minimum number of steps between two rebalances.
    pub rebalance_interval: u64,
    /// Global number of cells along each axis.
    pub global_cells_per_dim: [usize; 3],
    /// Explicit ranks per axis. If absent, a balanced factorization of the
    /// group size is used.
    pub ranks_per_dim: Option<[usize; 3]>,
}

impl Default for PartitionerConfig {
    fn default() -> Self {
        Self {
            max_workload_coeff: 1.5,
            particle_count_estimate: 0,
            rebalance_interval: 10,
            global_cells_per_dim: [CELLS_PER_TILE_DIM; 3],
            ranks_per_dim: None,
        }
    }
}

impl PartitionerConfig {
    /// Imbalance threshold, `max_workload_coeff * particle_count_estimate`.
    pub fn workload_threshold(&self) -> u64 {
        workload_threshold(self.max_workload_coeff, self.particle_count_estimate)
    }

    /// Global number of tiles along each axis.
    pub fn global_tiles_per_dim(&self) -> Result<[usize; 3], BalanceError> {
        cells_to_tiles(self.global_cells_per_dim)
    }

    /// Check the configuration without building anything.
    pub fn validate(&self) -> Result<(), BalanceError> {
        self.global_tiles_per_dim()?;
        if let Some(dims) = self.ranks_per_dim {
            if dims.contains(&0) {
                return Err(BalanceError::InvalidRankCount(dims));
            }
        }
        Ok(())
    }
}

/// Imbalance threshold for a workload coefficient and particle count.
pub(crate) fn workload_threshold(max_workload_coeff: f32, particle_count: usize) -> u64 {
    // Float to integer casts saturate, so negative products give zero.
    (max_workload_coeff as f64 * particle_count as f64) as u64
}

/// Convert global cell counts to tile counts.
///
/// Every count must be a positive multiple of the tile size.
pub fn cells_to_tiles(cells_per_dim: [usize; 3]) -> Result<[usize; 3], BalanceError> {
    let mut tiles = [0; 3];
    for (axis, &cells) in cells_per_dim.iter().enumerate() {
        if cells == 0 || cells % CELLS_PER_TILE_DIM != 0 {
            return Err(BalanceError::CellsNotTileAligned { axis, cells });
        }
        tiles[axis] = cells >> CELL_BITS_PER_TILE_DIM;
    }
    Ok(tiles)
}
