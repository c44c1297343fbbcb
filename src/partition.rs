//! Rectilinear partitions of the tile grid.
//!
//! Along every axis `d` an ordered sequence of `ranks[d] + 1` boundaries splits
//! the tiles into slabs. Rank coordinate `r` owns `[b[r], b[r + 1])`. The same
//! sequence is used for every position on the other two axes.

use serde::{Deserialize, Serialize};

use crate::{
    constants::{CELL_BITS_PER_TILE_DIM, NDIM},
    error::BalanceError,
    geometry::TileBox,
    mirror::KernelMirror,
};

/// The persisted form of a partition: one boundary sequence per axis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSnapshot {
    /// Boundary sequences for the x, y and z axes.
    pub boundaries: [Vec<usize>; 3],
}

/// Per-axis boundary sequences and the ownership they imply.
#[derive(Clone, Debug)]
pub struct RectPartition {
    ranks_per_dim: [usize; 3],
    tiles_per_dim: [usize; 3],
    boundaries: [Vec<usize>; 3],
    mirror: KernelMirror<usize>,
}

// Flatten the sequences into an axis-major array with a common stride.
fn mirror_layout(ranks_per_dim: [usize; 3], boundaries: &[Vec<usize>; 3]) -> Vec<usize> {
    let stride = ranks_per_dim.iter().max().copied().unwrap_or(0) + 1;
    let mut flat = vec![0; NDIM * stride];
    for (axis, seq) in boundaries.iter().enumerate() {
        flat[axis * stride..axis * stride + seq.len()].copy_from_slice(seq);
    }
    flat
}

/// Check a boundary sequence for one axis.
pub fn validate_boundaries(
    axis: usize,
    boundaries: &[usize],
    nranks: usize,
    ntiles: usize,
) -> Result<(), BalanceError> {
    if boundaries.len() != nranks + 1 {
        return Err(BalanceError::BoundaryLength {
            axis,
            expected: nranks + 1,
            found: boundaries.len(),
        });
    }

    // The length check guarantees at least one element.
    let first = boundaries[0];
    let last = boundaries[nranks];
    if first != 0 || last != ntiles {
        return Err(BalanceError::BoundaryEndpoints {
            axis,
            first,
            last,
            extent: ntiles,
        });
    }

    if let Some(index) = boundaries.windows(2).position(|w| w[1] < w[0]) {
        return Err(BalanceError::BoundaryNotMonotonic {
            axis,
            index: index + 1,
        });
    }

    Ok(())
}

impl RectPartition {
    /// A partition that gives every rank the same number of tiles, up to rounding.
    ///
    /// # Panics
    ///
    /// Panics if `ranks_per_dim` has a zero entry.
    pub fn uniform(ranks_per_dim: [usize; 3], tiles_per_dim: [usize; 3]) -> Self {
        let boundaries: [Vec<usize>; 3] = std::array::from_fn(|d| {
            (0..=ranks_per_dim[d])
                .map(|r| r * tiles_per_dim[d] / ranks_per_dim[d])
                .collect()
        });

        let mirror = KernelMirror::from_slice(&mirror_layout(ranks_per_dim, &boundaries));

        Self {
            ranks_per_dim,
            tiles_per_dim,
            boundaries,
            mirror,
        }
    }

    /// Install explicit boundary sequences, e.g. when restarting from a checkpoint.
    ///
    /// All three sequences are validated before anything changes. On error the
    /// partition is left untouched.
    pub fn initialize(
        &mut self,
        x: &[usize],
        y: &[usize],
        z: &[usize],
    ) -> Result<(), BalanceError> {
        self.replace([x.to_vec(), y.to_vec(), z.to_vec()])
    }

    /// Install a partition from its persisted form.
    pub fn restore(&mut self, snapshot: &PartitionSnapshot) -> Result<(), BalanceError> {
        self.replace(snapshot.boundaries.clone())
    }

    /// Replace all boundaries at once and refresh the kernel mirror.
    pub(crate) fn replace(&mut self, boundaries: [Vec<usize>; 3]) -> Result<(), BalanceError> {
        for (axis, seq) in boundaries.iter().enumerate() {
            validate_boundaries(axis, seq, self.ranks_per_dim[axis], self.tiles_per_dim[axis])?;
        }

        self.mirror.sync_from(&mirror_layout(self.ranks_per_dim, &boundaries));
        self.boundaries = boundaries;

        Ok(())
    }

    /// The persisted form of this partition.
    pub fn snapshot(&self) -> PartitionSnapshot {
        PartitionSnapshot {
            boundaries: self.boundaries.clone(),
        }
    }

    /// Ranks along each axis.
    pub fn ranks_per_dim(&self) -> [usize; 3] {
        self.ranks_per_dim
    }

    /// Tiles along each axis.
    pub fn tiles_per_dim(&self) -> [usize; 3] {
        self.tiles_per_dim
    }

    /// Boundary sequence of an axis.
    pub fn boundaries(&self, axis: usize) -> &[usize] {
        &self.boundaries[axis]
    }

    /// Kernel side replica of the boundaries.
    ///
    /// Axis `d` occupies `[d * stride, d * stride + ranks[d] + 1)` with
    /// `stride = max(ranks) + 1`.
    pub fn mirror(&self) -> &KernelMirror<usize> {
        &self.mirror
    }

    /// Tiles owned by a rank along each axis.
    ///
    /// # Panics
    ///
    /// Panics if a coordinate of `rank_coord` is not below the ranks of its axis.
    pub fn owned_tiles(&self, rank_coord: [usize; 3]) -> [usize; 3] {
        std::array::from_fn(|d| {
            let seq = &self.boundaries[d];
            seq[rank_coord[d] + 1] - seq[rank_coord[d]]
        })
    }

    /// Cells owned by a rank along each axis.
    ///
    /// # Panics
    ///
    /// Panics under the same conditions as [Self::owned_tiles].
    pub fn owned_cells(&self, rank_coord: [usize; 3]) -> [usize; 3] {
        self.owned_tiles(rank_coord).map(|t| t << CELL_BITS_PER_TILE_DIM)
    }

    /// The box of tiles owned by a rank.
    ///
    /// # Panics
    ///
    /// Panics under the same conditions as [Self::owned_tiles].
    pub fn owned_box(&self, rank_coord: [usize; 3]) -> TileBox {
        TileBox::new(
            std::array::from_fn(|d| self.boundaries[d][rank_coord[d]]),
            std::array::from_fn(|d| self.boundaries[d][rank_coord[d] + 1]),
        )
    }

    /// Rank coordinates owning a tile, or `None` if the tile is outside the grid.
    ///
    /// Uses the kernel mirror, so it can be called from parallel tasks.
    pub fn owner_of_tile(&self, tile: [usize; 3]) -> Option<[usize; 3]> {
        let stride = self.mirror.len() / NDIM;
        let flat = self.mirror.as_slice();
        let mut owner = [0; 3];

        for d in 0..NDIM {
            if tile[d] >= self.tiles_per_dim[d] {
                return None;
            }
            let seq = &flat[d * stride..d * stride + self.ranks_per_dim[d] + 1];
            // Empty ranks share their boundary with the next rank, so the last
            // boundary not above the tile belongs to the owning rank.
            owner[d] = seq.partition_point(|&b| b <= tile[d]) - 1;
        }

        Some(owner)
    }

    /// Number of ranks that own no tile.
    pub fn empty_ranks(&self) -> usize {
        let empty_slabs: [usize; 3] = std::array::from_fn(|d| {
            self.boundaries[d]
                .windows(2)
                .filter(|w| w[0] == w[1])
                .count()
        });
        let total: usize = self.ranks_per_dim.iter().product();
        let nonempty: usize = (0..NDIM)
            .map(|d| self.ranks_per_dim[d] - empty_slabs[d])
            .product();
        total - nonempty
    }
}
