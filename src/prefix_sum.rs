//! Summed volume tables over the global workload grid.
//!
//! After the global reduction every rank holds the same workload grid `W`. The
//! table stores the inclusive prefix sum
//! ```text
//! S(i, j, k) = sum of W(i', j', k') over i' <= i, j' <= j, k' <= k
//! ```
//! so that the workload of any axis aligned box is a combination of at most
//! eight table entries.

use rayon::{
    iter::{
        IndexedParallelIterator, IntoParallelIterator, IntoParallelRefIterator,
        IntoParallelRefMutIterator, ParallelIterator,
    },
    slice::ParallelSliceMut,
};

use crate::{
    geometry::TileBox,
    workload::{tile_count, tile_index},
};

/// Extent of a query along one axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AxisRange {
    /// The whole axis.
    Full,
    /// The half-open tile range `[start, end)`.
    Span(usize, usize),
}

/// A 3D inclusive prefix sum of a workload grid.
#[derive(Clone, Debug)]
pub struct PrefixSumTable {
    tiles_per_dim: [usize; 3],
    sums: Vec<u64>,
}

impl PrefixSumTable {
    /// Build the table in place from a global workload grid.
    ///
    /// The grid is stored row-major with the last axis running fastest. The
    /// sum is accumulated along axis 0, then axis 1, then axis 2. Each line is
    /// scanned sequentially, separate lines are scanned in parallel.
    ///
    /// # Panics
    /// If `workload` does not have one entry per tile.
    pub fn build(workload: Vec<u64>, tiles_per_dim: [usize; 3]) -> Self {
        assert_eq!(Some(workload.len()), tile_count(tiles_per_dim).ok());

        let mut sums = workload;
        let [_, ny, nz] = tiles_per_dim;
        let plane = ny * nz;

        if plane > 0 {
            // Axis 0: every plane accumulates its predecessor. The lines are the
            // (j, k) positions within a plane.
            let nplanes = sums.len() / plane;
            for i in 1..nplanes {
                let (done, rest) = sums.split_at_mut(i * plane);
                rest[..plane]
                    .par_iter_mut()
                    .zip(done[(i - 1) * plane..].par_iter())
                    .for_each(|(current, previous)| *current += *previous);
            }

            // Axis 1: scan along j for every (i, k).
            sums.par_chunks_mut(plane).for_each(|slab| {
                for k in 0..nz {
                    let mut acc = 0;
                    for j in 0..ny {
                        acc += slab[j * nz + k];
                        slab[j * nz + k] = acc;
                    }
                }
            });

            // Axis 2: lines are contiguous.
            sums.par_chunks_mut(nz).for_each(|line| {
                let mut acc = 0;
                for value in line {
                    acc += *value;
                    *value = acc;
                }
            });
        }

        Self {
            tiles_per_dim,
            sums,
        }
    }

    /// Tiles along each axis.
    pub fn tiles_per_dim(&self) -> [usize; 3] {
        self.tiles_per_dim
    }

    /// The table entry `S(i, j, k)`.
    pub fn entry(&self, tile: [usize; 3]) -> u64 {
        self.sums[tile_index(self.tiles_per_dim, tile)]
    }

    // Sum over [0, upper) along every axis. A zero bound contributes nothing.
    #[inline]
    fn prefix(&self, upper: [usize; 3]) -> u64 {
        if upper.contains(&0) {
            0
        } else {
            self.entry(upper.map(|u| u - 1))
        }
    }

    /// Workload of all tiles.
    pub fn total(&self) -> u64 {
        self.prefix(self.tiles_per_dim)
    }

    /// Workload inside a box, by inclusion-exclusion over its corners.
    ///
    /// Corners on a zero lower bound are skipped since their prefix is zero.
    /// Boxes reaching past the grid are clipped to it.
    pub fn box_sum(&self, tile_box: &TileBox) -> u64 {
        let lower = tile_box.lower();
        let upper: [usize; 3] =
            std::array::from_fn(|d| tile_box.upper()[d].min(self.tiles_per_dim[d]));

        if (0..3).any(|d| lower[d] >= upper[d]) {
            return 0;
        }

        // Corner `mask` takes the lower bound on every axis whose bit is set.
        // Positive and negative terms are accumulated separately so that the
        // integer arithmetic never wraps.
        let mut positive = 0;
        let mut negative = 0;

        for mask in 0..8_usize {
            if (0..3).any(|d| mask & (1 << d) != 0 && lower[d] == 0) {
                continue;
            }

            let corner: [usize; 3] =
                std::array::from_fn(|d| if mask & (1 << d) != 0 { lower[d] } else { upper[d] });

            if mask.count_ones() % 2 == 0 {
                positive += self.prefix(corner);
            } else {
                negative += self.prefix(corner);
            }
        }

        positive - negative
    }

    /// Workload of a region given per axis as either the full extent or a span.
    pub fn range_sum(&self, ranges: [AxisRange; 3]) -> u64 {
        let mut lower = [0; 3];
        let mut upper = self.tiles_per_dim;

        for (d, range) in ranges.iter().enumerate() {
            if let AxisRange::Span(start, end) = *range {
                lower[d] = start;
                upper[d] = end;
            }
        }

        self.box_sum(&TileBox::new(lower, upper))
    }

    /// Recover the workload of a single tile.
    pub fn value(&self, tile: [usize; 3]) -> u64 {
        self.box_sum(&TileBox::single(tile))
    }

    /// Recover the full workload grid.
    pub fn values(&self) -> Vec<u64> {
        let [_, ny, nz] = self.tiles_per_dim;
        (0..self.sums.len())
            .into_par_iter()
            .map(|index| self.value([index / (ny * nz), (index / nz) % ny, index % nz]))
            .collect()
    }
}
