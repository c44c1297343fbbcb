//! Per-tile workload histograms.
//!
//! Every rank counts its own workload into a dense [WorkloadGrid] covering the
//! whole global tile grid. Counting is data parallel and lock free: every
//! work item does an atomic increment of the counter of its tile. The local
//! grids are then summed across ranks with a single all-reduce.

use std::sync::atomic::{AtomicU64, Ordering};

use rayon::iter::{
    IndexedParallelIterator, IntoParallelIterator, IntoParallelRefIterator,
    IntoParallelRefMutIterator, ParallelIterator,
};

use crate::{
    collective::CollectiveGroup,
    constants::CELL_BITS_PER_TILE_DIM,
    error::BalanceError,
    morton::OccupiedTiles,
};

/// Allocate a zeroed buffer, reporting allocation failure instead of aborting.
pub(crate) fn zeroed_buffer<T: Default + Clone>(len: usize) -> Result<Vec<T>, BalanceError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| BalanceError::Allocation { tiles: len })?;
    buffer.resize(len, T::default());
    Ok(buffer)
}

/// Number of tiles in a grid, guarding against overflow.
pub(crate) fn tile_count(tiles_per_dim: [usize; 3]) -> Result<usize, BalanceError> {
    tiles_per_dim
        .iter()
        .try_fold(1_usize, |acc, &n| acc.checked_mul(n))
        .ok_or(BalanceError::Allocation { tiles: usize::MAX })
}

/// Row-major index of a tile, with the last axis running fastest.
#[inline]
pub(crate) fn tile_index(tiles_per_dim: [usize; 3], tile: [usize; 3]) -> usize {
    (tile[0] * tiles_per_dim[1] + tile[1]) * tiles_per_dim[2] + tile[2]
}

/// Dense counters over the global tile grid of one rank.
pub struct WorkloadGrid {
    tiles_per_dim: [usize; 3],
    counts: Vec<AtomicU64>,
}

impl WorkloadGrid {
    /// Allocate a zeroed grid.
    pub fn new(tiles_per_dim: [usize; 3]) -> Result<Self, BalanceError> {
        let ntiles = tile_count(tiles_per_dim)?;
        let mut counts = Vec::new();
        counts
            .try_reserve_exact(ntiles)
            .map_err(|_| BalanceError::Allocation { tiles: ntiles })?;
        counts.extend((0..ntiles).map(|_| AtomicU64::new(0)));

        Ok(Self {
            tiles_per_dim,
            counts,
        })
    }

    /// Tiles along each axis.
    pub fn tiles_per_dim(&self) -> [usize; 3] {
        self.tiles_per_dim
    }

    /// Number of tiles in the grid.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// True if the grid has no tiles.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Set all counters to zero.
    pub fn reset(&mut self) {
        for count in &mut self.counts {
            *count.get_mut() = 0;
        }
    }

    /// Check if a tile lies in the grid.
    pub fn contains(&self, tile: [usize; 3]) -> bool {
        tile.iter().zip(self.tiles_per_dim).all(|(&t, n)| t < n)
    }

    /// Current count of a tile.
    pub fn get(&self, tile: [usize; 3]) -> u64 {
        self.counts[tile_index(self.tiles_per_dim, tile)].load(Ordering::Relaxed)
    }

    #[inline]
    fn increment(&self, tile: [usize; 3]) {
        self.counts[tile_index(self.tiles_per_dim, tile)].fetch_add(1, Ordering::Relaxed);
    }

    // Map a position to its tile. On failure the signed tile index is returned.
    fn tile_of(&self, point: &[f64; 3], dx: f64) -> Result<[usize; 3], [i64; 3]> {
        let tile = point.map(|x| ((x / dx).floor() as i64) >> CELL_BITS_PER_TILE_DIM);
        let inside = point.iter().all(|x| x.is_finite())
            && tile
                .iter()
                .zip(self.tiles_per_dim)
                .all(|(&t, n)| t >= 0 && (t as usize) < n);

        if inside {
            Ok(tile.map(|t| t as usize))
        } else {
            Err(tile)
        }
    }

    /// Count particles.
    ///
    /// `positions` holds flat xyz triples and `dx` is the cell size. A particle
    /// at `x` lies in cell `floor(x / dx)` and adds one to the counter of that
    /// cell's tile. All positions are checked before any counter is touched, so
    /// a failed call leaves the grid unchanged.
    pub fn accumulate_particles(&self, positions: &[f64], dx: f64) -> Result<(), BalanceError> {
        if positions.len() % 3 != 0 {
            return Err(BalanceError::MalformedPositions(positions.len()));
        }

        let points: &[[f64; 3]] = bytemuck::cast_slice(positions);

        if let Some((index, tile)) = points
            .par_iter()
            .enumerate()
            .find_map_first(|(index, point)| self.tile_of(point, dx).err().map(|t| (index, t)))
        {
            return Err(BalanceError::ParticleOutsideGrid { index, tile });
        }

        points.par_iter().for_each(|point| {
            if let Ok(tile) = self.tile_of(point, dx) {
                self.increment(tile);
            }
        });

        Ok(())
    }

    /// Count occupied tiles. Every valid slot of `tiles` adds one to its tile.
    ///
    /// As for particles, all tiles are checked before counting starts.
    pub fn accumulate_occupied<T: OccupiedTiles>(&self, tiles: &T) -> Result<(), BalanceError> {
        let occupied = || {
            (0..tiles.capacity())
                .into_par_iter()
                .filter_map(|slot| tiles.key_at(slot))
                .map(|key| tiles.key_to_tile(key))
        };

        if let Some(tile) = occupied().find_first(|&tile| !self.contains(tile)) {
            return Err(BalanceError::TileOutsideGrid { tile });
        }

        occupied().for_each(|tile| self.increment(tile));

        Ok(())
    }

    /// Sum of all counters.
    pub fn total(&self) -> u64 {
        self.counts
            .par_iter()
            .map(|count| count.load(Ordering::Relaxed))
            .sum()
    }

    /// Copy the counters into a plain vector.
    pub fn to_vec(&self) -> Result<Vec<u64>, BalanceError> {
        let mut values = zeroed_buffer::<u64>(self.counts.len())?;
        values
            .par_iter_mut()
            .zip(self.counts.par_iter())
            .for_each(|(value, count)| *value = count.load(Ordering::Relaxed));
        Ok(values)
    }

    /// Sum the grids of all members of `group`.
    ///
    /// This is a single blocking all-reduce. Every member receives the same
    /// global grid.
    pub fn reduce_global<G: CollectiveGroup>(&self, group: &G) -> Result<Vec<u64>, BalanceError> {
        let local = self.to_vec()?;
        let mut global = zeroed_buffer::<u64>(local.len())?;

        group.all_reduce_sum(&local, &mut global)?;

        log::debug!(
            "rank {}: reduced workload grid of {} tiles across {} ranks",
            group.rank(),
            global.len(),
            group.size()
        );

        Ok(global)
    }
}

#[cfg(test)]
mod test {
    use itertools::Itertools;

    use super::WorkloadGrid;
    use crate::{
        collective::SerialGroup,
        error::BalanceError,
        morton::{OccupiedTiles, SparseTileSet},
        tools::{generate_random_positions, generate_random_tiles, seeded_rng},
    };

    #[test]
    fn test_particles_are_counted_once() {
        let mut rng = seeded_rng(0);
        let grid = WorkloadGrid::new([4, 5, 6]).unwrap();

        // 16 x 20 x 24 cells of size 0.5.
        let positions = generate_random_positions(10_000, [8.0, 10.0, 12.0], &mut rng);
        grid.accumulate_particles(&positions, 0.5).unwrap();

        assert_eq!(grid.total(), 10_000);
    }

    #[test]
    fn test_particle_tile_mapping() {
        let grid = WorkloadGrid::new([2, 2, 2]).unwrap();

        // Cell (5, 0, 7) lies in tile (1, 0, 1).
        grid.accumulate_particles(&[5.5, 0.2, 7.9], 1.0).unwrap();
        assert_eq!(grid.get([1, 0, 1]), 1);

        // Everything in one tile.
        let positions = [0.1, 0.1, 0.1].repeat(500);
        grid.accumulate_particles(&positions, 1.0).unwrap();
        assert_eq!(grid.get([0, 0, 0]), 500);
        assert_eq!(grid.total(), 501);
    }

    #[test]
    fn test_rejects_bad_particles_without_counting() {
        let grid = WorkloadGrid::new([2, 2, 2]).unwrap();

        let err = grid
            .accumulate_particles(&[1.0, 1.0, 1.0, 1.0, -0.5, 1.0], 1.0)
            .unwrap_err();
        assert!(matches!(err, BalanceError::ParticleOutsideGrid { index: 1, .. }));

        let err = grid.accumulate_particles(&[1.0, 9.0, 1.0], 1.0).unwrap_err();
        assert!(matches!(
            err,
            BalanceError::ParticleOutsideGrid { index: 0, tile } if tile == [0, 2, 0]
        ));

        assert!(matches!(
            grid.accumulate_particles(&[1.0, 1.0], 1.0),
            Err(BalanceError::MalformedPositions(2))
        ));
        assert!(grid.accumulate_particles(&[f64::NAN, 1.0, 1.0], 1.0).is_err());

        assert_eq!(grid.total(), 0);
    }

    #[test]
    fn test_occupied_tiles() {
        let mut rng = seeded_rng(1);
        let tiles = generate_random_tiles(200, [3, 4, 5], &mut rng);
        let set = SparseTileSet::from_tiles(tiles.iter().copied());

        let grid = WorkloadGrid::new([3, 4, 5]).unwrap();
        grid.accumulate_occupied(&set).unwrap();

        assert_eq!(grid.total() as usize, set.len());
        for tile in tiles.iter().unique() {
            assert_eq!(grid.get(*tile), 1);
        }

        let outside = SparseTileSet::from_tiles([[0, 0, 0], [3, 0, 0]]);
        assert!(matches!(
            grid.accumulate_occupied(&outside),
            Err(BalanceError::TileOutsideGrid { tile: [3, 0, 0] })
        ));
        assert_eq!(grid.total() as usize, set.len());
    }

    // A hash-table like set with empty slots.
    struct SlotTable(Vec<Option<[usize; 3]>>);

    impl OccupiedTiles for SlotTable {
        type Key = [usize; 3];

        fn capacity(&self) -> usize {
            self.0.len()
        }

        fn key_at(&self, slot: usize) -> Option<[usize; 3]> {
            self.0[slot]
        }

        fn key_to_tile(&self, key: [usize; 3]) -> [usize; 3] {
            key
        }
    }

    #[test]
    fn test_invalid_slots_are_skipped() {
        let table = SlotTable(vec![None, Some([1, 1, 1]), None, Some([0, 1, 0]), None]);
        let grid = WorkloadGrid::new([2, 2, 2]).unwrap();
        grid.accumulate_occupied(&table).unwrap();

        assert_eq!(grid.total(), 2);
        assert_eq!(grid.get([1, 1, 1]), 1);
    }

    #[test]
    fn test_reset_and_reduce() {
        let mut grid = WorkloadGrid::new([2, 1, 3]).unwrap();
        grid.accumulate_particles(&[4.0, 0.0, 9.0], 1.0).unwrap();

        let global = grid.reduce_global(&SerialGroup).unwrap();
        assert_eq!(global, vec![0, 0, 0, 0, 0, 1]);

        grid.reset();
        assert_eq!(grid.total(), 0);
    }
}
