//! The sparse-dim partitioner.
//!
//! A [SparseDimPartitioner] owns everything needed to rebalance a tile grid
//! across a Cartesian grid of ranks. One rebalance cycle runs
//!
//! 1. [SparseDimPartitioner::accumulate_particles] or
//!    [SparseDimPartitioner::accumulate_occupied] on the local workload,
//! 2. [SparseDimPartitioner::build_global_prefix_sum], the only collective,
//! 3. [SparseDimPartitioner::optimize_partition], replicated on every rank.
//!
//! Afterwards the mesh layer reads the owned extents of each rank.
//! [SparseDimPartitioner::should_rebalance] decides whether a cycle runs at
//! all.

use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::{
    collective::CollectiveGroup,
    config::{cells_to_tiles, workload_threshold, PartitionerConfig},
    error::BalanceError,
    morton::OccupiedTiles,
    optimizer::optimize,
    partition::{PartitionSnapshot, RectPartition},
    policy::RebalancePolicy,
    prefix_sum::PrefixSumTable,
    rank_grid::RankGrid,
    workload::WorkloadGrid,
};

/// Workload driven rectilinear partitioner of a sparse tile grid.
pub struct SparseDimPartitioner {
    rank_grid: RankGrid,
    tiles_per_dim: [usize; 3],
    workload: WorkloadGrid,
    prefix_sum: Option<PrefixSumTable>,
    partition: RectPartition,
    policy: RebalancePolicy,
}

impl SparseDimPartitioner {
    /// Create a partitioner whose rank grid is a balanced factorization of `group`.
    ///
    /// # Arguments
    /// - `group`: The ranks sharing the domain.
    /// - `max_workload_coeff`: Imbalance threshold as a fraction of `particle_count_estimate`.
    /// - `particle_count_estimate`: Expected global number of particles.
    /// - `rebalance_interval`: Minimum number of steps between rebalances.
    /// - `global_cells_per_dim`: Global cells per axis, multiples of the tile size.
    pub fn new<G: CollectiveGroup>(
        group: &G,
        max_workload_coeff: f32,
        particle_count_estimate: usize,
        rebalance_interval: u64,
        global_cells_per_dim: [usize; 3],
    ) -> Result<Self, BalanceError> {
        Self::from_parts(
            RankGrid::from_group(group),
            workload_threshold(max_workload_coeff, particle_count_estimate),
            rebalance_interval,
            global_cells_per_dim,
        )
    }

    /// Create a partitioner with a caller supplied rank grid.
    ///
    /// The factorization is checked against the communication group when the
    /// first collective runs.
    pub fn with_ranks(
        max_workload_coeff: f32,
        particle_count_estimate: usize,
        rebalance_interval: u64,
        ranks_per_dim: [usize; 3],
        global_cells_per_dim: [usize; 3],
    ) -> Result<Self, BalanceError> {
        Self::from_parts(
            RankGrid::new(ranks_per_dim)?,
            workload_threshold(max_workload_coeff, particle_count_estimate),
            rebalance_interval,
            global_cells_per_dim,
        )
    }

    /// Create a partitioner from a configuration.
    ///
    /// Explicit ranks per dimension in the configuration are checked against
    /// the size of `group`.
    pub fn from_config<G: CollectiveGroup>(
        config: &PartitionerConfig,
        group: &G,
    ) -> Result<Self, BalanceError> {
        let rank_grid = match config.ranks_per_dim {
            Some(dims) => RankGrid::explicit(dims, group)?,
            None => RankGrid::from_group(group),
        };

        Self::from_parts(
            rank_grid,
            config.workload_threshold(),
            config.rebalance_interval,
            config.global_cells_per_dim,
        )
    }

    fn from_parts(
        rank_grid: RankGrid,
        threshold: u64,
        rebalance_interval: u64,
        global_cells_per_dim: [usize; 3],
    ) -> Result<Self, BalanceError> {
        let tiles_per_dim = cells_to_tiles(global_cells_per_dim)?;
        let workload = WorkloadGrid::new(tiles_per_dim)?;
        let partition = RectPartition::uniform(rank_grid.dims(), tiles_per_dim);

        log::info!(
            "partitioning {:?} tiles over {:?} ranks",
            tiles_per_dim,
            rank_grid.dims()
        );

        Ok(Self {
            rank_grid,
            tiles_per_dim,
            workload,
            prefix_sum: None,
            partition,
            policy: RebalancePolicy::new(threshold, rebalance_interval),
        })
    }

    /// Ranks along each axis.
    pub fn ranks_per_dimension(&self) -> [usize; 3] {
        self.rank_grid.dims()
    }

    /// Recompute the rank grid from the size of `group`.
    ///
    /// The partition is reset to a uniform one, as the old boundary sequences
    /// no longer fit the new factorization.
    pub fn refactor_ranks<G: CollectiveGroup>(&mut self, group: &G) -> [usize; 3] {
        let dims = self.rank_grid.refactor(group);
        self.partition = RectPartition::uniform(dims, self.tiles_per_dim);
        dims
    }

    /// The rank grid.
    pub fn rank_grid(&self) -> &RankGrid {
        &self.rank_grid
    }

    /// Global tiles along each axis.
    pub fn global_tiles_per_dimension(&self) -> [usize; 3] {
        self.tiles_per_dim
    }

    /// The current partition.
    pub fn partition(&self) -> &RectPartition {
        &self.partition
    }

    /// Tiles owned along each axis by the rank at `rank_coord`.
    ///
    /// # Panics
    ///
    /// Panics if `rank_coord` lies outside the rank grid.
    pub fn owned_tiles_per_dimension(&self, rank_coord: [usize; 3]) -> [usize; 3] {
        self.partition.owned_tiles(rank_coord)
    }

    /// Cells owned along each axis by the rank at `rank_coord`.
    ///
    /// # Panics
    ///
    /// Panics if `rank_coord` lies outside the rank grid.
    pub fn owned_cells_per_dimension(&self, rank_coord: [usize; 3]) -> [usize; 3] {
        self.partition.owned_cells(rank_coord)
    }

    /// Install explicit boundary sequences, e.g. when restarting.
    pub fn initialize_rect_partition(
        &mut self,
        x: &[usize],
        y: &[usize],
        z: &[usize],
    ) -> Result<(), BalanceError> {
        self.partition.initialize(x, y, z)?;
        log::info!("installed partition {:?}", self.partition.snapshot().boundaries);
        Ok(())
    }

    /// Install a persisted partition.
    pub fn restore(&mut self, snapshot: &PartitionSnapshot) -> Result<(), BalanceError> {
        self.partition.restore(snapshot)
    }

    /// The persisted form of the current partition.
    pub fn snapshot(&self) -> PartitionSnapshot {
        self.partition.snapshot()
    }

    /// Clear the local workload before a new cycle.
    pub fn reset_workload(&mut self) {
        self.workload.reset();
    }

    /// The local workload grid.
    pub fn workload(&self) -> &WorkloadGrid {
        &self.workload
    }

    /// Add local particles to the workload. See [WorkloadGrid::accumulate_particles].
    pub fn accumulate_particles(&self, positions: &[f64], dx: f64) -> Result<(), BalanceError> {
        self.workload.accumulate_particles(positions, dx)
    }

    /// Add local occupied tiles to the workload. See [WorkloadGrid::accumulate_occupied].
    pub fn accumulate_occupied<T: OccupiedTiles>(&self, tiles: &T) -> Result<(), BalanceError> {
        self.workload.accumulate_occupied(tiles)
    }

    /// Sum the workload over `group` and build the global prefix sum.
    ///
    /// Fails with [BalanceError::RankCountMismatch] before any reduction if the
    /// rank grid does not have one rank per member of `group`.
    ///
    /// The table is only built once the all-reduce has returned. If the
    /// reduction fails the previous table is discarded, so no stale table can
    /// be used for a later optimization.
    pub fn build_global_prefix_sum<G: CollectiveGroup>(
        &mut self,
        group: &G,
    ) -> Result<(), BalanceError> {
        self.check_group(group)?;
        self.prefix_sum = None;
        let global = self.workload.reduce_global(group)?;
        self.prefix_sum = Some(PrefixSumTable::build(global, self.tiles_per_dim));
        Ok(())
    }

    /// The global prefix sum of the last cycle.
    pub fn prefix_sum(&self) -> Option<&PrefixSumTable> {
        self.prefix_sum.as_ref()
    }

    /// Recompute the partition from the global prefix sum.
    ///
    /// The new boundaries are computed completely before they replace the old
    /// ones in a single step.
    pub fn optimize_partition(&mut self) -> Result<(), BalanceError> {
        let table = self.prefix_sum.as_ref().ok_or(BalanceError::NotBuilt)?;
        let boundaries = optimize(table, self.rank_grid.dims());
        self.partition.replace(boundaries)?;

        let empty = self.partition.empty_ranks();
        if empty > 0 {
            log::warn!(
                "{} of {} ranks own no tiles after optimization",
                empty,
                self.rank_grid.nranks()
            );
        }

        Ok(())
    }

    /// Run a full cycle: global prefix sum followed by optimization.
    pub fn rebalance<G: CollectiveGroup>(&mut self, group: &G) -> Result<(), BalanceError> {
        self.build_global_prefix_sum(group)?;
        self.optimize_partition()
    }

    /// Workload of every rank under the current partition, in linear rank order.
    pub fn rank_workloads(&self) -> Result<Vec<u64>, BalanceError> {
        let table = self.prefix_sum.as_ref().ok_or(BalanceError::NotBuilt)?;

        Ok((0..self.rank_grid.nranks())
            .into_par_iter()
            .map(|rank| {
                let coords = self.rank_grid.cartesian_coords(rank);
                table.box_sum(&self.partition.owned_box(coords))
            })
            .collect())
    }

    /// Maximum per-rank workload minus the mean, under the current partition.
    pub fn imbalance(&self) -> Result<u64, BalanceError> {
        let workloads = self.rank_workloads()?;
        Ok(imbalance_of(
            workloads.iter().copied().max().unwrap_or(0),
            workloads.iter().sum(),
            workloads.len(),
        ))
    }

    /// Feed the policy with a cheap per-rank workload signal.
    ///
    /// Every member passes its own workload, e.g. its particle count. The
    /// imbalance is derived from a sum and a max reduction and returned. The
    /// group has to match the rank grid as for [Self::build_global_prefix_sum].
    pub fn observe_local_workload<G: CollectiveGroup>(
        &mut self,
        local: u64,
        group: &G,
    ) -> Result<u64, BalanceError> {
        self.check_group(group)?;
        let max = group.all_reduce_max(local)?;
        let total = group.global_sum(local)?;
        let imbalance = imbalance_of(max, total, group.size());
        self.policy.observe(imbalance);
        Ok(imbalance)
    }

    // The rank grid must cover exactly the members taking part in a collective.
    fn check_group<G: CollectiveGroup>(&self, group: &G) -> Result<(), BalanceError> {
        if self.rank_grid.nranks() != group.size() {
            return Err(BalanceError::RankCountMismatch {
                expected: group.size(),
                requested: self.rank_grid.dims(),
            });
        }
        Ok(())
    }

    /// Decide whether to rebalance at `step`.
    pub fn should_rebalance(&mut self, step: u64) -> bool {
        self.policy.should_rebalance(step)
    }

    /// The rebalance policy.
    pub fn policy(&self) -> &RebalancePolicy {
        &self.policy
    }
}

fn imbalance_of(max: u64, total: u64, members: usize) -> u64 {
    let mean = total / (members.max(1) as u64);
    max.saturating_sub(mean)
}

#[cfg(test)]
mod test {
    use std::thread;

    use itertools::iproduct;

    use super::SparseDimPartitioner;
    use crate::{
        collective::{CollectiveGroup, SerialGroup, ThreadGroup},
        config::PartitionerConfig,
        error::BalanceError,
        morton::SparseTileSet,
        tools::{generate_random_positions, seeded_rng},
    };

    #[test]
    fn test_serial_partitioner() {
        let mut partitioner =
            SparseDimPartitioner::new(&SerialGroup, 0.1, 1000, 1, [16, 16, 16]).unwrap();
        assert_eq!(partitioner.ranks_per_dimension(), [1, 1, 1]);
        assert_eq!(partitioner.owned_tiles_per_dimension([0, 0, 0]), [4, 4, 4]);

        let mut rng = seeded_rng(0);
        let positions = generate_random_positions(1000, [16.0, 16.0, 16.0], &mut rng);
        partitioner.accumulate_particles(&positions, 1.0).unwrap();
        partitioner.rebalance(&SerialGroup).unwrap();

        assert_eq!(partitioner.prefix_sum().unwrap().total(), 1000);
        assert_eq!(partitioner.rank_workloads().unwrap(), vec![1000]);
        assert_eq!(partitioner.imbalance().unwrap(), 0);
    }

    // One rank of an 8-rank cycle where rank 0 sees all 64 occupied tiles,
    // starting from a skewed partition so that the optimizer has work to do.
    fn skewed_cycle(group: ThreadGroup) -> SparseDimPartitioner {
        let mut partitioner =
            SparseDimPartitioner::with_ranks(1.0, 64, 1, [2, 2, 2], [16, 16, 16]).unwrap();

        if group.rank() == 0 {
            let tiles =
                SparseTileSet::from_tiles(iproduct!(0..4, 0..4, 0..4).map(|(i, j, k)| [i, j, k]));
            partitioner.accumulate_occupied(&tiles).unwrap();
        }

        partitioner
            .initialize_rect_partition(&[0, 1, 4], &[0, 3, 4], &[0, 1, 4])
            .unwrap();
        partitioner.build_global_prefix_sum(&group).unwrap();
        assert!(partitioner.imbalance().unwrap() > 0);

        partitioner.optimize_partition().unwrap();
        partitioner
    }

    #[test]
    fn test_uniform_scenario_with_explicit_ranks() {
        let results = thread::scope(|s| {
            let handles = ThreadGroup::create(8)
                .into_iter()
                .map(|group| s.spawn(move || skewed_cycle(group)))
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });

        for partitioner in results {
            for axis in 0..3 {
                assert_eq!(partitioner.partition().boundaries(axis), &[0, 2, 4]);
            }
            for (i, j, k) in iproduct!(0..2, 0..2, 0..2) {
                assert_eq!(partitioner.owned_tiles_per_dimension([i, j, k]), [2, 2, 2]);
                assert_eq!(partitioner.owned_cells_per_dimension([i, j, k]), [8, 8, 8]);
            }
            assert_eq!(partitioner.rank_workloads().unwrap(), vec![8; 8]);
            assert_eq!(partitioner.imbalance().unwrap(), 0);
        }
    }

    #[test]
    fn test_group_must_match_rank_grid() {
        let mut partitioner =
            SparseDimPartitioner::with_ranks(1.0, 1, 1, [2, 2, 2], [16, 16, 16]).unwrap();
        partitioner
            .accumulate_particles(&[1.0, 1.0, 1.0], 1.0)
            .unwrap();

        assert!(matches!(
            partitioner.rebalance(&SerialGroup),
            Err(BalanceError::RankCountMismatch {
                expected: 1,
                requested: [2, 2, 2]
            })
        ));
        assert!(partitioner.prefix_sum().is_none());
        assert!(matches!(
            partitioner.observe_local_workload(10, &SerialGroup),
            Err(BalanceError::RankCountMismatch { expected: 1, .. })
        ));
        assert_eq!(partitioner.policy().observed_imbalance(), None);
        assert_eq!(partitioner.snapshot().boundaries[0], vec![0, 2, 4]);
    }

    #[test]
    fn test_optimize_requires_prefix_sum() {
        let mut partitioner =
            SparseDimPartitioner::with_ranks(1.0, 1, 1, [1, 1, 1], [4, 4, 4]).unwrap();
        assert!(matches!(partitioner.optimize_partition(), Err(BalanceError::NotBuilt)));
        assert!(matches!(partitioner.rank_workloads(), Err(BalanceError::NotBuilt)));
    }

    #[test]
    fn test_configuration_errors() {
        assert!(matches!(
            SparseDimPartitioner::with_ranks(1.0, 1, 1, [1, 1, 1], [4, 5, 4]),
            Err(BalanceError::CellsNotTileAligned { axis: 1, cells: 5 })
        ));

        let config = PartitionerConfig {
            ranks_per_dim: Some([2, 1, 1]),
            global_cells_per_dim: [8, 8, 8],
            ..Default::default()
        };
        assert!(matches!(
            SparseDimPartitioner::from_config(&config, &SerialGroup),
            Err(BalanceError::RankCountMismatch { expected: 1, .. })
        ));
    }

    #[test]
    fn test_failed_initialize_keeps_partition() {
        let mut partitioner =
            SparseDimPartitioner::with_ranks(1.0, 1, 1, [2, 1, 1], [16, 4, 4]).unwrap();
        let before = partitioner.snapshot();

        assert!(partitioner
            .initialize_rect_partition(&[0, 5, 4], &[0, 1], &[0, 1])
            .is_err());
        assert_eq!(partitioner.snapshot(), before);

        partitioner
            .initialize_rect_partition(&[0, 3, 4], &[0, 1], &[0, 1])
            .unwrap();
        assert_eq!(partitioner.owned_tiles_per_dimension([1, 0, 0]), [1, 1, 1]);
    }

    #[test]
    fn test_policy_integration() {
        let mut partitioner =
            SparseDimPartitioner::new(&SerialGroup, 0.5, 100, 2, [8, 8, 8]).unwrap();
        assert_eq!(partitioner.policy().threshold(), 50);

        assert!(partitioner.should_rebalance(0));
        assert!(!partitioner.should_rebalance(1));

        // A single member is always balanced.
        assert_eq!(partitioner.observe_local_workload(500, &SerialGroup).unwrap(), 0);
        assert!(!partitioner.should_rebalance(2));
    }

    #[test]
    fn test_refactor_resets_partition() {
        let mut partitioner =
            SparseDimPartitioner::with_ranks(1.0, 1, 1, [1, 1, 1], [16, 16, 16]).unwrap();
        partitioner
            .initialize_rect_partition(&[0, 4], &[0, 4], &[0, 4])
            .unwrap();
        assert_eq!(partitioner.refactor_ranks(&SerialGroup), [1, 1, 1]);
        assert_eq!(partitioner.snapshot().boundaries[0], vec![0, 4]);
    }
}
