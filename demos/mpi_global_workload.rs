//! Test the global reduction of workload grids across MPI ranks.

use mpi::traits::{Communicator, CommunicatorCollectives};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sparse_dim_balance::{
    collective::{CollectiveGroup, MpiGroup},
    morton::SparseTileSet,
    tools::{generate_random_positions, generate_random_tiles},
    workload::WorkloadGrid,
};

pub fn main() {
    // Initialise MPI
    let universe = mpi::initialize().unwrap();

    // Get the world communicator
    let comm = universe.world();
    let group = MpiGroup::new(&comm);

    // Initialise a seeded Rng.
    let mut rng = ChaCha8Rng::seed_from_u64(comm.rank() as u64);

    let tiles_per_dim = [8, 6, 4];
    let grid = WorkloadGrid::new(tiles_per_dim).unwrap();

    // Particles with unit cells and occupied tiles on every rank.
    let npoints = 1000;
    let positions = generate_random_positions(npoints, [32.0, 24.0, 16.0], &mut rng);
    grid.accumulate_particles(&positions, 1.0).unwrap();

    let tiles = SparseTileSet::from_tiles(generate_random_tiles(50, tiles_per_dim, &mut rng));
    grid.accumulate_occupied(&tiles).unwrap();

    // Reduce and compare the total with a plain reduction of the local totals.
    let global = grid.reduce_global(&group).unwrap();

    let local_total = grid.total();
    let mut expected = 0_u64;
    comm.all_reduce_into(
        &local_total,
        &mut expected,
        mpi::collective::SystemOperation::sum(),
    );

    assert_eq!(global.iter().sum::<u64>(), expected);
    assert_eq!(group.global_sum(local_total).unwrap(), expected);

    if comm.rank() == 0 {
        println!(
            "Reduced {} tiles with total workload {} over {} ranks.",
            global.len(),
            expected,
            comm.size()
        );
    }
}
