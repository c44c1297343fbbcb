//! Rebalance a drifting particle cluster across MPI ranks.

use mpi::traits::Communicator;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sparse_dim_balance::{
    collective::MpiGroup,
    tools::{generate_clustered_positions, generate_random_positions},
    SparseDimPartitioner,
};

pub fn main() {
    // Initialise MPI
    let universe = mpi::initialize().unwrap();

    // Get the world communicator
    let comm = universe.world();
    let group = MpiGroup::new(&comm);

    // Initialise a seeded Rng.
    let mut rng = ChaCha8Rng::seed_from_u64(comm.rank() as u64);

    let cells = [64, 64, 64];
    let extent = [64.0, 64.0, 64.0];
    let nbackground = 2000;
    let ncluster = 8000;
    let nsteps = 20;

    let mut partitioner = SparseDimPartitioner::new(
        &group,
        0.1,
        (nbackground + ncluster) * comm.size() as usize,
        5,
        cells,
    )
    .unwrap();

    if comm.rank() == 0 {
        println!("Ranks per dimension: {:?}", partitioner.ranks_per_dimension());
    }

    let background = generate_random_positions(nbackground, extent, &mut rng);

    for step in 0..nsteps {
        // The cluster moves along the main diagonal.
        let centre = 8.0 + 2.4 * step as f64;
        let mut positions = background.clone();
        positions.extend(generate_clustered_positions(
            ncluster,
            [centre; 3],
            6.0,
            extent,
            &mut rng,
        ));

        partitioner.reset_workload();
        partitioner.accumulate_particles(&positions, 1.0).unwrap();

        // Cheap check with the workload of the rank this process owns.
        let coords = partitioner.rank_grid().cartesian_coords(comm.rank() as usize);
        let owned = partitioner.partition().owned_box(coords);
        let local = owned_particles(&positions, owned.to_cells());
        let imbalance = partitioner.observe_local_workload(local, &group).unwrap();

        if partitioner.should_rebalance(step) {
            partitioner.rebalance(&group).unwrap();

            if comm.rank() == 0 {
                println!(
                    "Step {}: imbalance {} before, {} after rebalancing, boundaries {:?}",
                    step,
                    imbalance,
                    partitioner.imbalance().unwrap(),
                    partitioner.snapshot().boundaries
                );
            }
        }
    }
}

// Number of local particles inside a box of cells.
fn owned_particles(positions: &[f64], (lower, upper): ([usize; 3], [usize; 3])) -> u64 {
    positions
        .chunks_exact(3)
        .filter(|p| (0..3).all(|d| lower[d] as f64 <= p[d] && p[d] < upper[d] as f64))
        .count() as u64
}
