//! Partition a clustered workload on a single process and export it to VTK.
//!
//! The partitioner façade needs one group member per rank, so this demo drives
//! the building blocks directly for a 4 x 2 x 2 rank grid.

use std::time::Instant;

use sparse_dim_balance::{
    collective::SerialGroup,
    config::cells_to_tiles,
    optimizer::optimize,
    partition::RectPartition,
    prefix_sum::PrefixSumTable,
    rank_grid::RankGrid,
    tools::{generate_clustered_positions, generate_random_positions, seeded_rng},
    vtk::{export_partition_to_vtk, export_workload_to_vtk},
    workload::WorkloadGrid,
};

pub fn main() {
    let mut rng = seeded_rng(0);
    let extent = [128.0, 64.0, 64.0];
    let ranks = [4, 2, 2];

    let mut positions = generate_random_positions(50_000, extent, &mut rng);
    positions.extend(generate_clustered_positions(
        200_000,
        [32.0, 40.0, 20.0],
        16.0,
        extent,
        &mut rng,
    ));

    let tiles = cells_to_tiles([128, 64, 64]).unwrap();
    let workload = WorkloadGrid::new(tiles).unwrap();
    workload.accumulate_particles(&positions, 1.0).unwrap();
    let table = PrefixSumTable::build(workload.reduce_global(&SerialGroup).unwrap(), tiles);

    let rank_grid = RankGrid::new(ranks).unwrap();
    let mut partition = RectPartition::uniform(ranks, tiles);
    println!(
        "Imbalance of the uniform partition: {}",
        imbalance(&rank_workloads(&table, &rank_grid, &partition))
    );

    let start = Instant::now();
    let [x, y, z] = optimize(&table, ranks);
    partition.initialize(&x, &y, &z).unwrap();
    let duration = start.elapsed();
    println!("Optimized partition in {} us", duration.as_micros());

    let workloads = rank_workloads(&table, &rank_grid, &partition);
    println!("Imbalance after optimization: {}", imbalance(&workloads));

    export_partition_to_vtk(&partition, Some(workloads.as_slice()), "partition.vtk").unwrap();
    export_workload_to_vtk(&table.values(), tiles, "workload.vtk").unwrap();
}

// Workload of every rank, in linear rank order.
fn rank_workloads(table: &PrefixSumTable, grid: &RankGrid, partition: &RectPartition) -> Vec<u64> {
    (0..grid.nranks())
        .map(|rank| table.box_sum(&partition.owned_box(grid.cartesian_coords(rank))))
        .collect()
}

fn imbalance(workloads: &[u64]) -> u64 {
    let max = workloads.iter().copied().max().unwrap_or(0);
    let mean = workloads.iter().sum::<u64>() / workloads.len() as u64;
    max - mean
}
