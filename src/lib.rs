//! Workload-driven rectilinear partitioning of sparse tile grids.
//!
//! A global grid of cells is grouped into tiles of 4 x 4 x 4 cells and split
//! over a Cartesian grid of ranks by one boundary sequence per axis. Every rank
//! counts its local workload per tile, the counts are summed across ranks, and
//! a greedy optimizer on a summed-volume table of the global workload moves the
//! boundaries so that every slab carries a fair share of the work.
//!
//! The entry point is [partitioner::SparseDimPartitioner].
#![cfg_attr(feature = "strict", deny(warnings), deny(unused_crate_dependencies))]
#![warn(missing_docs)]

pub mod collective;
pub mod config;
pub mod constants;
pub mod error;
pub mod geometry;
pub mod mirror;
pub mod morton;
pub mod optimizer;
pub mod partition;
pub mod partitioner;
pub mod policy;
pub mod prefix_sum;
pub mod rank_grid;
pub mod tools;
pub mod vtk;
pub mod workload;

pub use error::BalanceError;
pub use partitioner::SparseDimPartitioner;
