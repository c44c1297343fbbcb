//! Errors raised while building or rebalancing a partition.

use thiserror::Error;

/// Errors of the partitioning core.
///
/// Every variant is fatal for the operation that raised it. Nothing here is
/// retried: a rebalance is deterministic in its inputs, so a retry without a
/// new workload snapshot reproduces the same failure.
#[derive(Debug, Error)]
pub enum BalanceError {
    /// The requested rank factorization does not match the group size.
    #[error("ranks per dimension {requested:?} do not multiply to the group size {expected}")]
    RankCountMismatch {
        /// Number of members in the communication group.
        expected: usize,
        /// Factorization supplied by the caller.
        requested: [usize; 3],
    },
    /// A rank factorization with a zero entry.
    #[error("ranks per dimension {0:?} must all be positive")]
    InvalidRankCount([usize; 3]),
    /// A boundary sequence of the wrong length.
    #[error("boundary sequence for axis {axis} has length {found}, expected {expected}")]
    BoundaryLength {
        /// Axis of the offending sequence.
        axis: usize,
        /// Required length (ranks on the axis plus one).
        expected: usize,
        /// Supplied length.
        found: usize,
    },
    /// A boundary sequence that decreases somewhere.
    #[error("boundary sequence for axis {axis} decreases at index {index}")]
    BoundaryNotMonotonic {
        /// Axis of the offending sequence.
        axis: usize,
        /// Index of the first boundary smaller than its predecessor.
        index: usize,
    },
    /// A boundary sequence that does not span the whole axis.
    #[error("boundary sequence for axis {axis} spans [{first}, {last}], expected [0, {extent}]")]
    BoundaryEndpoints {
        /// Axis of the offending sequence.
        axis: usize,
        /// First supplied boundary.
        first: usize,
        /// Last supplied boundary.
        last: usize,
        /// Tile extent of the axis.
        extent: usize,
    },
    /// Global cell counts must be positive multiples of the tile size.
    #[error("axis {axis} has {cells} cells, which is not a positive multiple of the tile size")]
    CellsNotTileAligned {
        /// Offending axis.
        axis: usize,
        /// Supplied cell count.
        cells: usize,
    },
    /// Particle positions are passed as flat xyz triples.
    #[error("position buffer of length {0} is not a multiple of 3")]
    MalformedPositions(usize),
    /// A particle maps to a tile outside of the global grid.
    #[error("particle {index} maps to tile {tile:?} outside of the grid")]
    ParticleOutsideGrid {
        /// Index of the particle.
        index: usize,
        /// Tile the particle maps to.
        tile: [i64; 3],
    },
    /// An occupied tile outside of the global grid.
    #[error("occupied tile {tile:?} lies outside of the grid")]
    TileOutsideGrid {
        /// Decoded tile coordinate.
        tile: [usize; 3],
    },
    /// Local and global reduction buffers differ in length.
    #[error("reduction buffers differ in length (local {local}, global {global})")]
    ReductionLength {
        /// Length of the local contribution.
        local: usize,
        /// Length of the receive buffer.
        global: usize,
    },
    /// The communication layer failed during a collective.
    #[error("collective operation failed: {0}")]
    CollectiveFailure(String),
    /// The workload grid could not be allocated.
    #[error("could not allocate a workload grid of {tiles} tiles")]
    Allocation {
        /// Number of tiles requested.
        tiles: usize,
    },
    /// A query that needs the global prefix sum was made before it was built.
    #[error("the global prefix sum has not been built")]
    NotBuilt,
    /// Writing a VTK file failed.
    #[error("VTK export failed: {0}")]
    Vtk(String),
}
