//! Crate wide constants.

/// Number of spatial dimensions.
pub const NDIM: usize = 3;

/// Bit shift between cell and tile coordinates.
///
/// A tile spans `1 << CELL_BITS_PER_TILE_DIM` cells along every axis.
pub const CELL_BITS_PER_TILE_DIM: usize = 2;

/// Number of cells along one axis of a tile.
pub const CELLS_PER_TILE_DIM: usize = 1 << CELL_BITS_PER_TILE_DIM;

/// Bits reserved per axis in a Morton encoded tile key.
pub const TILE_KEY_BITS: usize = 21;

/// Largest tile index along one axis that can be Morton encoded.
pub const MAX_TILE_INDEX: usize = (1 << TILE_KEY_BITS) - 1;
