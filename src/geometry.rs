//! Axis aligned boxes in tile space.

use crate::constants::CELL_BITS_PER_TILE_DIM;

/// A half-open box `[lower, upper)` of tiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileBox {
    lower: [usize; 3],
    upper: [usize; 3],
}

impl TileBox {
    /// Create a new box.
    ///
    /// An upper bound below its lower bound is clamped so that the box is empty
    /// along that axis.
    pub fn new(lower: [usize; 3], upper: [usize; 3]) -> Self {
        Self {
            lower,
            upper: [
                upper[0].max(lower[0]),
                upper[1].max(lower[1]),
                upper[2].max(lower[2]),
            ],
        }
    }

    /// The box containing a single tile.
    pub fn single(tile: [usize; 3]) -> Self {
        Self::new(tile, tile.map(|t| t + 1))
    }

    /// Lower (inclusive) corner.
    pub fn lower(&self) -> [usize; 3] {
        self.lower
    }

    /// Upper (exclusive) corner.
    pub fn upper(&self) -> [usize; 3] {
        self.upper
    }

    /// Number of tiles along each axis.
    pub fn extent(&self) -> [usize; 3] {
        [
            self.upper[0] - self.lower[0],
            self.upper[1] - self.lower[1],
            self.upper[2] - self.lower[2],
        ]
    }

    /// Number of tiles in the box.
    pub fn volume(&self) -> usize {
        self.extent().iter().product()
    }

    /// True if the box contains no tile.
    pub fn is_empty(&self) -> bool {
        self.volume() == 0
    }

    /// Check if a tile lies in the box.
    pub fn contains(&self, tile: [usize; 3]) -> bool {
        (0..3).all(|d| self.lower[d] <= tile[d] && tile[d] < self.upper[d])
    }

    /// The same region as a half-open box of cells.
    pub fn to_cells(&self) -> ([usize; 3], [usize; 3]) {
        (
            self.lower.map(|t| t << CELL_BITS_PER_TILE_DIM),
            self.upper.map(|t| t << CELL_BITS_PER_TILE_DIM),
        )
    }
}

impl std::fmt::Display for TileBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [x0, y0, z0] = self.lower;
        let [x1, y1, z1] = self.upper;

        write!(f, "[{x0}, {x1}) x [{y0}, {y1}) x [{z0}, {z1})")
    }
}

#[cfg(test)]
mod test {
    use super::TileBox;

    #[test]
    fn test_tile_box() {
        let b = TileBox::new([1, 0, 2], [3, 1, 5]);
        assert_eq!(b.extent(), [2, 1, 3]);
        assert_eq!(b.volume(), 6);
        assert!(b.contains([2, 0, 4]));
        assert!(!b.contains([3, 0, 4]));
        assert_eq!(b.to_cells(), ([4, 0, 8], [12, 4, 20]));
        assert_eq!(format!("{}", b), "[1, 3) x [0, 1) x [2, 5)");

        let empty = TileBox::new([2, 2, 2], [1, 3, 3]);
        assert!(empty.is_empty());
        assert_eq!(empty.upper(), [2, 3, 3]);

        assert_eq!(TileBox::single([1, 1, 1]).volume(), 1);
    }
}
