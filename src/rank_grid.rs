//! Cartesian arrangement of ranks.

use itertools::iproduct;
use num::integer::Roots;

use crate::{
    collective::CollectiveGroup, constants::NDIM, error::BalanceError, mirror::KernelMirror,
};

/// Factorize `n` into three factors that are as close to each other as possible.
///
/// The largest factor is minimized first, then the spread between largest and
/// smallest factor. The result is sorted in non-increasing order, the same
/// convention as `MPI_Dims_create`.
///
/// For `n = 12` this returns `[3, 2, 2]`, for `n = 7` it returns `[7, 1, 1]`.
pub fn balanced_dims(n: usize) -> [usize; 3] {
    let n = n.max(1);
    let mut best = [n, 1, 1];

    // Enumerate c <= b <= a with a * b * c = n.
    for c in (1..=n.cbrt()).filter(|c| n % c == 0) {
        let m = n / c;
        for b in (c..=m.sqrt()).filter(|b| m % b == 0) {
            let a = m / b;
            if (a, a - c) < (best[0], best[0] - best[2]) {
                best = [a, b, c];
            }
        }
    }

    best
}

/// The Cartesian grid of ranks a domain is split over.
///
/// Linear ranks map to Cartesian coordinates in row-major order with the last
/// axis running fastest, as in `MPI_Cart_coords`.
#[derive(Clone, Debug)]
pub struct RankGrid {
    dims: [usize; 3],
    mirror: KernelMirror<usize>,
}

impl RankGrid {
    /// Create a rank grid from an explicit factorization.
    pub fn new(dims: [usize; 3]) -> Result<Self, BalanceError> {
        if dims.iter().any(|&d| d == 0) {
            return Err(BalanceError::InvalidRankCount(dims));
        }

        Ok(Self {
            dims,
            mirror: KernelMirror::from_slice(&dims),
        })
    }

    /// Create a balanced rank grid for all members of `group`.
    pub fn from_group<G: CollectiveGroup>(group: &G) -> Self {
        let dims = balanced_dims(group.size());
        Self {
            dims,
            mirror: KernelMirror::from_slice(&dims),
        }
    }

    /// Create a rank grid from a caller supplied factorization.
    ///
    /// Fails if the factorization does not cover exactly the members of `group`.
    pub fn explicit<G: CollectiveGroup>(dims: [usize; 3], group: &G) -> Result<Self, BalanceError> {
        let grid = Self::new(dims)?;
        if grid.nranks() != group.size() {
            return Err(BalanceError::RankCountMismatch {
                expected: group.size(),
                requested: dims,
            });
        }
        Ok(grid)
    }

    /// Recompute the factorization from the size of `group` and refresh the mirror.
    pub fn refactor<G: CollectiveGroup>(&mut self, group: &G) -> [usize; 3] {
        self.dims = balanced_dims(group.size());
        self.mirror.sync_from(&self.dims);
        self.dims
    }

    /// Ranks along each axis.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Total number of ranks.
    pub fn nranks(&self) -> usize {
        self.dims.iter().product()
    }

    /// Kernel side replica of the factorization.
    pub fn mirror(&self) -> &KernelMirror<usize> {
        &self.mirror
    }

    /// Cartesian coordinates of a linear rank.
    pub fn cartesian_coords(&self, rank: usize) -> [usize; 3] {
        debug_assert!(rank < self.nranks());
        let [_, ny, nz] = self.dims;
        [rank / (ny * nz), (rank / nz) % ny, rank % nz]
    }

    /// Linear rank of Cartesian coordinates.
    pub fn linear_rank(&self, coords: [usize; 3]) -> usize {
        debug_assert!((0..NDIM).all(|d| coords[d] < self.dims[d]));
        let [_, ny, nz] = self.dims;
        (coords[0] * ny + coords[1]) * nz + coords[2]
    }

    /// Iterate over all Cartesian coordinates in linear rank order.
    pub fn coords(&self) -> impl Iterator<Item = [usize; 3]> {
        let [nx, ny, nz] = self.dims;
        iproduct!(0..nx, 0..ny, 0..nz).map(|(i, j, k)| [i, j, k])
    }
}

#[cfg(test)]
mod test {
    use itertools::Itertools;

    use super::{balanced_dims, RankGrid};
    use crate::collective::SerialGroup;
    use crate::error::BalanceError;

    #[test]
    fn test_balanced_dims() {
        assert_eq!(balanced_dims(1), [1, 1, 1]);
        assert_eq!(balanced_dims(7), [7, 1, 1]);
        assert_eq!(balanced_dims(8), [2, 2, 2]);
        assert_eq!(balanced_dims(12), [3, 2, 2]);
        assert_eq!(balanced_dims(16), [4, 2, 2]);
        assert_eq!(balanced_dims(27), [3, 3, 3]);
        assert_eq!(balanced_dims(30), [5, 3, 2]);

        for n in 1..200 {
            let dims = balanced_dims(n);
            assert_eq!(dims.iter().product::<usize>(), n);
            assert!(dims[0] >= dims[1] && dims[1] >= dims[2]);
        }
    }

    #[test]
    fn test_explicit_mismatch() {
        let err = RankGrid::explicit([2, 1, 1], &SerialGroup).unwrap_err();
        assert!(matches!(err, BalanceError::RankCountMismatch { expected: 1, .. }));
        assert!(RankGrid::explicit([1, 1, 1], &SerialGroup).is_ok());
        assert!(matches!(
            RankGrid::new([2, 0, 1]),
            Err(BalanceError::InvalidRankCount(_))
        ));
    }

    #[test]
    fn test_coordinates_round_trip() {
        let grid = RankGrid::new([2, 3, 4]).unwrap();
        let coords = grid.coords().collect_vec();
        assert_eq!(coords.len(), 24);
        for (rank, &c) in coords.iter().enumerate() {
            assert_eq!(grid.cartesian_coords(rank), c);
            assert_eq!(grid.linear_rank(c), rank);
        }
        assert_eq!(grid.cartesian_coords(5), [0, 1, 1]);
        assert_eq!(grid.mirror().as_slice(), &[2, 3, 4]);
    }

    #[test]
    fn test_refactor_updates_mirror() {
        let mut grid = RankGrid::new([1, 1, 1]).unwrap();
        let dims = grid.refactor(&SerialGroup);
        assert_eq!(dims, [1, 1, 1]);
        assert_eq!(grid.mirror().as_slice(), &dims);
    }
}
