//! Greedy optimization of rectilinear boundaries.
//!
//! Each axis is optimized on its own, in the order x, y, z. For an axis with
//! `R` ranks the workload of every pencil along that axis is split into `R`
//! equal shares, and the shares are summed over the cross-section to give the
//! target workload of one slab. The internal boundaries are then placed left
//! to right: a boundary is pushed forward one tile at a time for as long as the
//! share of the slab behind it, measured the same way, gets closer to the
//! target.
//!
//! All arithmetic is on unsigned integers and all reductions are exact sums,
//! so every rank derives the same boundaries from the same global workload.

use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::{
    constants::NDIM,
    prefix_sum::{AxisRange, PrefixSumTable},
};

/// Axes crossing `axis`, in cyclic order.
fn cross_axes(axis: usize) -> (usize, usize) {
    ((axis + 1) % NDIM, (axis + 2) % NDIM)
}

// Sum over all tile pencils along `axis` of the pencil's workload within
// `span`, each divided by `nranks` before summing.
fn pencil_shares(table: &PrefixSumTable, axis: usize, span: AxisRange, nranks: usize) -> u64 {
    let tiles = table.tiles_per_dim();
    let (p, q) = cross_axes(axis);
    let nranks = nranks as u64;

    (0..tiles[p] * tiles[q])
        .into_par_iter()
        .map(|pencil| {
            let mut ranges = [span; 3];
            let (tp, tq) = (pencil / tiles[q], pencil % tiles[q]);
            ranges[p] = AxisRange::Span(tp, tp + 1);
            ranges[q] = AxisRange::Span(tq, tq + 1);
            table.range_sum(ranges) / nranks
        })
        .sum()
}

/// Target workload of one slab along `axis` when it is split over `nranks` ranks.
///
/// Every pencil `(p, q)` contributes its own workload divided by `nranks`,
/// rounded down.
pub fn slab_target(table: &PrefixSumTable, axis: usize, nranks: usize) -> u64 {
    pencil_shares(table, axis, AxisRange::Full, nranks)
}

/// Share of the slab `[start, end)` along `axis`, measured like [slab_target].
///
/// Each pencil's workload inside the slab is divided by `nranks`, rounded
/// down, before the pencils are summed.
pub fn slab_share(
    table: &PrefixSumTable,
    axis: usize,
    start: usize,
    end: usize,
    nranks: usize,
) -> u64 {
    pencil_shares(table, axis, AxisRange::Span(start, end), nranks)
}

/// Compute the boundary sequence for one axis.
///
/// The returned sequence has `nranks + 1` entries, starts at zero, ends at the
/// tile extent of the axis and never decreases. Each boundary search resumes
/// from the previous boundary, so the sweep moves forward through the axis and
/// never revisits a committed position.
pub fn optimize_axis(table: &PrefixSumTable, axis: usize, nranks: usize) -> Vec<usize> {
    let extent = table.tiles_per_dim()[axis];
    let target = slab_target(table, axis, nranks);

    let mut boundaries = Vec::with_capacity(nranks + 1);
    boundaries.push(0);

    let mut previous = 0;
    for _ in 1..nranks {
        let mut last_diff = u64::MAX;
        let mut candidate = previous + 1;

        // A tie counts as no improvement and ends the search.
        while candidate <= extent {
            let diff = slab_share(table, axis, previous, candidate, nranks).abs_diff(target);
            if diff < last_diff {
                last_diff = diff;
                candidate += 1;
            } else {
                break;
            }
        }

        previous = candidate - 1;
        boundaries.push(previous);
    }

    if nranks > 0 {
        boundaries.push(extent);
    }

    log::debug!(
        "axis {}: slab target {}, boundaries {:?}",
        axis,
        target,
        boundaries
    );

    boundaries
}

/// Compute boundary sequences for all three axes.
pub fn optimize(table: &PrefixSumTable, ranks_per_dim: [usize; 3]) -> [Vec<usize>; 3] {
    std::array::from_fn(|axis| optimize_axis(table, axis, ranks_per_dim[axis]))
}
