//! Collective communication used by the partitioner.
//!
//! The partitioner only ever needs a handful of collectives: the group size,
//! the own rank, and integer sum/max reductions whose result is replicated on
//! every member. [CollectiveGroup] captures exactly that, so that the same code
//! runs on an MPI communicator, on a single process, or on a set of threads
//! that stand in for ranks.

use std::sync::{Arc, Barrier, Mutex};

use mpi::{collective::SystemOperation, traits::CommunicatorCollectives};

use crate::error::BalanceError;

/// A group of ranks that can take part in blocking all-reduce collectives.
///
/// Every member must call the collectives in the same order. All calls block
/// until every member has contributed.
pub trait CollectiveGroup {
    /// Number of members in the group.
    fn size(&self) -> usize;

    /// Rank of the calling member.
    fn rank(&self) -> usize;

    /// Element-wise sum of `local` across all members, written to `global`.
    fn all_reduce_sum(&self, local: &[u64], global: &mut [u64]) -> Result<(), BalanceError>;

    /// Maximum of `local` across all members.
    fn all_reduce_max(&self, local: u64) -> Result<u64, BalanceError>;

    /// Sum of a scalar across all members.
    fn global_sum(&self, local: u64) -> Result<u64, BalanceError> {
        let mut global = [0_u64];
        self.all_reduce_sum(&[local], &mut global)?;
        Ok(global[0])
    }
}

fn check_lengths(local: &[u64], global: &[u64]) -> Result<(), BalanceError> {
    if local.len() != global.len() {
        return Err(BalanceError::ReductionLength {
            local: local.len(),
            global: global.len(),
        });
    }
    Ok(())
}

/// A [CollectiveGroup] backed by an MPI communicator.
///
/// Errors inside MPI use the communicator's error handler, which aborts the
/// whole job by default. This matches the requirement that a failed
/// reduction is fatal for every rank.
pub struct MpiGroup<'c, C> {
    comm: &'c C,
}

impl<'c, C: CommunicatorCollectives> MpiGroup<'c, C> {
    /// Wrap a communicator.
    pub fn new(comm: &'c C) -> Self {
        Self { comm }
    }

    /// Return the wrapped communicator.
    pub fn comm(&self) -> &C {
        self.comm
    }
}

impl<C: CommunicatorCollectives> CollectiveGroup for MpiGroup<'_, C> {
    fn size(&self) -> usize {
        self.comm.size() as usize
    }

    fn rank(&self) -> usize {
        self.comm.rank() as usize
    }

    fn all_reduce_sum(&self, local: &[u64], global: &mut [u64]) -> Result<(), BalanceError> {
        check_lengths(local, global)?;
        self.comm.all_reduce_into(local, global, SystemOperation::sum());
        Ok(())
    }

    fn all_reduce_max(&self, local: u64) -> Result<u64, BalanceError> {
        let mut global = 0_u64;
        self.comm.all_reduce_into(&local, &mut global, SystemOperation::max());
        Ok(global)
    }
}

/// A group with a single member. Reductions are copies.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialGroup;

impl CollectiveGroup for SerialGroup {
    fn size(&self) -> usize {
        1
    }

    fn rank(&self) -> usize {
        0
    }

    fn all_reduce_sum(&self, local: &[u64], global: &mut [u64]) -> Result<(), BalanceError> {
        check_lengths(local, global)?;
        global.copy_from_slice(local);
        Ok(())
    }

    fn all_reduce_max(&self, local: u64) -> Result<u64, BalanceError> {
        Ok(local)
    }
}

#[derive(Default)]
struct Accumulator {
    sum: Vec<u64>,
    max: u64,
    contributions: usize,
    mismatch: bool,
}

struct SharedState {
    size: usize,
    barrier: Barrier,
    accumulator: Mutex<Accumulator>,
}

/// Members of an in-process group, one per thread.
///
/// Each member is handed to its own thread. Collectives synchronise the
/// threads with a barrier, so every member has to call every collective.
#[derive(Clone)]
pub struct ThreadGroup {
    rank: usize,
    shared: Arc<SharedState>,
}

impl ThreadGroup {
    /// Create the members of a group of `size` threads.
    pub fn create(size: usize) -> Vec<ThreadGroup> {
        let shared = Arc::new(SharedState {
            size,
            barrier: Barrier::new(size),
            accumulator: Mutex::new(Accumulator::default()),
        });

        (0..size)
            .map(|rank| ThreadGroup {
                rank,
                shared: shared.clone(),
            })
            .collect()
    }

    /// Run one collective round.
    ///
    /// `contribute` adds the local value into the accumulator, `read` extracts
    /// the combined result once all members have contributed. The leader of
    /// the last barrier clears the accumulator for the next round.
    fn round<T>(
        &self,
        contribute: impl FnOnce(&mut Accumulator),
        read: impl FnOnce(&Accumulator) -> T,
    ) -> Result<T, BalanceError> {
        let poisoned =
            || BalanceError::CollectiveFailure("thread group state poisoned".to_string());

        let contributed = self.shared.accumulator.lock().map(|mut acc| {
            contribute(&mut acc);
            acc.contributions += 1;
        });

        self.shared.barrier.wait();

        let result = self.shared.accumulator.lock().map(|acc| {
            debug_assert_eq!(acc.contributions, self.shared.size);
            (acc.mismatch, read(&acc))
        });

        if self.shared.barrier.wait().is_leader() {
            if let Ok(mut acc) = self.shared.accumulator.lock() {
                *acc = Accumulator::default();
            }
        }

        self.shared.barrier.wait();

        contributed.map_err(|_| poisoned())?;
        let (mismatch, value) = result.map_err(|_| poisoned())?;

        if mismatch {
            return Err(BalanceError::CollectiveFailure(
                "members contributed buffers of different lengths".to_string(),
            ));
        }

        Ok(value)
    }
}

impl CollectiveGroup for ThreadGroup {
    fn size(&self) -> usize {
        self.shared.size
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn all_reduce_sum(&self, local: &[u64], global: &mut [u64]) -> Result<(), BalanceError> {
        let lengths = check_lengths(local, global);

        self.round(
            |acc| {
                if acc.contributions == 0 {
                    acc.sum = vec![0; local.len()];
                }
                if acc.sum.len() != local.len() || lengths.is_err() {
                    acc.mismatch = true;
                    return;
                }
                for (a, l) in acc.sum.iter_mut().zip(local) {
                    *a += l;
                }
            },
            |acc| {
                if acc.sum.len() == global.len() {
                    global.copy_from_slice(&acc.sum);
                }
            },
        )?;

        lengths
    }

    fn all_reduce_max(&self, local: u64) -> Result<u64, BalanceError> {
        self.round(|acc| acc.max = acc.max.max(local), |acc| acc.max)
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::{CollectiveGroup, SerialGroup, ThreadGroup};

    #[test]
    fn test_serial_group_copies() {
        let mut global = [0_u64; 3];
        SerialGroup.all_reduce_sum(&[1, 2, 3], &mut global).unwrap();
        assert_eq!(global, [1, 2, 3]);
        assert_eq!(SerialGroup.all_reduce_max(7).unwrap(), 7);
        assert!(SerialGroup.all_reduce_sum(&[1, 2], &mut global).is_err());
    }

    #[test]
    fn test_thread_group_reductions() {
        let members = ThreadGroup::create(4);

        let results = thread::scope(|s| {
            let handles = members
                .iter()
                .map(|member| {
                    s.spawn(move || {
                        let rank = member.rank() as u64;
                        let mut first = [0_u64; 2];
                        member.all_reduce_sum(&[rank, 1], &mut first).unwrap();

                        // A second round must start from a clean accumulator.
                        let mut second = [0_u64; 2];
                        member.all_reduce_sum(&[1, rank], &mut second).unwrap();

                        let max = member.all_reduce_max(10 * rank).unwrap();
                        (first, second, max)
                    })
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });

        for (first, second, max) in results {
            assert_eq!(first, [6, 4]);
            assert_eq!(second, [4, 6]);
            assert_eq!(max, 30);
        }
    }
}
