//! Read-only replicas of small host-side arrays.
//!
//! Parallel kernels never read the owning data structure directly. The owner
//! keeps the source of truth and pushes an explicit copy into a
//! [KernelMirror] whenever it changes. The replica is immutable and cheap to
//! share across worker threads.

use std::sync::Arc;

/// A read-only replica of a host array, synchronised on demand.
#[derive(Clone, Debug)]
pub struct KernelMirror<T> {
    data: Arc<[T]>,
}

impl<T: Copy> KernelMirror<T> {
    /// Create a mirror holding a copy of `source`.
    pub fn from_slice(source: &[T]) -> Self {
        Self {
            data: Arc::from(source),
        }
    }

    /// Replace the replica with a fresh copy of `source`.
    ///
    /// Clones of the old replica that are still held by running kernels keep
    /// seeing the old data.
    pub fn sync_from(&mut self, source: &[T]) {
        self.data = Arc::from(source);
    }

    /// Return the replicated data.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Number of replicated elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the replica holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::KernelMirror;

    #[test]
    fn test_sync_replaces_data() {
        let mut source = vec![1, 2, 3];
        let mut mirror = KernelMirror::from_slice(&source);
        let stale = mirror.clone();

        source[1] = 5;
        // The mirror only changes on an explicit sync.
        assert_eq!(mirror.as_slice(), &[1, 2, 3]);

        mirror.sync_from(&source);
        assert_eq!(mirror.as_slice(), &[1, 5, 3]);
        assert_eq!(stale.as_slice(), &[1, 2, 3]);
    }
}
