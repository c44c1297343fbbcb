//! Morton encoded tile keys and sets of occupied tiles.

use itertools::Itertools;

use crate::constants::MAX_TILE_INDEX;

/// A sparse set of occupied tiles, as kept by the sparse grid layer.
///
/// The set is viewed as a table of `capacity()` slots. Slots may be empty, in
/// which case [OccupiedTiles::key_at] returns `None`.
pub trait OccupiedTiles: Sync {
    /// Key type stored in the set.
    type Key: Copy + Send;

    /// Number of slots in the set.
    fn capacity(&self) -> usize;

    /// The key stored at `slot`, if the slot is valid.
    fn key_at(&self, slot: usize) -> Option<Self::Key>;

    /// Decode a key into tile coordinates.
    fn key_to_tile(&self, key: Self::Key) -> [usize; 3];
}

// Spread the lower 21 bits of `v` so that two zero bits follow each bit.
fn spread_bits(v: u64) -> u64 {
    let mut x = v & 0x1f_ffff;
    x = (x | (x << 32)) & 0x001f_0000_0000_ffff;
    x = (x | (x << 16)) & 0x001f_0000_ff00_00ff;
    x = (x | (x << 8)) & 0x100f_00f0_0f00_f00f;
    x = (x | (x << 4)) & 0x10c3_0c30_c30c_30c3;
    x = (x | (x << 2)) & 0x1249_2492_4924_9249;
    x
}

// Inverse of `spread_bits`.
fn compact_bits(v: u64) -> u64 {
    let mut x = v & 0x1249_2492_4924_9249;
    x = (x ^ (x >> 2)) & 0x10c3_0c30_c30c_30c3;
    x = (x ^ (x >> 4)) & 0x100f_00f0_0f00_f00f;
    x = (x ^ (x >> 8)) & 0x001f_0000_ff00_00ff;
    x = (x ^ (x >> 16)) & 0x001f_0000_0000_ffff;
    x = (x ^ (x >> 32)) & 0x1f_ffff;
    x
}

/// Encode tile coordinates into a Morton key.
///
/// The bits of the x-index are the most significant within each triple.
///
/// # Panics
/// If a coordinate exceeds [MAX_TILE_INDEX].
pub fn encode_tile_key(tile: [usize; 3]) -> u64 {
    assert!(tile.iter().all(|&t| t <= MAX_TILE_INDEX));

    (spread_bits(tile[0] as u64) << 2)
        | (spread_bits(tile[1] as u64) << 1)
        | spread_bits(tile[2] as u64)
}

/// Decode a Morton key into tile coordinates.
pub fn decode_tile_key(key: u64) -> [usize; 3] {
    [
        compact_bits(key >> 2) as usize,
        compact_bits(key >> 1) as usize,
        compact_bits(key) as usize,
    ]
}

/// A sorted set of Morton encoded tiles.
#[derive(Clone, Debug, Default)]
pub struct SparseTileSet {
    keys: Vec<u64>,
}

impl SparseTileSet {
    /// Create a set from tile coordinates. Duplicates are removed.
    pub fn from_tiles<I: IntoIterator<Item = [usize; 3]>>(tiles: I) -> Self {
        let keys = tiles
            .into_iter()
            .map(encode_tile_key)
            .sorted_unstable()
            .dedup()
            .collect_vec();

        Self { keys }
    }

    /// Number of occupied tiles.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True if no tile is occupied.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The sorted Morton keys.
    pub fn keys(&self) -> &[u64] {
        &self.keys
    }

    /// Check whether a tile is occupied.
    pub fn contains(&self, tile: [usize; 3]) -> bool {
        tile.iter().all(|&t| t <= MAX_TILE_INDEX)
            && self.keys.binary_search(&encode_tile_key(tile)).is_ok()
    }
}

impl OccupiedTiles for SparseTileSet {
    type Key = u64;

    fn capacity(&self) -> usize {
        self.keys.len()
    }

    fn key_at(&self, slot: usize) -> Option<u64> {
        self.keys.get(slot).copied()
    }

    fn key_to_tile(&self, key: u64) -> [usize; 3] {
        decode_tile_key(key)
    }
}

#[cfg(test)]
mod test {
    use itertools::Itertools;
    use rand::Rng;

    use super::{decode_tile_key, encode_tile_key, SparseTileSet};
    use crate::{constants::MAX_TILE_INDEX, tools::seeded_rng};

    #[test]
    fn test_encode_decode() {
        let mut rng = seeded_rng(0);

        for _ in 0..1000 {
            let tile = [
                rng.gen_range(0..=MAX_TILE_INDEX),
                rng.gen_range(0..=MAX_TILE_INDEX),
                rng.gen_range(0..=MAX_TILE_INDEX),
            ];
            assert_eq!(decode_tile_key(encode_tile_key(tile)), tile);
        }
    }

    #[test]
    fn test_interleaving() {
        assert_eq!(encode_tile_key([0, 0, 0]), 0);
        assert_eq!(encode_tile_key([1, 0, 0]), 0b100);
        assert_eq!(encode_tile_key([0, 1, 0]), 0b010);
        assert_eq!(encode_tile_key([0, 0, 1]), 0b001);
        assert_eq!(encode_tile_key([2, 0, 0]), 0b100_000);
        assert_eq!(
            encode_tile_key([MAX_TILE_INDEX, MAX_TILE_INDEX, MAX_TILE_INDEX]),
            (1 << 63) - 1
        );
    }

    #[test]
    fn test_sparse_tile_set() {
        let set = SparseTileSet::from_tiles([[1, 2, 3], [0, 0, 0], [1, 2, 3], [4, 0, 1]]);
        assert_eq!(set.len(), 3);
        assert!(set.keys().iter().tuple_windows().all(|(a, b)| a < b));
        assert!(set.contains([4, 0, 1]));
        assert!(!set.contains([4, 1, 0]));
        assert!(!set.contains([MAX_TILE_INDEX + 1, 0, 0]));
    }
}
