use std::collections::{HashMap, HashSet};
use std::hash::{BuildHasherDefault, Hasher};

/// A hash map keyed by node IDs, which uses the ID directly as the hash.
///
/// Node IDs are allocated sequentially, so they are already well-distributed
/// hash values.
pub type NoopHashMap<K, V> = HashMap<K, V, BuildHasherDefault<NoopHasher>>;

/// Set counterpart of [`NoopHashMap`].
pub type NoopHashSet<K> = HashSet<K, BuildHasherDefault<NoopHasher>>;

#[derive(Default)]
pub struct NoopHasher {
    hash: u64,
}

impl Hasher for NoopHasher {
    fn finish(&self) -> u64 {
        self.hash
    }

    /// Fold bytes into the hash, little-endian. Keys other than a single
    /// integer are combined with a multiplicative mix so that composite
    /// keys do not collapse onto their last field.
    fn write(&mut self, bytes: &[u8]) {
        let mut word = 0u64;
        for (i, b) in bytes.iter().take(8).enumerate() {
            word |= (*b as u64) << (i * 8);
        }
        self.mix(word);
    }

    // `NodeId` hashes as a single `u32` (its `NonZero` representation).
    fn write_u32(&mut self, i: u32) {
        self.mix(i as u64);
    }
}

impl NoopHasher {
    fn mix(&mut self, word: u64) {
        self.hash = if self.hash == 0 {
            word
        } else {
            self.hash.wrapping_mul(0x100000001b3) ^ word
        };
    }
}
