//! Deterministic slicing of the record key space.
//!
//! Every record id hashes to a 32-bit partition key: the first four bytes of
//! its blake3 digest read big-endian. Slice `i` of `max` owns the half-open
//! key range `[floor(i * 2^32 / max), floor((i + 1) * 2^32 / max))`, so for a
//! given `max` the slices are pairwise disjoint and cover every key.

use semvec_core::{Error, Result};
use serde::{Deserialize, Serialize};

const KEY_SPACE: u64 = 1 << 32;

/// Partition key for a record id.
pub fn partition_key(id: &str) -> u32 {
    let digest = blake3::hash(id.as_bytes());
    let bytes = digest.as_bytes();
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// One slice out of `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SliceSpec {
    /// Zero-based slice index.
    pub id: u32,
    /// Total number of slices.
    pub max: u32,
}

impl SliceSpec {
    /// Create a slice, validating `id < max`.
    pub fn new(id: u32, max: u32) -> Result<Self> {
        if max == 0 {
            return Err(Error::validation("slice count must be at least 1"));
        }
        if id >= max {
            return Err(Error::validation(format!(
                "slice id {id} out of range for {max} slices"
            )));
        }
        Ok(Self { id, max })
    }

    /// All slices of a `max`-way split, in order.
    pub fn all(max: u32) -> Result<Vec<Self>> {
        (0..max.max(1)).map(|id| Self::new(id, max)).collect()
    }

    /// First partition key owned by this slice (inclusive).
    pub fn start(&self) -> u64 {
        u64::from(self.id) * KEY_SPACE / u64::from(self.max)
    }

    /// One past the last partition key owned by this slice (exclusive).
    pub fn end(&self) -> u64 {
        (u64::from(self.id) + 1) * KEY_SPACE / u64::from(self.max)
    }

    /// Whether the slice owns `key`.
    pub fn contains(&self, key: u32) -> bool {
        let key = u64::from(key);
        self.start() <= key && key < self.end()
    }

    /// Whether the slice owns the record `id`.
    pub fn owns(&self, id: &str) -> bool {
        self.contains(partition_key(id))
    }
}

impl std::fmt::Display for SliceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.id, self.max)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_partition_key_is_stable() {
        assert_eq!(partition_key("record-1"), partition_key("record-1"));
        assert_ne!(partition_key("record-1"), partition_key("record-2"));
    }

    #[test]
    fn test_slice_validation() {
        assert!(SliceSpec::new(0, 0).is_err());
        assert!(SliceSpec::new(4, 4).is_err());
        assert!(SliceSpec::new(3, 4).is_ok());
    }

    #[test]
    fn test_slice_bounds_cover_key_space() {
        let slices = SliceSpec::all(3).unwrap();
        assert_eq!(slices[0].start(), 0);
        assert_eq!(slices[2].end(), KEY_SPACE);
        for pair in slices.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start());
        }
    }

    #[test]
    fn test_single_slice_owns_extremes() {
        let only = SliceSpec::new(0, 1).unwrap();
        assert!(only.contains(0));
        assert!(only.contains(u32::MAX));
    }

    #[test]
    fn test_display() {
        assert_eq!(SliceSpec::new(1, 4).unwrap().to_string(), "1/4");
    }

    proptest! {
        #[test]
        fn prop_every_id_in_exactly_one_slice(
            ids in proptest::collection::vec("[a-z0-9-]{1,16}", 1..64),
            max in 1u32..17,
        ) {
            let slices = SliceSpec::all(max).unwrap();
            for id in &ids {
                let owners = slices.iter().filter(|s| s.owns(id)).count();
                prop_assert_eq!(owners, 1);
            }
        }

        #[test]
        fn prop_every_key_in_exactly_one_slice(key in any::<u32>(), max in 1u32..1000) {
            let slices = SliceSpec::all(max).unwrap();
            let owners = slices.iter().filter(|s| s.contains(key)).count();
            prop_assert_eq!(owners, 1);
        }
    }
}
