//! Stable mapping of sequencing keys to partitions.
//!
//! The hash must be stable across processes and releases, because processors
//! in different processes must agree on which partition owns a key without a
//! coordinator. FNV-1a is used for that reason; the standard library's
//! hasher is explicitly not guaranteed stable.

use nutype::nutype;

/// Number of partitions a group is divided into.
#[nutype(
    validate(greater = 0),
    derive(Debug, Clone, Copy, PartialEq, Eq, AsRef, Deref, Display, Serialize, Deserialize)
)]
pub struct PartitionCount(u32);

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Maps sequencing keys to partition indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionKeyResolver {
    partitions: PartitionCount,
}

impl PartitionKeyResolver {
    /// Creates a resolver for the given partition count.
    pub const fn new(partitions: PartitionCount) -> Self {
        Self { partitions }
    }

    /// The partition owning the given sequencing key, in `0..partitions`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn resolve(&self, sequencing_key: &str) -> u32 {
        (fnv1a_64(sequencing_key.as_bytes()) % u64::from(*self.partitions.as_ref())) as u32
    }

    /// The configured partition count.
    pub const fn partitions(&self) -> PartitionCount {
        self.partitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn resolver(partitions: u32) -> PartitionKeyResolver {
        PartitionKeyResolver::new(PartitionCount::try_new(partitions).unwrap())
    }

    #[test]
    fn partition_count_must_be_positive() {
        assert!(PartitionCount::try_new(0).is_err());
        assert!(PartitionCount::try_new(1).is_ok());
    }

    #[test]
    fn known_hashes_stay_stable() {
        // Reference FNV-1a 64 digests; a change here breaks cross-process
        // partition agreement.
        assert_eq!(fnv1a_64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn single_partition_owns_everything() {
        let resolver = resolver(1);
        assert_eq!(resolver.resolve("/books/42"), 0);
        assert_eq!(resolver.resolve("/anything"), 0);
    }

    proptest! {
        #[test]
        fn resolved_partition_is_in_range(key in ".{0,64}", partitions in 1u32..64) {
            prop_assert!(resolver(partitions).resolve(&key) < partitions);
        }

        #[test]
        fn resolution_is_deterministic(key in ".{0,64}", partitions in 1u32..64) {
            let r = resolver(partitions);
            prop_assert_eq!(r.resolve(&key), r.resolve(&key));
        }
    }
}
