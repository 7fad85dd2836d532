//! Key hashing.
//!
//! The trie spreads keys by successive bit slices of a 64-bit hash and
//! treats hash equality as key equality. The hash function must therefore
//! be injective over the keys actually stored; two distinct keys with the
//! same hash cannot coexist, and the second insert reports
//! `AlreadyPresent`.

use core::hash::{BuildHasher, Hash};

/// An injective `Key -> u64` function.
pub trait KeyHash<K> {
    /// Hash of `key`. Must be injective over the stored key universe.
    fn hash_of(&self, key: &K) -> u64;
}

/// The identity function on unsigned integer keys, injective by
/// construction. This is the default hasher.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityHash;

macro_rules! impl_identity_hash {
    ($($t:ty),*) => {
        $(
            impl KeyHash<$t> for IdentityHash {
                #[inline]
                fn hash_of(&self, key: &$t) -> u64 {
                    *key as u64
                }
            }
        )*
    };
}

impl_identity_hash!(u8, u16, u32, u64, usize);

/// foldhash's fixed-seed hasher covers keys that are not small integers.
/// The injectivity requirement then becomes a 64-bit no-collision
/// assumption on the stored keys.
impl<K: Hash> KeyHash<K> for foldhash::fast::FixedState {
    #[inline]
    fn hash_of(&self, key: &K) -> u64 {
        self.hash_one(key)
    }
}

/// The std `RandomState` works the same way, at the cost of a per-map
/// random seed.
impl<K: Hash> KeyHash<K> for std::collections::hash_map::RandomState {
    #[inline]
    fn hash_of(&self, key: &K) -> u64 {
        self.hash_one(key)
    }
}
